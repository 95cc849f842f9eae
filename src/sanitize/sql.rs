//! Read-only SQL validation.
//!
//! Parses the generated statement and rejects anything that is not a
//! plain `SELECT` over allow-listed tables. The allow-list is the
//! authorization boundary; a statement touching any other table is
//! rejected outright rather than rewritten.

use crate::engines::EngineError;
use sqlparser::ast::{ObjectName, Query, SetExpr, Statement, TableFactor, Visit, Visitor};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::sync::LazyLock;

static MUTATING_KEYWORDS: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(
        r"(?i)\b(INSERT|UPDATE|DELETE|DROP|ALTER|CREATE|TRUNCATE|REPLACE|GRANT|REVOKE|ATTACH|PRAGMA|INTO)\b",
    )
    .expect("static regex")
});

/// Collects every table relation in the statement, including inside
/// subqueries and join clauses.
#[derive(Default)]
struct RelationCollector {
    relations: Vec<String>,
}

impl Visitor for RelationCollector {
    type Break = ();

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<()> {
        if let Some(last) = relation.0.last() {
            self.relations.push(last.value.clone());
        }
        ControlFlow::Continue(())
    }
}

/// Gather CTE alias names from every `WITH` clause reachable through the
/// query structure. A CTE reference parses as a plain table relation, so
/// its alias has to be treated as locally allow-listed.
fn collect_cte_aliases(query: &Query, out: &mut BTreeSet<String>) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            out.insert(cte.alias.name.value.to_lowercase());
            collect_cte_aliases(&cte.query, out);
        }
    }
    collect_from_set_expr(&query.body, out);
}

fn collect_from_set_expr(body: &SetExpr, out: &mut BTreeSet<String>) {
    match body {
        SetExpr::Select(select) => {
            for twj in &select.from {
                collect_from_table_factor(&twj.relation, out);
                for join in &twj.joins {
                    collect_from_table_factor(&join.relation, out);
                }
            }
        }
        SetExpr::Query(query) => collect_cte_aliases(query, out),
        SetExpr::SetOperation { left, right, .. } => {
            collect_from_set_expr(left, out);
            collect_from_set_expr(right, out);
        }
        _ => {}
    }
}

fn collect_from_table_factor(factor: &TableFactor, out: &mut BTreeSet<String>) {
    match factor {
        TableFactor::Derived { subquery, .. } => collect_cte_aliases(subquery, out),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => {
            collect_from_table_factor(&table_with_joins.relation, out);
            for join in &table_with_joins.joins {
                collect_from_table_factor(&join.relation, out);
            }
        }
        _ => {}
    }
}

/// Validate a generated statement and return an executable form.
///
/// Requirements enforced:
/// - exactly one statement, and it must be a `SELECT` query;
/// - no mutating keywords anywhere in the text;
/// - every referenced table (including inside subqueries and joins) is
///   either allow-listed or a CTE defined in the statement itself;
/// - a `LIMIT` clause, appended with `default_limit` when absent.
///
/// `allowed_tables` holds lowercase table names.
///
/// # Errors
///
/// [`EngineError::Generation`] when the statement does not parse,
/// [`EngineError::Forbidden`] when it violates the read-only or
/// allow-list rules.
pub fn sanitize_select(
    sql: &str,
    allowed_tables: &BTreeSet<String>,
    default_limit: u64,
) -> Result<String, EngineError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if trimmed.is_empty() {
        return Err(EngineError::Generation("empty SQL statement".to_string()));
    }

    if let Some(m) = MUTATING_KEYWORDS.find(trimmed) {
        return Err(EngineError::Forbidden(format!(
            "mutating keyword `{}` is not allowed",
            m.as_str().to_uppercase()
        )));
    }

    let statements = Parser::parse_sql(&MySqlDialect {}, trimmed)
        .map_err(|e| EngineError::Generation(format!("SQL does not parse: {e}")))?;

    if statements.len() != 1 {
        return Err(EngineError::Forbidden(format!(
            "expected exactly one statement, got {}",
            statements.len()
        )));
    }

    let query = match &statements[0] {
        Statement::Query(query) => query,
        other => {
            return Err(EngineError::Forbidden(format!(
                "only SELECT queries are allowed, got: {}",
                statement_kind(other)
            )))
        }
    };

    let mut collector = RelationCollector::default();
    let _ = statements[0].visit(&mut collector);
    let mut cte_aliases = BTreeSet::new();
    collect_cte_aliases(query, &mut cte_aliases);

    if collector.relations.is_empty() {
        return Err(EngineError::Forbidden(
            "statement references no tables".to_string(),
        ));
    }
    for relation in &collector.relations {
        let lowered = relation.to_lowercase();
        if !allowed_tables.contains(&lowered) && !cte_aliases.contains(&lowered) {
            return Err(EngineError::Forbidden(format!(
                "table `{relation}` is not allow-listed"
            )));
        }
    }

    let mut executable = trimmed.to_string();
    if query.limit.is_none() && query.fetch.is_none() {
        executable.push_str(&format!(" LIMIT {default_limit}"));
    }
    Ok(executable)
}

fn statement_kind(statement: &Statement) -> &'static str {
    match statement {
        Statement::Insert(_) => "INSERT",
        Statement::Update { .. } => "UPDATE",
        Statement::Delete(_) => "DELETE",
        Statement::Drop { .. } => "DROP",
        Statement::CreateTable(_) => "CREATE TABLE",
        _ => "non-SELECT statement",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed() -> BTreeSet<String> {
        ["tabstudent", "tabschool", "tabcourse video"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_plain_select_gets_limit() {
        let out =
            sanitize_select("SELECT name FROM `tabStudent`", &allowed(), 20).unwrap();
        assert_eq!(out, "SELECT name FROM `tabStudent` LIMIT 20");
    }

    #[test]
    fn test_existing_limit_is_kept() {
        let out = sanitize_select(
            "SELECT name FROM `tabStudent` LIMIT 5;",
            &allowed(),
            20,
        )
        .unwrap();
        assert_eq!(out, "SELECT name FROM `tabStudent` LIMIT 5");
    }

    #[test]
    fn test_join_over_allowed_tables() {
        let sql = "SELECT s.name, sc.city FROM `tabStudent` s \
                   JOIN `tabSchool` sc ON s.school = sc.name WHERE sc.city = 'Pune'";
        assert!(sanitize_select(sql, &allowed(), 20).is_ok());
    }

    #[test]
    fn test_non_allowlisted_table_rejected() {
        let err = sanitize_select("SELECT * FROM `tabUser`", &allowed(), 20).unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
        assert!(err.to_string().contains("tabUser"));
    }

    #[test]
    fn test_subquery_table_rejected() {
        let sql = "SELECT name FROM `tabStudent` \
                   WHERE school IN (SELECT name FROM `tabUser`)";
        let err = sanitize_select(sql, &allowed(), 20).unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }

    #[test]
    fn test_cte_alias_is_allowed() {
        let sql = "WITH basic AS (SELECT name FROM `tabCourse Video` \
                   WHERE difficulty_tier = 'Basic') SELECT COUNT(*) FROM basic";
        assert!(sanitize_select(sql, &allowed(), 20).is_ok());
    }

    #[test]
    fn test_chained_ctes_are_allowed() {
        let sql = "WITH basic AS (SELECT name FROM `tabCourse Video` \
                   WHERE difficulty_tier = 'Basic'), \
                   counted AS (SELECT COUNT(*) AS n FROM basic) \
                   SELECT n FROM counted";
        assert!(sanitize_select(sql, &allowed(), 20).is_ok());
    }

    #[test]
    fn test_mutating_statement_rejected() {
        for sql in [
            "DELETE FROM `tabStudent`",
            "UPDATE `tabStudent` SET grade = '9'",
            "DROP TABLE `tabStudent`",
            "INSERT INTO `tabStudent` (name) VALUES ('x')",
        ] {
            let err = sanitize_select(sql, &allowed(), 20).unwrap_err();
            assert!(matches!(err, EngineError::Forbidden(_)), "{sql}");
        }
    }

    #[test]
    fn test_garbage_is_generation_error() {
        let err = sanitize_select("not sql at all %%", &allowed(), 20).unwrap_err();
        assert!(matches!(err, EngineError::Generation(_)));
    }

    #[test]
    fn test_multiple_statements_rejected() {
        let err = sanitize_select(
            "SELECT name FROM `tabStudent`; SELECT name FROM `tabSchool`",
            &allowed(),
            20,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }
}
