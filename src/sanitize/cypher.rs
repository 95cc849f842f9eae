//! Cypher validation and repair.
//!
//! Models reliably produce three classes of broken Cypher: SQL habits
//! (`GROUP BY`), invented property names, and unquoted numeric literals
//! for string-typed fields such as `grade`. The policy removes or
//! repairs those, rejects writes outright, and enforces a row cap.

use crate::engines::EngineError;
use std::collections::BTreeSet;
use std::sync::LazyLock;

static WRITE_KEYWORDS: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?i)\b(CREATE|MERGE|DELETE|DETACH|SET|REMOVE|DROP|LOAD\s+CSV|FOREACH|CALL\s+db(?:ms)?\.)")
        .expect("static regex")
});

static GROUP_BY: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?im)^\s*GROUP\s+BY\b[^\n]*\n?").expect("static regex")
});

static NODE_LABEL: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\(\s*\w*\s*:\s*`?(\w+)`?").expect("static regex")
});

static REL_TYPE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\[\s*\w*\s*:\s*`?(\w+)`?").expect("static regex")
});

static PROP_USE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\b([a-zA-Z][a-zA-Z0-9_]*)\.([a-zA-Z_][a-zA-Z0-9_]*)\b")
        .expect("static regex")
});

static HAS_LIMIT: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"(?i)\bLIMIT\b").expect("static regex"));

static NUM_EQ: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(\b[a-zA-Z_][\w.]*\.([a-zA-Z_]\w*)\s*=\s*)(\d+)\b").expect("static regex")
});

static NUM_IN_LIST: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(\b[a-zA-Z_][\w.]*\.([a-zA-Z_]\w*)\s+IN\s*)[(\[]\s*((?:\d+\s*,\s*)*\d+)\s*[)\]]")
        .expect("static regex")
});

/// Result of sanitizing one generated statement.
#[derive(Debug, Clone)]
pub struct SanitizedCypher {
    pub cypher: String,
    /// Invented property names that were neutralized.
    pub removed_properties: Vec<String>,
}

/// Schema-derived validation policy for generated Cypher.
#[derive(Debug, Clone)]
pub struct CypherPolicy {
    /// Node labels that exist in the graph.
    pub labels: BTreeSet<String>,
    /// Relationship types that exist in the graph.
    pub rel_types: BTreeSet<String>,
    /// Union of valid property names across all node types.
    pub properties: BTreeSet<String>,
    /// Appended as `LIMIT n` when the statement has none.
    pub row_limit: u64,
    /// Fields stored as strings that models tend to write as numbers.
    pub stringy_fields: BTreeSet<String>,
}

impl CypherPolicy {
    pub fn new(
        labels: BTreeSet<String>,
        rel_types: BTreeSet<String>,
        properties: BTreeSet<String>,
        row_limit: u64,
    ) -> Self {
        let stringy_fields = ["grade"].iter().map(|s| s.to_string()).collect();
        Self {
            labels,
            rel_types,
            properties,
            row_limit,
            stringy_fields,
        }
    }

    /// Validate and repair a generated statement.
    ///
    /// # Errors
    ///
    /// [`EngineError::Generation`] for an empty statement,
    /// [`EngineError::Forbidden`] for write clauses or unknown
    /// labels/relationship types.
    pub fn sanitize(&self, raw: &str) -> Result<SanitizedCypher, EngineError> {
        let cypher = crate::llm::strip_markdown(raw);
        let cypher = cypher.trim().trim_end_matches(';').trim().to_string();
        if cypher.is_empty() {
            return Err(EngineError::Generation("empty Cypher statement".to_string()));
        }

        if let Some(m) = WRITE_KEYWORDS.find(&cypher) {
            return Err(EngineError::Forbidden(format!(
                "write clause `{}` is not allowed",
                m.as_str().trim().to_uppercase()
            )));
        }

        for caps in NODE_LABEL.captures_iter(&cypher) {
            let label = &caps[1];
            if !self.labels.contains(label) {
                return Err(EngineError::Forbidden(format!(
                    "unknown node label `{label}`"
                )));
            }
        }
        for caps in REL_TYPE.captures_iter(&cypher) {
            let rel = &caps[1];
            if !self.rel_types.contains(rel) {
                return Err(EngineError::Forbidden(format!(
                    "unknown relationship type `{rel}`"
                )));
            }
        }

        let cypher = GROUP_BY.replace_all(&cypher, "").into_owned();
        let (cypher, removed_properties) = self.strip_invalid_props(&cypher);
        let cypher = self.fix_stringy_literals(&cypher);

        let cypher = if HAS_LIMIT.is_match(&cypher) {
            cypher
        } else {
            format!("{}\nLIMIT {}", cypher.trim_end(), self.row_limit)
        };

        Ok(SanitizedCypher {
            cypher,
            removed_properties,
        })
    }

    /// Neutralize references to properties that do not exist: a
    /// comparison collapses to `TRUE`, a trailing `AND` clause is
    /// dropped, and any remaining bare use becomes `var.NULL` (which
    /// evaluates to null rather than erroring).
    fn strip_invalid_props(&self, cypher: &str) -> (String, Vec<String>) {
        let mut removed: BTreeSet<String> = BTreeSet::new();
        for caps in PROP_USE.captures_iter(cypher) {
            let prop = &caps[2];
            if !self.properties.contains(prop) {
                removed.insert(prop.to_string());
            }
        }
        if removed.is_empty() {
            return (cypher.to_string(), Vec::new());
        }

        let mut cleaned = cypher.to_string();
        for bad in &removed {
            let escaped = regex::escape(bad);
            let comparison =
                regex::Regex::new(&format!(r"\b\w+\.{escaped}\s*(?:=|!=|<>|<=|>=|<|>)\s*[^)\n,]+"))
                    .expect("escaped property regex");
            cleaned = comparison.replace_all(&cleaned, "TRUE").into_owned();

            let and_clause = regex::Regex::new(&format!(r"(?i)\bAND\s+\w+\.{escaped}\s*[^)\n,]+"))
                .expect("escaped property regex");
            cleaned = and_clause.replace_all(&cleaned, "").into_owned();

            let bare = regex::Regex::new(&format!(r"\b(\w+)\.{escaped}\b"))
                .expect("escaped property regex");
            cleaned = bare.replace_all(&cleaned, "${1}.NULL").into_owned();
        }
        (cleaned, removed.into_iter().collect())
    }

    /// Quote numeric literals compared against string-typed fields, e.g.
    /// `n.grade = 9` becomes `n.grade = '9'` and `n.grade IN (9, 10)`
    /// becomes `n.grade IN ['9', '10']`.
    fn fix_stringy_literals(&self, cypher: &str) -> String {
        let fixed = NUM_EQ.replace_all(cypher, |caps: &regex::Captures<'_>| {
            if self.stringy_fields.contains(&caps[2]) {
                format!("{}'{}'", &caps[1], &caps[3])
            } else {
                caps[0].to_string()
            }
        });
        NUM_IN_LIST
            .replace_all(&fixed, |caps: &regex::Captures<'_>| {
                if !self.stringy_fields.contains(&caps[2]) {
                    return caps[0].to_string();
                }
                let items: Vec<String> = caps[3]
                    .split(',')
                    .map(|x| format!("'{}'", x.trim()))
                    .collect();
                format!("{}[{}]", &caps[1], items.join(", "))
            })
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CypherPolicy {
        let labels = ["Student", "School", "CourseVideo"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let rels = ["STUDENT_SCHOOL_TO_SCHOOL_NAME"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let props = ["name", "display_name", "_doctype", "grade", "status", "city"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        CypherPolicy::new(labels, rels, props, 100)
    }

    #[test]
    fn test_limit_appended() {
        let out = policy()
            .sanitize("MATCH (s:Student) RETURN s.name")
            .unwrap();
        assert!(out.cypher.ends_with("LIMIT 100"));
    }

    #[test]
    fn test_existing_limit_kept() {
        let out = policy()
            .sanitize("MATCH (s:Student) RETURN s.name LIMIT 5")
            .unwrap();
        assert!(out.cypher.contains("LIMIT 5"));
        assert!(!out.cypher.contains("LIMIT 100"));
    }

    #[test]
    fn test_write_clause_rejected() {
        let err = policy()
            .sanitize("MATCH (s:Student) DETACH DELETE s")
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }

    #[test]
    fn test_unknown_label_rejected() {
        let err = policy().sanitize("MATCH (u:User) RETURN u").unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
        assert!(err.to_string().contains("User"));
    }

    #[test]
    fn test_unknown_rel_type_rejected() {
        let err = policy()
            .sanitize("MATCH (s:Student)-[:ENROLLED_IN]->(c:CourseVideo) RETURN s")
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }

    #[test]
    fn test_group_by_removed() {
        let out = policy()
            .sanitize("MATCH (s:Student) RETURN s.grade, count(s)\nGROUP BY s.grade\nLIMIT 10")
            .unwrap();
        assert!(!out.cypher.to_uppercase().contains("GROUP BY"));
    }

    #[test]
    fn test_invalid_property_comparison_collapses() {
        let out = policy()
            .sanitize("MATCH (s:Student) WHERE s.grade_level = 9 RETURN s.name LIMIT 10")
            .unwrap();
        assert!(out.cypher.contains("WHERE TRUE"));
        assert_eq!(out.removed_properties, vec!["grade_level".to_string()]);
    }

    #[test]
    fn test_invalid_property_in_return_nulled() {
        let out = policy()
            .sanitize("MATCH (s:Student) RETURN s.name, s.nickname LIMIT 10")
            .unwrap();
        assert!(out.cypher.contains("s.NULL"));
    }

    #[test]
    fn test_stringy_grade_equality_quoted() {
        let out = policy()
            .sanitize("MATCH (s:Student) WHERE s.grade = 9 RETURN s.name LIMIT 10")
            .unwrap();
        assert!(out.cypher.contains("s.grade = '9'"));
    }

    #[test]
    fn test_stringy_grade_in_list_quoted() {
        let out = policy()
            .sanitize("MATCH (s:Student) WHERE s.grade IN (9, 10) RETURN s.name LIMIT 10")
            .unwrap();
        assert!(out.cypher.contains("s.grade IN ['9', '10']"));
    }

    #[test]
    fn test_fenced_statement_unwrapped() {
        let out = policy()
            .sanitize("```cypher\nMATCH (s:Student) RETURN s.name LIMIT 3\n```")
            .unwrap();
        assert!(out.cypher.starts_with("MATCH"));
    }
}
