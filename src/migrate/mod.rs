//! Relational-to-graph migration.
//!
//! Mirrors the allow-listed tables into the property graph: one node per
//! record (MERGE on `name`, so reruns are idempotent), one relationship
//! type per declared join. Every node carries `_doctype` and
//! `display_name` so generated Cypher can filter and present without
//! knowing each entity's own title field.

use crate::schema::{ResolvedJoin, SchemaCatalog};
use crate::stores::{GraphStore, SqlStore};
use crate::types::Result;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Outcome of one migration run.
#[derive(Debug, Default, Serialize)]
pub struct MigrationReport {
    pub cleared: bool,
    /// Records migrated per doctype.
    pub nodes: BTreeMap<String, u64>,
    /// Relationships present per join after the run.
    pub relationships: BTreeMap<String, u64>,
    /// Left-side records whose key matched no right-side node.
    pub skipped_relationships: BTreeMap<String, u64>,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

/// Copies allow-listed records and declared joins into the graph store.
pub struct GraphMigrator {
    graph: Arc<dyn GraphStore>,
    sql: Arc<dyn SqlStore>,
    catalog: Arc<SchemaCatalog>,
    batch_size: usize,
    max_errors_per_type: usize,
}

impl GraphMigrator {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        sql: Arc<dyn SqlStore>,
        catalog: Arc<SchemaCatalog>,
        batch_size: usize,
        max_errors_per_type: usize,
    ) -> Self {
        Self {
            graph,
            sql,
            catalog,
            batch_size: batch_size.max(1),
            max_errors_per_type,
        }
    }

    /// Run the full migration. `clear` wipes the graph first; without it
    /// the run is an idempotent upsert.
    pub async fn migrate(&self, clear: bool) -> Result<MigrationReport> {
        let started = Instant::now();
        let mut report = MigrationReport::default();

        if clear {
            self.graph
                .run_write("MATCH (n) DETACH DELETE n", json!({}))
                .await?;
            report.cleared = true;
            tracing::info!("cleared graph before migration");
        }

        for table in self.catalog.allowlisted_tables() {
            let table = table.to_string();
            self.ensure_schema(&table, &mut report).await;
            self.migrate_table(&table, &mut report).await;
        }

        for join in self.catalog.resolved_joins() {
            if !self.catalog.is_allowed(&join.left_table) || !self.catalog.is_allowed(&join.right_table)
            {
                continue;
            }
            self.migrate_join(&join, &mut report).await;
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    /// Uniqueness constraint on `name` plus a `display_name` index, per
    /// label. Failures are recorded but never abort the run.
    async fn ensure_schema(&self, table: &str, report: &mut MigrationReport) {
        let label = self.catalog.label_for_table(table);
        let lower = label.to_lowercase();
        let statements = [
            format!(
                "CREATE CONSTRAINT {lower}_name_unique IF NOT EXISTS \
                 FOR (n:{label}) REQUIRE n.name IS UNIQUE"
            ),
            format!(
                "CREATE INDEX {lower}_display_name_idx IF NOT EXISTS \
                 FOR (n:{label}) ON (n.display_name)"
            ),
        ];
        for statement in statements {
            if let Err(e) = self.graph.run_write(&statement, json!({})).await {
                report.errors.push(format!("schema for {label}: {e}"));
            }
        }
    }

    async fn migrate_table(&self, table: &str, report: &mut MigrationReport) {
        let doctype = self.catalog.doctype_of(table);
        let label = self.catalog.label_for_table(table);
        let display_field = self.catalog.display_field_for(&doctype).map(|s| s.to_string());

        let total = match self.sql.count(table).await {
            Ok(total) => total,
            Err(e) => {
                report.errors.push(format!("count {table}: {e}"));
                return;
            }
        };

        let mut migrated = 0u64;
        let mut type_errors = 0usize;
        let mut offset = 0u64;
        while offset < total {
            let page = match self.sql.fetch_page(table, offset, self.batch_size as u64).await {
                Ok(page) => page,
                Err(e) => {
                    report.errors.push(format!("fetch {table} at {offset}: {e}"));
                    break;
                }
            };
            if page.is_empty() {
                break;
            }
            offset += page.len() as u64;

            let mut rows: Vec<Value> = Vec::with_capacity(page.len());
            for record in &page {
                match node_props(record, &doctype, display_field.as_deref()) {
                    Some(props) => rows.push(props),
                    None => {
                        type_errors += 1;
                        if type_errors <= self.max_errors_per_type {
                            report
                                .errors
                                .push(format!("{doctype}: record without a name skipped"));
                        }
                    }
                }
            }
            if type_errors > self.max_errors_per_type {
                report.errors.push(format!(
                    "{doctype}: aborted after {type_errors} bad records"
                ));
                break;
            }
            if rows.is_empty() {
                continue;
            }

            let statement = format!(
                "UNWIND $rows AS row MERGE (n:{label} {{name: row.name}}) SET n += row"
            );
            match self
                .graph
                .run_write(&statement, json!({ "rows": rows.clone() }))
                .await
            {
                Ok(_) => migrated += rows.len() as u64,
                Err(e) => {
                    report.errors.push(format!("write batch {doctype}: {e}"));
                    break;
                }
            }
        }

        tracing::info!(%doctype, migrated, total, "migrated node type");
        report.nodes.insert(doctype, migrated);
    }

    /// Create one relationship type from a declared join, then measure
    /// how many left-side records found no partner.
    async fn migrate_join(&self, join: &ResolvedJoin, report: &mut MigrationReport) {
        let left = self.catalog.label_for_table(&join.left_table);
        let right = self.catalog.label_for_table(&join.right_table);
        let key = format!("{left}-{rel}->{right}", rel = join.rel);

        let candidates = format!(
            "MATCH (l:{left}) WHERE l.{lk} IS NOT NULL RETURN count(l)",
            lk = join.left_key
        );
        let candidates = match self.single_count(&candidates).await {
            Ok(n) => n,
            Err(e) => {
                report.errors.push(format!("count candidates {key}: {e}"));
                return;
            }
        };

        let merge = format!(
            "MATCH (l:{left}), (r:{right}) \
             WHERE l.{lk} IS NOT NULL AND l.{lk} = r.{rk} \
             MERGE (l)-[:{rel}]->(r)",
            lk = join.left_key,
            rk = join.right_key,
            rel = join.rel,
        );
        if let Err(e) = self.graph.run_write(&merge, json!({})).await {
            report.errors.push(format!("merge {key}: {e}"));
            return;
        }

        let present = format!(
            "MATCH (:{left})-[:{rel}]->(:{right}) RETURN count(*)",
            rel = join.rel
        );
        let present = match self.single_count(&present).await {
            Ok(n) => n,
            Err(e) => {
                report.errors.push(format!("count relationships {key}: {e}"));
                return;
            }
        };

        tracing::info!(
            join = %key,
            relationships = present,
            skipped = candidates.saturating_sub(present),
            "migrated join"
        );
        report.relationships.insert(key.clone(), present);
        report
            .skipped_relationships
            .insert(key, candidates.saturating_sub(present));
    }

    async fn single_count(&self, statement: &str) -> Result<u64> {
        let rows = self.graph.run(statement, json!({})).await?;
        Ok(rows.first().and_then(|v| v.as_u64()).unwrap_or(0))
    }
}

/// Node properties for one record: scalar non-empty fields only, plus
/// `_doctype` and `display_name`. Returns `None` when the record has no
/// usable `name`.
fn node_props(record: &Value, doctype: &str, display_field: Option<&str>) -> Option<Value> {
    let obj = record.as_object()?;
    let name = obj.get("name").and_then(|v| v.as_str())?.trim();
    if name.is_empty() {
        return None;
    }

    let mut props = serde_json::Map::new();
    for (key, value) in obj {
        match value {
            Value::String(s) => {
                let trimmed = s.trim();
                if !trimmed.is_empty() {
                    props.insert(key.clone(), Value::String(trimmed.to_string()));
                }
            }
            Value::Number(_) | Value::Bool(_) => {
                props.insert(key.clone(), value.clone());
            }
            _ => {}
        }
    }
    props.insert("name".to_string(), Value::String(name.to_string()));
    props.insert("_doctype".to_string(), Value::String(doctype.to_string()));

    let display = display_field
        .and_then(|f| obj.get(f))
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .or_else(|| {
            obj.get("name1")
                .and_then(|v| v.as_str())
                .filter(|s| !s.trim().is_empty())
        })
        .unwrap_or(name);
    props.insert(
        "display_name".to_string(),
        Value::String(display.trim().to_string()),
    );

    Some(Value::Object(props))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_props_require_name() {
        assert!(node_props(&json!({"name1": "Asha"}), "Student", None).is_none());
        assert!(node_props(&json!({"name": "  "}), "Student", None).is_none());
    }

    #[test]
    fn test_node_props_shape() {
        let record = json!({
            "name": "STU-1",
            "name1": "Asha",
            "grade": "9",
            "notes": null,
            "blob": {"nested": true},
            "empty": ""
        });
        let props = node_props(&record, "Student", Some("name1")).unwrap();
        assert_eq!(props["_doctype"], "Student");
        assert_eq!(props["display_name"], "Asha");
        assert_eq!(props["grade"], "9");
        assert!(props.get("notes").is_none());
        assert!(props.get("blob").is_none());
        assert!(props.get("empty").is_none());
    }

    #[test]
    fn test_display_name_falls_back_to_name() {
        let props = node_props(&json!({"name": "SCH-1"}), "School", None).unwrap();
        assert_eq!(props["display_name"], "SCH-1");
    }
}
