//! Graph query engine.
//!
//! Routes the question to candidate doctypes, asks the model for a
//! Cypher statement over the migrated graph, repairs it with
//! [`CypherPolicy`], and returns the matched rows serialized as the
//! answer. Relationship traversal is the whole point here; one-table
//! questions belong to the SQL engine.

use crate::engines::{EngineAnswer, EngineError, QueryEngine};
use crate::llm::{ChatModel, DoctypeSelector};
use crate::sanitize::CypherPolicy;
use crate::schema::SchemaCatalog;
use crate::stores::GraphStore;
use crate::types::{Engine, Turn};
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// How many doctypes the selector may route to.
const GRAPH_ROUTE_TOP_N: usize = 6;

/// How many rows are serialized into the answer text.
const ANSWER_ROW_CAP: usize = 20;

/// Caps for prompt value hints sampled from the graph.
const HINT_FIELDS_PER_DOCTYPE: usize = 5;
const HINT_VALUES_PER_FIELD: usize = 8;

const CYPHER_PROMPT: &str = r#"You are an expert Cypher generator for a Neo4j graph of LMS data.

Rules:
- Generate exactly ONE read-only Cypher query. Never use CREATE, MERGE, SET, DELETE, or REMOVE.
- Use ONLY the node labels, relationship types, and properties listed below.
- Every node carries `_doctype` (the source DocType name), `name` (unique id) and `display_name`.
- Prefer filtering by doctype: MATCH (n) WHERE n._doctype = '<DocType>'.
- String-typed properties such as grade hold string values: n.grade = '9', not 9.
- When comparing categorical fields, prefer values shown in VALUE HINTS.
- NEVER use SQL constructs like GROUP BY (use aggregates in RETURN).
- Always include a LIMIT clause.

Return ONLY the Cypher query. No prose. No backticks."#;

/// Engine that answers relationship questions over the graph store.
pub struct GraphEngine {
    llm: Arc<dyn ChatModel>,
    store: Arc<dyn GraphStore>,
    catalog: Arc<SchemaCatalog>,
    selector: DoctypeSelector,
    row_limit: u64,
    timeout: Duration,
}

impl GraphEngine {
    pub fn new(
        llm: Arc<dyn ChatModel>,
        store: Arc<dyn GraphStore>,
        catalog: Arc<SchemaCatalog>,
        row_limit: u64,
        timeout: Duration,
    ) -> Self {
        let selector = DoctypeSelector::new(Arc::clone(&llm), Arc::clone(&catalog));
        Self {
            llm,
            store,
            catalog,
            selector,
            row_limit,
            timeout,
        }
    }

    /// Fields worth sampling for a doctype: categorical and id-like
    /// columns, never free text.
    fn hint_fields(&self, doctype: &str) -> Vec<String> {
        let Some(table) = self.catalog.table_of(doctype) else {
            return Vec::new();
        };
        let Some(info) = self.catalog.tables.get(table) else {
            return Vec::new();
        };
        info.columns
            .iter()
            .filter(|c| matches!(c.fieldtype(), "Select" | "Data" | "Link"))
            .map(|c| c.name().to_string())
            .take(HINT_FIELDS_PER_DOCTYPE)
            .collect()
    }

    /// Sample distinct non-empty values of one property from the graph.
    /// Failures come back as an empty list; hints are best effort.
    async fn sample_distinct(&self, doctype: &str, field: &str) -> Vec<String> {
        let statement = format!(
            "MATCH (n) WHERE n._doctype = $dt AND n.{field} IS NOT NULL \
             WITH DISTINCT n.{field} AS v WHERE toString(v) <> '' \
             RETURN v LIMIT {HINT_VALUES_PER_FIELD}"
        );
        let run = self.store.run(&statement, json!({ "dt": doctype }));
        match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(rows)) => rows
                .iter()
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .filter(|s| !s.is_empty())
                .collect(),
            Ok(Err(e)) => {
                tracing::debug!(%doctype, %field, error = %e, "value sampling failed");
                Vec::new()
            }
            Err(_) => {
                tracing::debug!(%doctype, %field, "value sampling timed out");
                Vec::new()
            }
        }
    }

    /// Observed property values per routed doctype, used to ground the
    /// prompt in what the graph actually holds.
    async fn collect_value_hints(&self, doctypes: &[String]) -> Vec<(String, String, Vec<String>)> {
        let mut hints = Vec::new();
        for doctype in doctypes {
            for field in self.hint_fields(doctype) {
                let values = self.sample_distinct(doctype, &field).await;
                if !values.is_empty() {
                    hints.push((doctype.clone(), field, values));
                }
            }
        }
        hints
    }

    /// Schema block for the prompt: labels, properties, observed value
    /// hints, and the declared relationships touching the routed doctypes.
    fn schema_block(&self, doctypes: &[String], hints: &[(String, String, Vec<String>)]) -> String {
        let mut parts = vec!["NODE TYPES:".to_string()];
        for doctype in doctypes {
            let label = self.catalog.label_for_doctype(doctype);
            let props: Vec<String> = self.catalog.props_for(doctype).into_iter().collect();
            parts.push(format!(
                "- (:{label}) for DocType '{doctype}', properties: [{}]",
                props.join(", ")
            ));
            for (field, options) in self.catalog.select_columns_for(doctype) {
                if !options.is_empty() {
                    parts.push(format!("  - {field} values: {options:?}"));
                }
            }
        }

        parts.push("\nVALUE HINTS (observed in the graph):".to_string());
        if hints.is_empty() {
            parts.push("(none)".to_string());
        }
        for (doctype, field, values) in hints {
            parts.push(format!("- {doctype}.{field}: {values:?}"));
        }

        parts.push("\nRELATIONSHIPS:".to_string());
        for join in self.catalog.joins_touching(doctypes) {
            let left = self.catalog.label_for_doctype(&join.left_doctype);
            let right = self.catalog.label_for_doctype(&join.right_doctype);
            parts.push(format!(
                "- (:{left})-[:{rel}]->(:{right})  // {ld}.{lk} = {rd}.{rk}",
                rel = join.rel,
                ld = join.left_doctype,
                lk = join.left_key,
                rd = join.right_doctype,
                rk = join.right_key,
            ));
        }
        parts.join("\n")
    }

    /// Validation policy covering the whole allow-list, not just the
    /// routed doctypes; generated queries are free to join further.
    fn policy(&self) -> CypherPolicy {
        let mut labels = BTreeSet::new();
        let mut properties = BTreeSet::new();
        for doctype in self.catalog.allowlisted_doctypes() {
            labels.insert(self.catalog.label_for_doctype(&doctype));
            properties.extend(self.catalog.props_for(&doctype));
        }
        let rel_types = self
            .catalog
            .resolved_joins()
            .into_iter()
            .map(|j| j.rel)
            .collect();
        CypherPolicy::new(labels, rel_types, properties, self.row_limit)
    }
}

#[async_trait]
impl QueryEngine for GraphEngine {
    fn engine(&self) -> Engine {
        Engine::Graph
    }

    async fn attempt(
        &self,
        query: &str,
        _history: &[Turn],
    ) -> Result<EngineAnswer, EngineError> {
        let doctypes = self.selector.pick(query, GRAPH_ROUTE_TOP_N).await;
        let hints = self.collect_value_hints(&doctypes).await;
        let user_msg = format!(
            "GRAPH SCHEMA:\n{}\n\nQUESTION:\n{}",
            self.schema_block(&doctypes, &hints),
            query
        );

        let raw = self
            .llm
            .complete(CYPHER_PROMPT, &user_msg)
            .await
            .map_err(|e| EngineError::Generation(e.to_string()))?;

        let sanitized = self.policy().sanitize(&raw)?;
        if !sanitized.removed_properties.is_empty() {
            tracing::warn!(
                removed = ?sanitized.removed_properties,
                "neutralized invented properties in generated Cypher"
            );
        }
        tracing::debug!(cypher = %sanitized.cypher, "executing generated Cypher");

        let rows = tokio::time::timeout(
            self.timeout,
            self.store.run(&sanitized.cypher, json!({})),
        )
        .await
        .map_err(|_| EngineError::Execution("graph execution timed out".to_string()))?
        .map_err(|e| EngineError::Execution(e.to_string()))?;

        if rows.is_empty() {
            return Err(EngineError::EmptyResult);
        }

        let shown = &rows[..rows.len().min(ANSWER_ROW_CAP)];
        let answer = serde_json::to_string(shown)
            .map_err(|e| EngineError::Execution(format!("rows not serializable: {e}")))?;

        Ok(EngineAnswer {
            answer,
            metadata: json!({
                "doctypes_routed": doctypes,
                "generated_cypher_raw": raw,
                "sanitized_cypher": sanitized.cypher,
                "invalid_props_removed": sanitized.removed_properties,
                "rows_returned": rows.len(),
            }),
            rows: Some(rows),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::tests::sample_catalog;
    use crate::stores::WriteSummary;
    use crate::types::{AssistantError, Result};
    use serde_json::Value;

    struct StaticChat(String);

    #[async_trait]
    impl ChatModel for StaticChat {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    /// Records executed statements; value-sampling probes get `hint_values`
    /// back, everything else gets `rows`.
    struct CannedGraph {
        rows: Vec<Value>,
        hint_values: Vec<Value>,
        executed: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl GraphStore for CannedGraph {
        async fn run(&self, statement: &str, _parameters: Value) -> Result<Vec<Value>> {
            self.executed.lock().unwrap().push(statement.to_string());
            if statement.contains("WITH DISTINCT") {
                return Ok(self.hint_values.clone());
            }
            Ok(self.rows.clone())
        }
        async fn run_write(&self, _statement: &str, _parameters: Value) -> Result<WriteSummary> {
            Err(AssistantError::GraphError("read-only test store".to_string()))
        }
    }

    fn engine(llm_reply: &str, rows: Vec<Value>) -> (GraphEngine, Arc<CannedGraph>) {
        let store = Arc::new(CannedGraph {
            rows,
            hint_values: Vec::new(),
            executed: std::sync::Mutex::new(Vec::new()),
        });
        let engine = GraphEngine::new(
            Arc::new(StaticChat(llm_reply.to_string())),
            Arc::clone(&store) as Arc<dyn GraphStore>,
            Arc::new(sample_catalog()),
            100,
            Duration::from_secs(5),
        );
        (engine, store)
    }

    #[tokio::test]
    async fn test_rows_become_json_answer() {
        let rows = vec![json!({"s.name": "STU-1", "sc.city": "Pune"})];
        let (engine, store) = engine(
            "MATCH (s:Student)-[:STUDENT_SCHOOL_TO_SCHOOL_NAME]->(sc:School) \
             RETURN s.name, sc.city LIMIT 10",
            rows,
        );
        let out = engine.attempt("which school is each student in?", &[]).await.unwrap();
        assert!(out.answer.contains("Pune"));
        assert_eq!(out.metadata["rows_returned"], 1);
        let executed = store.executed.lock().unwrap();
        assert!(executed.last().unwrap().contains("LIMIT 10"));
    }

    #[tokio::test]
    async fn test_write_cypher_never_executes() {
        let (engine, store) = engine("MATCH (s:Student) DETACH DELETE s", vec![json!({"x": 1})]);
        let err = engine.attempt("remove students", &[]).await.unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
        // only value-sampling probes may have run, never the rejected query
        let executed = store.executed.lock().unwrap();
        assert!(executed.iter().all(|s| !s.contains("DETACH DELETE")));
    }

    /// Captures the user prompt so tests can inspect what the generator saw.
    struct RecordingChat {
        reply: String,
        seen: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatModel for RecordingChat {
        async fn complete(&self, _system: &str, user: &str) -> Result<String> {
            self.seen.lock().unwrap().push(user.to_string());
            Ok(self.reply.clone())
        }
    }

    #[tokio::test]
    async fn test_prompt_carries_observed_values() {
        let store = Arc::new(CannedGraph {
            rows: vec![json!({"n.name": "STU-1"})],
            hint_values: vec![json!("9"), json!("10")],
            executed: std::sync::Mutex::new(Vec::new()),
        });
        let llm = Arc::new(RecordingChat {
            reply: "MATCH (n:Student) WHERE n.grade = '9' RETURN n.name LIMIT 5".to_string(),
            seen: std::sync::Mutex::new(Vec::new()),
        });
        let engine = GraphEngine::new(
            llm.clone(),
            Arc::clone(&store) as Arc<dyn GraphStore>,
            Arc::new(sample_catalog()),
            100,
            Duration::from_secs(5),
        );

        engine.attempt("students in grade 9", &[]).await.unwrap();

        let executed = store.executed.lock().unwrap();
        assert!(executed.iter().any(|s| s.contains("WITH DISTINCT")));
        let seen = llm.seen.lock().unwrap();
        let prompt = seen.last().unwrap();
        assert!(prompt.contains("VALUE HINTS"));
        assert!(prompt.contains(r#"Student.grade: ["9", "10"]"#));
    }

    #[tokio::test]
    async fn test_zero_rows_is_empty_result() {
        let (engine, _) = engine("MATCH (s:Student) RETURN s.name LIMIT 5", vec![]);
        let err = engine.attempt("grade 12 students?", &[]).await.unwrap_err();
        assert!(matches!(err, EngineError::EmptyResult));
    }
}
