//! Text-to-SQL engine.
//!
//! Pipeline: schema summary -> LLM SQL generation -> sanitization ->
//! bounded execution -> LLM answer synthesis. Any stage failure maps to
//! a typed [`EngineError`] so the router can fall back.

use crate::engines::{EngineAnswer, EngineError, QueryEngine};
use crate::llm::{strip_markdown, ChatModel};
use crate::sanitize::sanitize_select;
use crate::schema::SchemaCatalog;
use crate::stores::SqlStore;
use crate::types::{Engine, Turn};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

const SQL_GEN_PROMPT: &str = r#"You are an expert MariaDB SQL generator for an LMS database.

Rules:
- Generate exactly one read-only SELECT statement. Never write INSERT, UPDATE, DELETE, or DDL.
- Use ONLY the tables and columns in the schema summary. Table names contain spaces and must be wrapped in backticks, e.g. `tabCourse Video`.
- For Select fields, filter with the EXACT option strings listed in the schema (match case exactly).
- Use the listed JOINS when combining tables.
- Always include a LIMIT clause.
- If the question cannot be answered from this schema, return null for "sql".

Return ONLY a JSON object:
{"sql": "<the SELECT statement or null>", "reason": "<one short sentence>"}
No prose outside JSON. No backticks."#;

const SYNTHESIS_PROMPT: &str = "You are a helpful assistant for an LMS team. Answer the \
user's question using ONLY the provided SQL result rows. Be concise and factual. If the \
rows do not contain the answer, say so plainly. Do not mention SQL or databases.";

#[derive(Debug, Deserialize)]
struct SqlReply {
    #[serde(default)]
    sql: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// Engine that answers questions by generating and executing SQL.
pub struct SqlEngine {
    llm: Arc<dyn ChatModel>,
    store: Arc<dyn SqlStore>,
    catalog: Arc<SchemaCatalog>,
    timeout: Duration,
    row_limit: u64,
}

impl SqlEngine {
    pub fn new(
        llm: Arc<dyn ChatModel>,
        store: Arc<dyn SqlStore>,
        catalog: Arc<SchemaCatalog>,
        timeout: Duration,
        row_limit: u64,
    ) -> Self {
        Self {
            llm,
            store,
            catalog,
            timeout,
            row_limit,
        }
    }

    fn allowed_tables(&self) -> BTreeSet<String> {
        self.catalog
            .allowlisted_tables()
            .into_iter()
            .map(|t| t.to_lowercase())
            .collect()
    }

    async fn generate_sql(&self, query: &str) -> Result<(String, String), EngineError> {
        let user_msg = format!(
            "SCHEMA:\n{}\n\nQUESTION:\n{}",
            self.catalog.sql_summary(),
            query
        );
        let reply = self
            .llm
            .complete(SQL_GEN_PROMPT, &user_msg)
            .await
            .map_err(|e| EngineError::Generation(e.to_string()))?;

        let parsed: SqlReply = serde_json::from_str(strip_markdown(&reply).trim())
            .map_err(|e| EngineError::Generation(format!("unparseable SQL reply: {e}")))?;

        match parsed.sql {
            Some(sql) if !sql.trim().is_empty() => {
                Ok((sql, parsed.reason.unwrap_or_default()))
            }
            _ => Err(EngineError::Generation(
                "model declined to generate SQL for this question".to_string(),
            )),
        }
    }

    async fn synthesize(
        &self,
        query: &str,
        rows: &[serde_json::Value],
        history: &[Turn],
    ) -> Result<String, EngineError> {
        let history_block = if history.is_empty() {
            String::new()
        } else {
            let turns = history
                .iter()
                .map(|t| format!("user: {}\nassistant: {}", t.query, t.answer))
                .collect::<Vec<_>>()
                .join("\n");
            format!("CHAT HISTORY:\n{turns}\n\n")
        };
        let rows_json = serde_json::to_string_pretty(rows)
            .map_err(|e| EngineError::Execution(format!("rows not serializable: {e}")))?;
        let user_msg = format!("{history_block}QUESTION:\n{query}\n\nSQL RESULT ROWS:\n{rows_json}");

        self.llm
            .complete(SYNTHESIS_PROMPT, &user_msg)
            .await
            .map_err(|e| EngineError::Execution(format!("answer synthesis failed: {e}")))
    }
}

#[async_trait]
impl QueryEngine for SqlEngine {
    fn engine(&self) -> Engine {
        Engine::Sql
    }

    async fn attempt(
        &self,
        query: &str,
        history: &[Turn],
    ) -> Result<EngineAnswer, EngineError> {
        let (raw_sql, reason) = self.generate_sql(query).await?;
        let sql = sanitize_select(&raw_sql, &self.allowed_tables(), self.row_limit)?;
        tracing::debug!(%sql, "executing generated SQL");

        let rows = tokio::time::timeout(self.timeout, self.store.query(&sql))
            .await
            .map_err(|_| EngineError::Execution("SQL execution timed out".to_string()))?
            .map_err(|e| EngineError::Execution(e.to_string()))?;

        if rows.is_empty() {
            return Err(EngineError::EmptyResult);
        }

        let answer = self.synthesize(query, &rows, history).await?;
        Ok(EngineAnswer {
            answer,
            metadata: json!({
                "sql": sql,
                "reason": reason,
                "rows_returned": rows.len(),
            }),
            rows: Some(rows),
        })
    }
}
