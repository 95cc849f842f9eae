//! Neo4j client over the HTTP transaction API.
//!
//! Uses the single-shot `tx/commit` endpoint so no driver dependency or
//! session state is needed. Statements run with `includeStats` so writes
//! can report created counts.

use crate::stores::{GraphStore, WriteSummary};
use crate::types::{AssistantError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct TxResult {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<TxRow>,
    stats: Option<TxStats>,
}

#[derive(Debug, Deserialize)]
struct TxRow {
    #[serde(default)]
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TxStats {
    #[serde(default)]
    nodes_created: u64,
    #[serde(default)]
    relationships_created: u64,
}

#[derive(Debug, Deserialize)]
struct TxError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Graph store backed by a Neo4j server.
pub struct Neo4jHttp {
    uri: String,
    user: String,
    password: String,
    database: String,
    client: Client,
}

impl Neo4jHttp {
    pub fn new(
        uri: String,
        user: String,
        password: String,
        database: String,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AssistantError::GraphError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            uri: uri.trim_end_matches('/').to_string(),
            user,
            password,
            database,
            client,
        })
    }

    async fn commit(&self, statement: &str, parameters: Value) -> Result<TxResult> {
        let url = format!("{}/db/{}/tx/commit", self.uri, self.database);
        let body = json!({
            "statements": [{
                "statement": statement,
                "parameters": parameters,
                "includeStats": true,
            }]
        });

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .await
            .map_err(|e| AssistantError::GraphError(format!("graph request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(AssistantError::GraphError(format!(
                "graph API error ({status}): {text}"
            )));
        }

        let mut parsed: TxResponse = response
            .json()
            .await
            .map_err(|e| AssistantError::GraphError(format!("failed to parse graph response: {e}")))?;

        if let Some(err) = parsed.errors.first() {
            return Err(AssistantError::GraphError(format!(
                "{}: {}",
                err.code, err.message
            )));
        }
        if parsed.results.is_empty() {
            return Err(AssistantError::GraphError(
                "graph response carried no result".to_string(),
            ));
        }
        Ok(parsed.results.remove(0))
    }
}

fn rows_to_values(result: TxResult) -> Vec<Value> {
    let single_column = result.columns.len() == 1;
    result
        .data
        .into_iter()
        .map(|entry| {
            if single_column {
                entry.row.into_iter().next().unwrap_or(Value::Null)
            } else {
                let mut obj = serde_json::Map::new();
                for (col, value) in result.columns.iter().zip(entry.row) {
                    obj.insert(col.clone(), value);
                }
                Value::Object(obj)
            }
        })
        .collect()
}

#[async_trait]
impl GraphStore for Neo4jHttp {
    async fn run(&self, statement: &str, parameters: Value) -> Result<Vec<Value>> {
        let result = self.commit(statement, parameters).await?;
        Ok(rows_to_values(result))
    }

    async fn run_write(&self, statement: &str, parameters: Value) -> Result<WriteSummary> {
        let result = self.commit(statement, parameters).await?;
        let stats = result.stats.unwrap_or(TxStats {
            nodes_created: 0,
            relationships_created: 0,
        });
        Ok(WriteSummary {
            nodes_created: stats.nodes_created,
            relationships_created: stats.relationships_created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_column_rows_become_objects() {
        let result = TxResult {
            columns: vec!["name".to_string(), "grade".to_string()],
            data: vec![TxRow {
                row: vec![json!("Ada"), json!("9")],
            }],
            stats: None,
        };
        let rows = rows_to_values(result);
        assert_eq!(rows, vec![json!({"name": "Ada", "grade": "9"})]);
    }

    #[test]
    fn test_single_column_rows_stay_bare() {
        let result = TxResult {
            columns: vec!["count(n)".to_string()],
            data: vec![TxRow { row: vec![json!(42)] }],
            stats: None,
        };
        assert_eq!(rows_to_values(result), vec![json!(42)]);
    }

    #[test]
    fn test_error_payload_parses() {
        let raw = r#"{"results": [], "errors": [{"code": "Neo.ClientError.Statement.SyntaxError", "message": "bad"}]}"#;
        let parsed: TxResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.errors.len(), 1);
        assert!(parsed.errors[0].code.contains("SyntaxError"));
    }
}
