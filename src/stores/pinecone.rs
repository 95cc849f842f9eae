//! Pinecone-style vector index over REST.
//!
//! The index stores compact metadata only (source doctype and record
//! ids); answer content is always re-fetched from the relational store.

use crate::stores::{VectorIndex, VectorMatch, VectorRecord};
use crate::types::{AssistantError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<MatchEntry>,
}

#[derive(Debug, Deserialize)]
struct MatchEntry {
    id: String,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct UpsertResponse {
    #[serde(default, rename = "upsertedCount")]
    upserted_count: usize,
}

/// Vector index client for a Pinecone-compatible REST endpoint.
pub struct PineconeIndex {
    host: String,
    api_key: String,
    client: Client,
}

impl PineconeIndex {
    pub fn new(host: String, api_key: String, timeout: std::time::Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            AssistantError::VectorError(format!("failed to build HTTP client: {e}"))
        })?;
        let host = if host.starts_with("http") {
            host
        } else {
            format!("https://{host}")
        };
        Ok(Self {
            host: host.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}{path}", self.host))
            .header("Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AssistantError::VectorError(format!("vector request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(AssistantError::VectorError(format!(
                "vector API error ({status}): {text}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AssistantError::VectorError(format!("failed to parse vector response: {e}")))
    }
}

fn parse_match(entry: MatchEntry) -> VectorMatch {
    let metadata = entry.metadata.unwrap_or(Value::Null);
    let doctype = metadata
        .get("doctype")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let record_ids = metadata
        .get("record_ids")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();
    VectorMatch {
        id: entry.id,
        score: entry.score,
        doctype,
        record_ids,
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: &str,
    ) -> Result<Vec<VectorMatch>> {
        let body = json!({
            "vector": vector,
            "topK": top_k,
            "namespace": namespace,
            "includeMetadata": true,
        });
        let raw = self.post("/query", body).await?;
        let parsed: QueryResponse = serde_json::from_value(raw).map_err(|e| {
            AssistantError::VectorError(format!("unexpected query response shape: {e}"))
        })?;
        Ok(parsed.matches.into_iter().map(parse_match).collect())
    }

    async fn upsert(&self, namespace: &str, vectors: Vec<VectorRecord>) -> Result<usize> {
        if vectors.is_empty() {
            return Ok(0);
        }
        let payload: Vec<Value> = vectors
            .into_iter()
            .map(|v| {
                json!({
                    "id": v.id,
                    "values": v.values,
                    "metadata": v.metadata,
                })
            })
            .collect();
        let body = json!({ "vectors": payload, "namespace": namespace });
        let raw = self.post("/vectors/upsert", body).await?;
        let parsed: UpsertResponse = serde_json::from_value(raw).map_err(|e| {
            AssistantError::VectorError(format!("unexpected upsert response shape: {e}"))
        })?;
        Ok(parsed.upserted_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_metadata_extraction() {
        let entry: MatchEntry = serde_json::from_value(json!({
            "id": "Course Video::CV-001",
            "score": 0.83,
            "metadata": {"doctype": "Course Video", "record_ids": ["CV-001", "CV-002"]}
        }))
        .unwrap();
        let m = parse_match(entry);
        assert_eq!(m.doctype.as_deref(), Some("Course Video"));
        assert_eq!(m.record_ids, vec!["CV-001", "CV-002"]);
        assert!(m.score > 0.8);
    }

    #[test]
    fn test_missing_metadata_is_tolerated() {
        let entry: MatchEntry =
            serde_json::from_value(json!({"id": "x", "score": 0.1})).unwrap();
        let m = parse_match(entry);
        assert!(m.doctype.is_none());
        assert!(m.record_ids.is_empty());
    }
}
