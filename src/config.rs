//! Site configuration.
//!
//! Loads a JSON site config (the same shape the deployment keeps in
//! `site_config.json`), merged over built-in defaults, with environment
//! variables as a fallback for secrets. All knobs the engines and the
//! migrator consume live here.

use crate::types::{AssistantError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_sql_model() -> String {
    "gpt-4o".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_neo4j_database() -> String {
    "neo4j".to_string()
}

fn default_sqlite_path() -> String {
    "lms.db".to_string()
}

fn default_schema_path() -> String {
    "lms_schema.json".to_string()
}

fn default_true() -> bool {
    true
}

fn default_top_k() -> usize {
    8
}

fn default_route_top_n() -> usize {
    4
}

fn default_max_context_chars() -> usize {
    12_000
}

fn default_history_max_turns() -> usize {
    10
}

fn default_history_ttl_secs() -> u64 {
    1800
}

fn default_batch_size() -> usize {
    100
}

fn default_max_errors_per_type() -> usize {
    25
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_sql_row_limit() -> u64 {
    20
}

fn default_graph_row_limit() -> u64 {
    100
}

/// Assistant configuration, deserialized from the site config JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    // API keys
    #[serde(default)]
    pub openai_api_key: String,

    /// Shared token for the REST surface; `None` disables the check
    #[serde(default)]
    pub api_token: Option<String>,

    // Models
    #[serde(default = "default_chat_model", alias = "primary_llm_model")]
    pub chat_model: String,

    /// Model used for SQL/Cypher generation (defaults stronger than chat)
    #[serde(default = "default_sql_model")]
    pub sql_model: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    // Vector index
    #[serde(default, alias = "pinecone_api_key")]
    pub vector_api_key: String,

    /// Index endpoint, e.g. `https://lms-byo-abc123.svc.pinecone.io`
    #[serde(default, alias = "pinecone_host")]
    pub vector_index_host: String,

    // Graph store (HTTP transaction endpoint)
    #[serde(default)]
    pub neo4j_uri: String,

    #[serde(default)]
    pub neo4j_user: String,

    #[serde(default)]
    pub neo4j_password: String,

    #[serde(default = "default_neo4j_database")]
    pub neo4j_database: String,

    // Relational store
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,

    /// Declarative schema file consumed by all three engines
    #[serde(default = "default_schema_path")]
    pub schema_path: String,

    // Feature flags
    #[serde(default = "default_true", alias = "enable_neo4j")]
    pub enable_graph: bool,

    // Retrieval knobs
    #[serde(default = "default_top_k", alias = "vector_search_k")]
    pub top_k: usize,

    #[serde(default = "default_route_top_n")]
    pub route_top_n: usize,

    #[serde(default = "default_max_context_chars", alias = "max_context_length")]
    pub max_context_chars: usize,

    #[serde(default = "default_sql_row_limit")]
    pub sql_row_limit: u64,

    #[serde(default = "default_graph_row_limit")]
    pub graph_row_limit: u64,

    // Conversation history
    #[serde(default = "default_history_max_turns")]
    pub history_max_turns: usize,

    #[serde(default = "default_history_ttl_secs")]
    pub history_ttl_secs: u64,

    // Migration / indexing
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_max_errors_per_type")]
    pub max_errors_per_type: usize,

    // Network
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).expect("defaults are total")
    }
}

impl AssistantConfig {
    /// Load from a site config file, `~` expanded.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing or not valid JSON.
    pub fn from_file(path: &str) -> Result<Self> {
        let expanded = shellexpand::tilde(path).into_owned();
        let raw = std::fs::read_to_string(Path::new(&expanded))?;
        let mut cfg: AssistantConfig = serde_json::from_str(&raw)
            .map_err(|e| AssistantError::ConfigError(format!("invalid site config {path}: {e}")))?;
        cfg.merge_env();
        Ok(cfg)
    }

    /// Build from environment only (no site config on disk).
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.merge_env();
        cfg
    }

    /// Fill empty secrets from the environment.
    fn merge_env(&mut self) {
        if self.openai_api_key.is_empty() {
            if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                self.openai_api_key = key;
            }
        }
        if self.vector_api_key.is_empty() {
            if let Ok(key) = std::env::var("PINECONE_API_KEY") {
                self.vector_api_key = key;
            }
        }
        if self.neo4j_password.is_empty() {
            if let Ok(pwd) = std::env::var("NEO4J_PASSWORD") {
                self.neo4j_password = pwd;
            }
        }
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }

    pub fn history_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.history_ttl_secs)
    }

    /// Whether the graph engine has enough configuration to run.
    pub fn graph_ready(&self) -> bool {
        self.enable_graph && !self.neo4j_uri.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AssistantConfig::default();
        assert_eq!(cfg.chat_model, "gpt-4o-mini");
        assert_eq!(cfg.top_k, 8);
        assert_eq!(cfg.history_max_turns, 10);
        assert!(cfg.enable_graph);
        assert!(!cfg.graph_ready()); // no URI configured
    }

    #[test]
    fn test_from_file_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site_config.json");
        std::fs::write(
            &path,
            r#"{"openai_api_key": "k", "neo4j_uri": "http://localhost:7474"}"#,
        )
        .unwrap();

        let cfg = AssistantConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.openai_api_key, "k");
        assert_eq!(cfg.chat_model, "gpt-4o-mini"); // default survives
        assert!(cfg.graph_ready());
    }

    #[test]
    fn test_site_config_aliases() {
        let cfg: AssistantConfig = serde_json::from_str(
            r#"{
                "primary_llm_model": "gpt-4o",
                "enable_neo4j": false,
                "vector_search_k": 5,
                "pinecone_api_key": "pk"
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.chat_model, "gpt-4o");
        assert!(!cfg.enable_graph);
        assert_eq!(cfg.top_k, 5);
        assert_eq!(cfg.vector_api_key, "pk");
    }
}
