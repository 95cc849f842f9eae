//! Conversational answering engine for LMS data.
//!
//! Natural-language questions are routed through a chain of retrieval
//! engines (text-to-SQL, graph Cypher, vector similarity) with
//! sequential fallback and per-user conversation history. A declarative
//! schema catalog is the shared contract: it scopes what the SQL engine
//! may touch, what the graph holds, and what gets embedded.
//!
//! # Example
//!
//! ```no_run
//! use lms_assistant::config::AssistantConfig;
//! use lms_assistant::schema::SchemaCatalog;
//!
//! let config = AssistantConfig::from_file("site_config.json").unwrap();
//! let catalog = SchemaCatalog::load(&config.schema_path).unwrap();
//! assert!(!catalog.allowlisted_tables().is_empty());
//! ```

pub mod config;
pub mod embeddings;
pub mod engines;
pub mod history;
pub mod indexer;
pub mod llm;
pub mod migrate;
pub mod render;
pub mod router;
pub mod sanitize;
pub mod schema;
pub mod server;
pub mod stores;
pub mod types;

pub use config::AssistantConfig;
pub use history::HistoryStore;
pub use router::Router;
pub use schema::SchemaCatalog;
pub use types::{AnswerResult, AssistantError, Engine, Result, Turn};
