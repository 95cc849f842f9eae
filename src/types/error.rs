//! Error taxonomy for the assistant.

use thiserror::Error;

/// Top-level error type.
///
/// Engine-internal failures that trigger router fallback are modelled
/// separately as `engines::EngineError`; this type covers everything that
/// crosses a module boundary.
#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    #[error("SQL store error: {0}")]
    SqlError(String),

    #[error("Graph store error: {0}")]
    GraphError(String),

    #[error("Vector index error: {0}")]
    VectorError(String),

    #[error("Schema error: {0}")]
    SchemaError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AssistantError>;
