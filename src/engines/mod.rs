//! Query engines.
//!
//! Each engine takes a natural-language question and either produces a
//! final answer or a typed failure the router can act on. Engines never
//! panic on bad model output; everything maps into [`EngineError`].

mod graph;
mod sql;
mod vector;

pub use graph::GraphEngine;
pub use sql::SqlEngine;
pub use vector::VectorEngine;

use crate::types::{Engine, Turn};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Why an engine attempt did not produce an answer.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The model failed to produce a usable statement.
    #[error("generation failed: {0}")]
    Generation(String),

    /// The generated statement was rejected by a safety check.
    #[error("statement rejected: {0}")]
    Forbidden(String),

    /// The backend errored or timed out while executing.
    #[error("execution failed: {0}")]
    Execution(String),

    /// The statement ran cleanly but matched nothing.
    #[error("no results")]
    EmptyResult,

    /// The engine is not usable with the current configuration.
    #[error("engine unavailable: {0}")]
    Config(String),
}

/// A successful engine attempt.
#[derive(Debug, Clone)]
pub struct EngineAnswer {
    /// Natural-language answer text.
    pub answer: String,
    /// Raw result rows, when the engine has them.
    pub rows: Option<Vec<Value>>,
    /// Engine-specific diagnostics (generated statement, routing, counts).
    pub metadata: Value,
}

/// A single answering strategy the router can try.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Which engine this is, for logging and result metadata.
    fn engine(&self) -> Engine;

    /// Attempt to answer the question, with prior conversation turns
    /// available for context.
    async fn attempt(
        &self,
        query: &str,
        history: &[Turn],
    ) -> std::result::Result<EngineAnswer, EngineError>;
}
