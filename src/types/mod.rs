//! Shared types for the answering pipeline.

mod answer;
mod error;

pub use answer::{AnswerResult, Engine, Turn};
pub use error::{AssistantError, Result};
