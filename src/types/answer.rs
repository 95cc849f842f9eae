//! Answer and conversation types.

use serde::{Deserialize, Serialize};

/// Retrieval backend tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// Text-to-SQL over the relational store
    Sql,
    /// Cypher generation over the property graph
    Graph,
    /// Vector similarity retrieval (the universal fallback)
    Vector,
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Engine::Sql => write!(f, "sql"),
            Engine::Graph => write!(f, "graph"),
            Engine::Vector => write!(f, "vector"),
        }
    }
}

/// One conversation exchange, stored in the per-user history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    /// What the user asked
    pub query: String,

    /// What the assistant answered
    pub answer: String,
}

impl Turn {
    pub fn new(query: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            answer: answer.into(),
        }
    }
}

/// Final response for one routed question.
///
/// `engine` names the backend that actually produced the answer, which is
/// not necessarily the first one attempted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResult {
    /// Original question
    pub question: String,

    /// Synthesized answer (or a human-readable failure message)
    pub answer: String,

    /// Whether any engine produced an answer
    pub success: bool,

    /// Backend that answered
    pub engine: Engine,

    /// End-to-end latency in milliseconds
    pub execution_time_ms: u64,

    /// Engine-specific details (sanitized queries, routed doctypes,
    /// sources, fallback flags)
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Engine::Sql).unwrap(), "\"sql\"");
        assert_eq!(serde_json::to_string(&Engine::Vector).unwrap(), "\"vector\"");
        assert_eq!(Engine::Graph.to_string(), "graph");
    }

    #[test]
    fn test_answer_result_roundtrip() {
        let result = AnswerResult {
            question: "list videos".to_string(),
            answer: "Two videos found".to_string(),
            success: true,
            engine: Engine::Sql,
            execution_time_ms: 42,
            metadata: serde_json::json!({"fallback_used": false}),
        };

        let json = serde_json::to_string(&result).unwrap();
        let parsed: AnswerResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.engine, Engine::Sql);
        assert!(parsed.success);
    }
}
