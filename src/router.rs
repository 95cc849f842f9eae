//! Sequential fallback router.
//!
//! Engines are tried in a fixed order; the first success wins. The
//! vector engine sits last as the safety net, so a total failure means
//! even retrieval could not run. Only successful answers enter the
//! per-user history.

use crate::config::AssistantConfig;
use crate::engines::QueryEngine;
use crate::history::HistoryStore;
use crate::types::{AnswerResult, Engine, Turn};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

const TOTAL_FAILURE_ANSWER: &str = "Sorry, I could not answer that right now.";

/// Routes each question through the configured engine chain.
pub struct Router {
    engines: Vec<Arc<dyn QueryEngine>>,
    history: Arc<HistoryStore>,
}

impl Router {
    /// `engines` in attempt order; the last entry is the safety net.
    pub fn new(engines: Vec<Arc<dyn QueryEngine>>, history: Arc<HistoryStore>) -> Self {
        Self { engines, history }
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Answer one question for one user.
    ///
    /// Never returns an error: total failure comes back as a structured
    /// result with `success: false` and a human-readable message.
    pub async fn route(&self, query: &str, user_id: &str) -> AnswerResult {
        let started = Instant::now();
        let history = self.history.get(user_id);
        let mut last_error: Option<String> = None;

        for (i, engine) in self.engines.iter().enumerate() {
            let attempt_started = Instant::now();
            match engine.attempt(query, &history).await {
                Ok(success) => {
                    tracing::info!(
                        engine = %engine.engine(),
                        latency_ms = attempt_started.elapsed().as_millis() as u64,
                        fallback_used = i > 0,
                        "engine answered"
                    );
                    let mut metadata = success.metadata;
                    if let Some(obj) = metadata.as_object_mut() {
                        obj.insert("primary_engine".to_string(), json!(self.engines[0].engine()));
                        obj.insert("fallback_used".to_string(), json!(i > 0));
                    }
                    self.history
                        .append(user_id, Turn::new(query, success.answer.clone()));
                    return AnswerResult {
                        question: query.to_string(),
                        answer: success.answer,
                        success: true,
                        engine: engine.engine(),
                        execution_time_ms: started.elapsed().as_millis() as u64,
                        metadata,
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        engine = %engine.engine(),
                        latency_ms = attempt_started.elapsed().as_millis() as u64,
                        error = %e,
                        "engine attempt failed; falling back"
                    );
                    last_error = Some(format!("{}: {e}", engine.engine()));
                }
            }
        }

        // Total failure: no history entry, structured failure result.
        AnswerResult {
            question: query.to_string(),
            answer: TOTAL_FAILURE_ANSWER.to_string(),
            success: false,
            engine: Engine::Vector,
            execution_time_ms: started.elapsed().as_millis() as u64,
            metadata: json!({
                "error": last_error.unwrap_or_else(|| "no engines configured".to_string()),
            }),
        }
    }
}

/// Attempt order from configuration: the graph engine leads when the
/// graph store is enabled and configured, otherwise SQL; the vector
/// engine is always the terminal safety net. `graph` is optional so
/// callers can skip building it entirely when `graph_ready()` is false.
pub fn engine_chain(
    config: &AssistantConfig,
    sql: Arc<dyn QueryEngine>,
    graph: Option<Arc<dyn QueryEngine>>,
    vector: Arc<dyn QueryEngine>,
) -> Vec<Arc<dyn QueryEngine>> {
    let primary = match graph {
        Some(graph) if config.graph_ready() => graph,
        _ => sql,
    };
    vec![primary, vector]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::{EngineAnswer, EngineError};
    use crate::types::Turn;
    use async_trait::async_trait;

    struct StubEngine(Engine);

    #[async_trait]
    impl QueryEngine for StubEngine {
        fn engine(&self) -> Engine {
            self.0
        }
        async fn attempt(
            &self,
            _query: &str,
            _history: &[Turn],
        ) -> Result<EngineAnswer, EngineError> {
            Err(EngineError::EmptyResult)
        }
    }

    fn stub(engine: Engine) -> Arc<dyn QueryEngine> {
        Arc::new(StubEngine(engine))
    }

    fn order(chain: &[Arc<dyn QueryEngine>]) -> Vec<Engine> {
        chain.iter().map(|e| e.engine()).collect()
    }

    #[test]
    fn test_chain_prefers_graph_when_configured() {
        let mut config = AssistantConfig::default();
        config.neo4j_uri = "http://localhost:7474".to_string();
        let chain = engine_chain(
            &config,
            stub(Engine::Sql),
            Some(stub(Engine::Graph)),
            stub(Engine::Vector),
        );
        assert_eq!(order(&chain), vec![Engine::Graph, Engine::Vector]);
    }

    #[test]
    fn test_chain_skips_graph_when_disabled() {
        let mut config = AssistantConfig::default();
        config.neo4j_uri = "http://localhost:7474".to_string();
        config.enable_graph = false;
        // even a built graph engine is ignored when the flag is off
        let chain = engine_chain(
            &config,
            stub(Engine::Sql),
            Some(stub(Engine::Graph)),
            stub(Engine::Vector),
        );
        assert_eq!(order(&chain), vec![Engine::Sql, Engine::Vector]);
    }

    #[test]
    fn test_chain_without_graph_store_tries_sql_first() {
        let config = AssistantConfig::default(); // no neo4j_uri
        let chain = engine_chain(&config, stub(Engine::Sql), None, stub(Engine::Vector));
        assert_eq!(order(&chain), vec![Engine::Sql, Engine::Vector]);
    }
}
