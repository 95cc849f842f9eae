//! History-aware query refinement.

use crate::llm::ChatModel;
use crate::types::Turn;

const REFINER_PROMPT: &str = "Given a chat history and a follow-up question, rewrite the \
follow-up question to be a standalone question that a search engine can understand, \
incorporating the necessary context from the history.\n\n\
Return ONLY the refined, standalone question. Do not answer the question.";

/// Rewrite a follow-up question (e.g. "summarize the first one") into a
/// standalone question using prior turns.
///
/// Returns the query unchanged when history is empty or the LLM call
/// fails; refinement is best effort, never a failure path.
pub async fn refine_with_history(llm: &dyn ChatModel, query: &str, history: &[Turn]) -> String {
    if history.is_empty() {
        return query.to_string();
    }

    let history_str = history
        .iter()
        .map(|t| format!("user: {}\nassistant: {}", t.query, t.answer))
        .collect::<Vec<_>>()
        .join("\n");

    let user_prompt = format!(
        "CHAT HISTORY:\n{history_str}\n\nFOLLOW-UP QUESTION:\n{query}\n\nREFINED STANDALONE QUESTION:"
    );

    match llm.complete(REFINER_PROMPT, &user_prompt).await {
        Ok(refined) if !refined.trim().is_empty() => {
            let refined = refined.trim().to_string();
            tracing::debug!(%refined, "refined query for search");
            refined
        }
        Ok(_) => query.to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "query refinement failed; using original query");
            query.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssistantError, Result};
    use async_trait::async_trait;

    struct ScriptedChat(Option<String>);

    #[async_trait]
    impl ChatModel for ScriptedChat {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            self.0
                .clone()
                .ok_or_else(|| AssistantError::LlmError("down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_empty_history_short_circuits() {
        let llm = ScriptedChat(None); // would fail if called
        let out = refine_with_history(&llm, "summarize the first one", &[]).await;
        assert_eq!(out, "summarize the first one");
    }

    #[tokio::test]
    async fn test_refines_with_history() {
        let llm = ScriptedChat(Some(
            "Summarize the video 'Needs First, Wants Later'".to_string(),
        ));
        let history = vec![Turn::new("list finlit videos", "1. Needs First, Wants Later")];
        let out = refine_with_history(&llm, "summarize the first one", &history).await;
        assert_eq!(out, "Summarize the video 'Needs First, Wants Later'");
    }

    #[tokio::test]
    async fn test_llm_failure_returns_original() {
        let llm = ScriptedChat(None);
        let history = vec![Turn::new("q", "a")];
        let out = refine_with_history(&llm, "and the second?", &history).await;
        assert_eq!(out, "and the second?");
    }
}
