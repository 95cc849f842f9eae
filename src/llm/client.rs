//! Chat completion client.

use crate::config::AssistantConfig;
use crate::types::{AssistantError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

/// Chat model seam. Engines depend on this trait so tests can script
/// generations without the network.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one system+user exchange and return the raw text content.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// Strip markdown code fences from an LLM response.
///
/// Handles ```json ... ```, ```JSON ... ``` and bare ``` ... ``` blocks.
pub fn strip_markdown(text: &str) -> String {
    let text = text.trim();
    if text.starts_with("```") {
        let start = text.find('\n').map(|i| i + 1).unwrap_or(0);
        let end = text.rfind("```").unwrap_or(text.len());
        if end > start {
            return text[start..end].trim().to_string();
        }
    }
    text.to_string()
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// OpenAI-compatible chat completions client.
pub struct OpenAiChat {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
}

impl OpenAiChat {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `api_key` - API key
    /// * `model` - model name (e.g. "gpt-4o-mini")
    /// * `base_url` - API base (e.g. "https://api.openai.com/v1")
    /// * `timeout` - per-request bound
    pub fn new(
        api_key: String,
        model: String,
        base_url: String,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AssistantError::LlmError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            api_key,
            model,
            base_url,
            client,
        })
    }

    /// Build from site config with the given model.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when the API key is missing.
    pub fn from_config(config: &AssistantConfig, model: &str) -> Result<Self> {
        if config.openai_api_key.is_empty() {
            return Err(AssistantError::ConfigError(
                "openai_api_key not set in site config or OPENAI_API_KEY".to_string(),
            ));
        }
        Self::new(
            config.openai_api_key.clone(),
            model.to_string(),
            config.openai_base_url.clone(),
            config.request_timeout(),
        )
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": user}
                ],
                "temperature": 0.0
            }))
            .send()
            .await
            .map_err(|e| AssistantError::LlmError(format!("chat API request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AssistantError::LlmError(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(AssistantError::LlmError(format!(
                "chat API error {status}: {body}"
            )));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| AssistantError::LlmError(format!("failed to parse chat response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AssistantError::LlmError("no choices in chat response".to_string()))?
            .message
            .content;

        Ok(strip_markdown(&content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_markdown_json_fence() {
        let fenced = "```json\n{\"sql\": null}\n```";
        assert_eq!(strip_markdown(fenced), "{\"sql\": null}");
    }

    #[test]
    fn test_strip_markdown_plain_fence() {
        let fenced = "```\nMATCH (n) RETURN n\n```";
        assert_eq!(strip_markdown(fenced), "MATCH (n) RETURN n");
    }

    #[test]
    fn test_strip_markdown_no_fence() {
        assert_eq!(strip_markdown("  hello  "), "hello");
    }
}
