//! OpenAI embedding API client.

use crate::config::AssistantConfig;
use crate::embeddings::EmbeddingProvider;
use crate::types::{AssistantError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: serde_json::Value, // String or Vec<String>
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// OpenAI embedding provider.
pub struct OpenAiEmbedder {
    api_key: String,
    model: String,
    base_url: String,
    dimensions: usize,
    client: Client,
}

impl OpenAiEmbedder {
    /// Create a new embedder. Dimensions are inferred from the model name.
    pub fn new(
        api_key: String,
        model: String,
        base_url: String,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let dimensions = match model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        };
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            AssistantError::EmbeddingError(format!("failed to build HTTP client: {e}"))
        })?;
        Ok(Self {
            api_key,
            model,
            base_url,
            dimensions,
            client,
        })
    }

    pub fn from_config(config: &AssistantConfig) -> Result<Self> {
        if config.openai_api_key.is_empty() {
            return Err(AssistantError::ConfigError(
                "openai_api_key not set in site config or OPENAI_API_KEY".to_string(),
            ));
        }
        Self::new(
            config.openai_api_key.clone(),
            config.embedding_model.clone(),
            config.openai_base_url.clone(),
            config.request_timeout(),
        )
    }

    async fn call_api(&self, input: serde_json::Value) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: self.model.clone(),
            input,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                AssistantError::EmbeddingError(format!("embedding API request failed: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(AssistantError::EmbeddingError(format!(
                "embedding API error ({status}): {error_text}"
            )));
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            AssistantError::EmbeddingError(format!("failed to parse embedding response: {e}"))
        })?;

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.call_api(serde_json::json!(text)).await?;
        embeddings.into_iter().next().ok_or_else(|| {
            AssistantError::EmbeddingError("no embedding returned".to_string())
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.call_api(serde_json::json!(texts)).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
