//! Embedding providers.

mod openai;

pub use openai::OpenAiEmbedder;

use crate::types::Result;
use async_trait::async_trait;

/// Embedding model seam.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts in one request.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Output dimensionality of this model.
    fn dimensions(&self) -> usize;
}
