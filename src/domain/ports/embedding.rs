//! Embedding provider port.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::error::Result;

/// Contract for adapters that transform text into dense vectors.
///
/// Implementations own their model lifecycle. Inference is not assumed to
/// be re-entrant; the engine serializes calls through a work queue, so
/// `embed_batch` may take `&self` and lock internally.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Output vector dimensionality.
    fn dimensions(&self) -> usize;

    /// Model identifier, part of the embedding cache key.
    fn model_id(&self) -> &str;

    /// Model version tag, part of the embedding cache key.
    fn model_version(&self) -> &str;

    /// Health check for the provider.
    async fn health_check(&self) -> Result<()> {
        self.embed_batch(&["health check".to_string()]).await?;
        Ok(())
    }
}

/// Shared provider handle.
pub type SharedEmbeddingProvider = Arc<dyn EmbeddingProvider>;
