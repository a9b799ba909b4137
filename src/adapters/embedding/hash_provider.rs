//! Deterministic hash-projection embedding provider.
//!
//! Maps text to a unit vector derived from repeated SHA-256 digests. No
//! semantic signal, but stable across runs and platforms, which is exactly
//! what engine/cache/search tests need. Also serves as the offline
//! stand-in when model artifacts cannot be loaded.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::domain::error::Result;
use crate::domain::ports::EmbeddingProvider;
use crate::domain::types::EmbeddingProfile;

/// Deterministic, dependency-free provider.
pub struct HashEmbeddingProvider {
    model_id: String,
    model_version: String,
    dimensions: usize,
}

impl HashEmbeddingProvider {
    /// Provider with an explicit identity.
    pub fn new(model_id: impl Into<String>, model_version: impl Into<String>, dimensions: usize) -> Self {
        Self {
            model_id: model_id.into(),
            model_version: model_version.into(),
            dimensions: dimensions.max(1),
        }
    }

    /// Provider mirroring a profile's identity and dimensionality.
    pub fn for_profile(profile: &EmbeddingProfile) -> Self {
        Self::new(profile.model.clone(), profile.model_version.clone(), profile.dimensions)
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.dimensions);
        let mut counter = 0u32;
        while out.len() < self.dimensions {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(counter.to_le_bytes());
            let digest = hasher.finalize();
            for pair in digest.chunks_exact(2) {
                if out.len() == self.dimensions {
                    break;
                }
                let v = u16::from_le_bytes([pair[0], pair[1]]) as f32;
                out.push(v / u16::MAX as f32 - 0.5);
            }
            counter += 1;
        }

        let norm = out.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut out {
                *v /= norm;
            }
        }
        out
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn model_version(&self) -> &str {
        &self.model_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deterministic_and_unit_norm() {
        let provider = HashEmbeddingProvider::new("test", "1", 64);
        let a = provider.embed_batch(&["hello".to_string()]).await.unwrap();
        let b = provider.embed_batch(&["hello".to_string()]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);

        let norm: f32 = a[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn different_texts_differ() {
        let provider = HashEmbeddingProvider::new("test", "1", 32);
        let out = provider
            .embed_batch(&["alpha".to_string(), "beta".to_string()])
            .await
            .unwrap();
        assert_ne!(out[0], out[1]);
    }
}
