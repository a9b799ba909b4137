//! fastembed-backed embedding provider (ONNX Runtime).
//!
//! The ONNX session is not re-entrant, so the model handle lives behind a
//! mutex and every inference runs on the blocking pool while holding it.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{EmbeddingModel, TextEmbedding, TextInitOptions};

use crate::domain::error::{Error, Result};
use crate::domain::ports::EmbeddingProvider;
use crate::domain::types::EmbeddingProfile;

/// Local ONNX inference through fastembed.
pub struct FastEmbedProvider {
    model: Arc<Mutex<TextEmbedding>>,
    model_id: String,
    model_version: String,
    dimensions: usize,
}

impl FastEmbedProvider {
    /// Load the model named by the profile, caching artifacts under
    /// the profile's `cache_dir` or the given models directory.
    pub fn new(profile: &EmbeddingProfile, models_dir: &Path) -> Result<Self> {
        let kind = model_kind(&profile.model)?;
        let cache_dir = profile
            .cache_dir
            .clone()
            .unwrap_or_else(|| models_dir.to_path_buf());

        let options = TextInitOptions::new(kind)
            .with_cache_dir(cache_dir)
            .with_show_download_progress(false);
        let model = TextEmbedding::try_new(options)
            .map_err(|e| Error::embedding(format!("load model {}: {e}", profile.model)))?;

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            model_id: profile.model.clone(),
            model_version: profile.model_version.clone(),
            dimensions: profile.dimensions,
        })
    }
}

fn model_kind(model: &str) -> Result<EmbeddingModel> {
    match model {
        "sentence-transformers/all-MiniLM-L6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "BAAI/bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "BAAI/bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
        other => Err(Error::invalid_input(format!(
            "unknown embedding model: {other}"
        ))),
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.model.clone();
        let inputs: Vec<String> = texts.to_vec();
        let expected = self.dimensions;
        let model_id = self.model_id.clone();

        tokio::task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|_| Error::internal("embedding model mutex poisoned"))?;
            let vectors = guard
                .embed(inputs, None)
                .map_err(|e| Error::embedding(format!("inference failed ({model_id}): {e}")))?;

            for vector in &vectors {
                if vector.len() != expected {
                    return Err(Error::embedding(format!(
                        "model returned {} dimensions, profile expects {expected}",
                        vector.len()
                    )));
                }
            }
            Ok(vectors)
        })
        .await
        .map_err(|e| Error::internal(format!("inference task join failed: {e}")))?
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

    #[test]
    fn profile_models_resolve() {
        assert!(model_kind("sentence-transformers/all-MiniLM-L6-v2").is_ok());
        assert!(model_kind("BAAI/bge-small-en-v1.5").is_ok());
        assert!(model_kind("BAAI/bge-base-en-v1.5").is_ok());
        assert!(matches!(
            model_kind("nonexistent/model"),
            Err(Error::InvalidInput { .. })
        ));
    }
}
