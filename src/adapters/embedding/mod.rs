//! Embedding provider implementations.
//!
//! [`FastEmbedProvider`] runs local ONNX inference through fastembed.
//! [`HashEmbeddingProvider`] is a deterministic projection used in tests
//! and as the offline stand-in when no model artifacts are available.

pub mod fastembed_provider;
pub mod hash_provider;

pub use fastembed_provider::FastEmbedProvider;
pub use hash_provider::HashEmbeddingProvider;

use std::path::Path;
use std::sync::Arc;

use crate::domain::error::Result;
use crate::domain::ports::SharedEmbeddingProvider;
use crate::domain::types::EmbeddingProfile;

/// Constructor signature the engine uses to (re)build a provider when the
/// profile changes or the fallback chain switches models.
pub type ProviderFactory =
    Arc<dyn Fn(&EmbeddingProfile, &Path) -> Result<SharedEmbeddingProvider> + Send + Sync>;

/// Default factory: fastembed-backed inference.
pub fn default_provider_factory() -> ProviderFactory {
    Arc::new(|profile, models_dir| {
        Ok(Arc::new(FastEmbedProvider::new(profile, models_dir)?) as SharedEmbeddingProvider)
    })
}

/// Factory producing the deterministic hash provider (tests, offline).
pub fn hash_provider_factory() -> ProviderFactory {
    Arc::new(|profile, _models_dir| {
        Ok(Arc::new(HashEmbeddingProvider::for_profile(profile)) as SharedEmbeddingProvider)
    })
}
