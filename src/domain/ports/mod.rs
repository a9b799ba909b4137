//! Port traits implemented by adapters.

pub mod embedding;

pub use embedding::{EmbeddingProvider, SharedEmbeddingProvider};
