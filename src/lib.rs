//! code-index - a project-scoped code intelligence index
//!
//! Maintains a persistent on-disk index that maps source text to lexical
//! full-text postings, dense semantic embeddings, and a structural
//! symbol/call graph. A long-lived server answers hybrid search and symbol
//! navigation requests over a line-oriented JSON-RPC tool protocol while a
//! file watcher keeps the index coherent with the working tree.

pub mod adapters;
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod server;

// Re-export core types for public API
pub use domain::error::{Error, Result};
pub use domain::types::*;

// Re-export main entry points
pub use application::indexing::Indexer;
pub use application::search::HybridSearch;
pub use server::run_server;
