//! Adapters: concrete implementations behind the domain ports, the SQLite
//! durable store and the embedding providers.

pub mod embedding;
pub mod store;
