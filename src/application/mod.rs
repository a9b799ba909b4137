//! Application services orchestrating the domain, adapters and
//! infrastructure: the embedding engine, hybrid search, and the indexer.

pub mod embedding;
pub mod indexing;
pub mod search;
