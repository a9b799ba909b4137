//! Infrastructure: project layout and configuration, hardware probing,
//! ignore patterns, the embedding cache, telemetry sinks, resilience
//! primitives, AST document persistence, and the file watch pipeline.

pub mod astdocs;
pub mod config;
pub mod embedding_cache;
pub mod hardware;
pub mod patterns;
pub mod resilience;
pub mod telemetry;
pub mod watch;
