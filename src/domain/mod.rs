//! Domain layer: core entities, errors, and the pure parsing/extraction/
//! chunking pipeline that turns source text into indexable facts.

pub mod chunking;
pub mod error;
pub mod extract;
pub mod parsing;
pub mod ports;
pub mod types;

pub use error::{Error, Result};
