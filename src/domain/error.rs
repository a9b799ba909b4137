//! Error handling types

use thiserror::Error;

/// Result type alias for operations that can fail
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the code intelligence index
///
/// Variants follow the error taxonomy of the system: invalid input,
/// missing initialization, store corruption, transient I/O, embedding
/// failures and latency budget violations. Every public operation returns
/// one of these; nothing unwinds across component boundaries.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// JSON parsing or serialization error
    #[error("JSON error: {source}")]
    Json {
        /// The underlying JSON error
        #[from]
        source: serde_json::Error,
    },

    /// Invalid argument or query provided by the caller; never retried
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// Description of the invalid input
        message: String,
    },

    /// Project state is missing; run `code-index init` first
    #[error("Not initialized: {message} (run `code-index init`)")]
    NotInitialized {
        /// What was missing
        message: String,
    },

    /// The durable store is corrupt; reinitialize the index
    #[error("Index unavailable: {message} (reinitialize with `code-index init`)")]
    StoreCorrupt {
        /// Description of the corruption
        message: String,
    },

    /// Durable store operation error (not corruption)
    #[error("Store error: {message}")]
    Store {
        /// Description of the store error
        message: String,
    },

    /// Transient I/O failure; retried with backoff before surfacing
    #[error("Transient I/O error: {message}")]
    TransientIo {
        /// Description of the transient failure
        message: String,
    },

    /// Embedding inference failure after the fallback chain was exhausted
    #[error("Embedding error: {message}")]
    Embedding {
        /// Description of the embedding failure
        message: String,
    },

    /// Latency budget exceeded and no partial result was legal
    #[error("Latency budget exceeded: {message}")]
    SlaViolation {
        /// Which budget was blown
        message: String,
    },

    /// Internal system error
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error
        message: String,
    },
}

impl Error {
    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a not-initialized error
    pub fn not_initialized<S: Into<String>>(message: S) -> Self {
        Self::NotInitialized {
            message: message.into(),
        }
    }

    /// Create a store corruption error
    pub fn store_corrupt<S: Into<String>>(message: S) -> Self {
        Self::StoreCorrupt {
            message: message.into(),
        }
    }

    /// Create a store error
    pub fn store<S: Into<String>>(message: S) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create a transient I/O error
    pub fn transient_io<S: Into<String>>(message: S) -> Self {
        Self::TransientIo {
            message: message.into(),
        }
    }

    /// Create an embedding error
    pub fn embedding<S: Into<String>>(message: S) -> Self {
        Self::Embedding {
            message: message.into(),
        }
    }

    /// Create an SLA violation error
    pub fn sla_violation<S: Into<String>>(message: S) -> Self {
        Self::SlaViolation {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the error is worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientIo { .. })
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase
                ) =>
            {
                Self::StoreCorrupt {
                    message: err.to_string(),
                }
            }
            _ => Self::Store {
                message: err.to_string(),
            },
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Self::Internal { message: s }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Self::Internal {
            message: s.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failing_subsystem() {
        let err = Error::not_initialized("missing .codeindex directory");
        assert!(err.to_string().contains("code-index init"));

        let err = Error::store_corrupt("malformed database header");
        assert!(err.to_string().contains("Index unavailable"));
    }

    #[test]
    fn transient_classification() {
        assert!(Error::transient_io("file lock held").is_transient());
        assert!(!Error::invalid_input("empty query").is_transient());
    }
}
