//! Common error types for the health sync agent.

use thiserror::Error;

/// Maximum number of body bytes kept from a rejected response.
const MAX_BODY_LEN: usize = 200;

/// Top-level error type for sync agent operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Health data could not be collected.
    #[error("Data source error: {0}")]
    DataSource(String),

    /// Network unreachable, DNS failure or timeout.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote endpoint answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    RemoteRejected { status: u16, body: String },

    /// Persistence layer unavailable.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration is missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Build a `RemoteRejected` error, truncating overly long bodies.
    pub fn rejected(status: u16, body: impl Into<String>) -> Self {
        let mut body = body.into();
        if body.len() > MAX_BODY_LEN {
            let mut cut = MAX_BODY_LEN;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
            body.push_str("...");
        }
        Error::RemoteRejected { status, body }
    }

    /// True when the remote refused our credential (401/403).
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Error::RemoteRejected { status: 401 | 403, .. })
    }

    /// True when the remote could not be reached at all.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
