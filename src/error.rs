//! Error types for kiyeovo-core

use thiserror::Error;

/// Result type alias for kiyeovo-core operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("cryptographic error: {0}")]
    Crypto(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("session not found")]
    SessionNotFound,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("username taken")]
    UsernameTaken,

    #[error("network unreachable")]
    NetworkUnreachable,

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("authorization denied: {0}")]
    Authorization(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(format!("JSON error: {err}"))
    }
}

impl From<ed25519_dalek::SignatureError> for Error {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        Error::InvalidSignature(err.to_string())
    }
}
