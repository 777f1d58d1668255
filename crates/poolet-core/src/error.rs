//! Error types for poolet

use thiserror::Error;

/// Main error type for poolet
#[derive(Error, Debug)]
pub enum PooletError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Object has no uid and cannot be keyed
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Object is missing a field required to schedule it
    #[error("Validation error: {0}")]
    Validation(String),

    /// Instance key already present in the cache
    #[error("Instance already present: {0}")]
    AlreadyPresent(String),

    /// Instance not found
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    /// Container not found
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    /// Recorded container differs from the one implied by the caller's copy
    #[error("Container mismatch for instance {uid}: recorded {recorded:?}, got {actual:?}")]
    ContainerMismatch {
        uid: String,
        recorded: String,
        actual: String,
    },

    /// Operation not allowed in the instance's current cache state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Cache invariant violated (lost or reordered watch event).
    ///
    /// The owner of the cache must drop it and rebuild from a fresh list.
    #[error("Cache corruption: {0}")]
    Corruption(String),

    /// Optimistic concurrency conflict on write
    #[error("Conflict: {0}")]
    Conflict(String),

    /// State store error
    #[error("Store error: {0}")]
    Store(String),

    /// External call did not finish in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PooletError {
    /// Whether the error signals that the cache can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PooletError::Corruption(_))
    }
}

/// Result type for poolet operations
pub type PooletResult<T> = Result<T, PooletError>;

impl From<serde_json::Error> for PooletError {
    fn from(err: serde_json::Error) -> Self {
        PooletError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for PooletError {
    fn from(err: toml::de::Error) -> Self {
        PooletError::Config(err.to_string())
    }
}

impl From<config::ConfigError> for PooletError {
    fn from(err: config::ConfigError) -> Self {
        PooletError::Config(err.to_string())
    }
}
