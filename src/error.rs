//! Error types for the channel store.

use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("too many channels")]
    TooManyChannels,

    #[error("too many subscriptions per channel")]
    TooManySubscriptions,

    #[error("{0}: feature not implemented")]
    NotImplemented(&'static str),

    #[error("{0}: not supported")]
    NotSupported(&'static str),

    #[error("Invalid limits: {0}")]
    InvalidLimits(String),

    #[error("Invalid channel name: {0:?}")]
    InvalidChannel(String),

    #[error("Invalid sequence: {0} (last is {1})")]
    InvalidSequence(u64, u64),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(u64),

    #[error("Store is closed")]
    Closed,

    #[error("Store not initialized")]
    NotInitialized,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Broad classification of a [`StoreError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A channel, message or subscription quota is at its maximum.
    CapacityExceeded,
    /// An operation the backend does not provide.
    NotImplemented,
    /// Malformed limits, names or sequences.
    Validation,
    /// The store or one of its records is not in a usable state.
    State,
    /// Opaque failure of the storage medium.
    Backend,
}

impl StoreError {
    /// Wrap an arbitrary backend failure.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        StoreError::Backend(Box::new(err))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::TooManyChannels | StoreError::TooManySubscriptions => {
                ErrorKind::CapacityExceeded
            }
            StoreError::NotImplemented(_) | StoreError::NotSupported(_) => {
                ErrorKind::NotImplemented
            }
            StoreError::InvalidLimits(_)
            | StoreError::InvalidChannel(_)
            | StoreError::InvalidSequence(..) => ErrorKind::Validation,
            StoreError::Closed
            | StoreError::NotInitialized
            | StoreError::SubscriptionNotFound(_) => ErrorKind::State,
            StoreError::Io(_)
            | StoreError::Serialization(_)
            | StoreError::Deserialization(_)
            | StoreError::Corruption(_)
            | StoreError::InvalidFormat(_)
            | StoreError::ChecksumMismatch { .. }
            | StoreError::Backend(_) => ErrorKind::Backend,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
