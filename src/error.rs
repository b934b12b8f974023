//! Error types for subscriptions, stores and units of work.

use crate::types::{ListenerId, ProducerId, Version};
use thiserror::Error;

/// Main error type for the crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Subscription not started yet: {0}")]
    SubscriptionNotStartedYet(ListenerId),

    #[error("Subscription already started: {0}")]
    SubscriptionAlreadyStarted(ListenerId),

    #[error("Subscription already completed: {0}")]
    SubscriptionAlreadyCompleted(ListenerId),

    #[error("Subscription is paused: {0}")]
    SubscriptionPaused(ListenerId),

    #[error("Subscription restart not possible, listener is not resettable: {0}")]
    SubscriptionRestartNotPossible(ListenerId),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(ListenerId),

    #[error("Invalid event given: {0}")]
    InvalidEventGiven(String),

    #[error("Concurrent write detected for {id}: expected version {expected}, found {actual}")]
    ConcurrentWriteDetected {
        id: ProducerId,
        expected: Version,
        actual: Version,
    },

    #[error("Object not supported: {0}")]
    ObjectNotSupported(String),

    #[error("Invalid listener state: {0}")]
    InvalidListenerState(String),

    #[error("Handler already registered for event type: {0}")]
    DuplicateHandler(String),

    #[error("Listener error: {0}")]
    Listener(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl Error {
    /// Wrap an arbitrary error raised by listener code.
    pub fn listener(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::Listener(Box::new(e))
    }

    /// Whether this is an optimistic-concurrency conflict.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Error::ConcurrentWriteDetected { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Deserialization(e.to_string())
    }
}

/// Result type for crate operations.
pub type Result<T> = std::result::Result<T, Error>;
