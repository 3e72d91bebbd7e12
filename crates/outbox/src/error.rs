//! Outbox error types.

use thiserror::Error;

/// Errors that can occur while setting up or running the publisher.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// The publisher configuration is unusable.
    #[error("Invalid outbox configuration: {0}")]
    InvalidConfig(String),

    /// A messaging operation failed.
    #[error(transparent)]
    Messaging(#[from] messaging::MessagingError),

    /// The message store failed outside a messaging operation.
    #[error("Message store error: {0}")]
    Store(#[from] message_store::StoreError),
}

/// Result type for outbox operations.
pub type Result<T> = std::result::Result<T, OutboxError>;
