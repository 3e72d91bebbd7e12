use thiserror::Error;

use crate::{DeliveryType, MessageId, PersistedMessageId};

/// Errors that can occur when interacting with the message store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A business document was written against a stale version.
    #[error(
        "Concurrency conflict for {collection}/{key}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        collection: String,
        key: String,
        expected: i64,
        actual: i64,
    },

    /// A message with the same id is already recorded for this delivery type.
    #[error("Message {message_id} is already recorded for {delivery_type} delivery")]
    DuplicateMessage {
        message_id: MessageId,
        delivery_type: DeliveryType,
    },

    /// The persisted message does not exist.
    #[error("Persisted message not found: {0}")]
    MessageNotFound(PersistedMessageId),

    /// A stored column could not be decoded into its domain type.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The backend rejected the operation for a reason other than a database error.
    #[error("Store backend error: {0}")]
    Backend(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for message store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
