//! Messaging error types.

use message_store::{MessageStatus, PersistedMessageId, StoreError, TransitionRejection};
use thiserror::Error;

use crate::bus::BusError;
use crate::validation::ValidationErrors;

/// Errors that can occur while staging, delivering or handling messages.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// The message store failed to read or write.
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// A status change that the delivery state machine does not allow.
    #[error("Invalid transition for message {id}: {from} -> {to} ({reason})")]
    InvalidTransition {
        id: PersistedMessageId,
        from: MessageStatus,
        to: MessageStatus,
        reason: TransitionRejection,
    },

    /// Another writer changed the message between read and update.
    #[error("Claim conflict: message {0} was changed concurrently")]
    ClaimConflict(PersistedMessageId),

    /// The external transport did not accept the message.
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// An internal command could not be scheduled.
    #[error("Scheduling error: {0}")]
    Scheduling(String),

    /// The payload cannot be decoded; retrying will not help.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// The envelope carries a different payload type than the caller expected.
    #[error("Type mismatch: expected {expected}, found {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// The payload type has not been registered at startup.
    #[error("Unregistered message type: {0}")]
    UnregisteredMessageType(String),

    /// Envelope construction violated one or more rules.
    #[error("Invalid envelope: {0}")]
    Validation(#[from] ValidationErrors),

    /// A domain event handler failed; the business transaction is aborted.
    #[error("Domain event handler {handler} failed on {event_type}: {reason}")]
    DomainEventHandling {
        handler: String,
        event_type: String,
        reason: String,
    },

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MessagingError {
    /// Returns true if the error describes a payload that can never be handled.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            MessagingError::MalformedPayload(_)
                | MessagingError::TypeMismatch { .. }
                | MessagingError::UnregisteredMessageType(_)
        )
    }
}

impl From<BusError> for MessagingError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::TransportUnavailable(reason) => MessagingError::TransportUnavailable(reason),
            BusError::Scheduling(reason) => MessagingError::Scheduling(reason),
            BusError::MalformedPayload(reason) => MessagingError::MalformedPayload(reason),
        }
    }
}

/// Result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;
