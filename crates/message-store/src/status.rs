use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::StoreError;
use crate::record::PersistedMessage;

/// How a persisted message leaves (or entered) the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryType {
    /// Fan-out to in-process command handlers.
    Internal,
    /// Destined for the external bus.
    Outbox,
    /// Received from the external bus, recorded for idempotent handling.
    Inbox,
}

impl DeliveryType {
    pub const ALL: [DeliveryType; 3] = [
        DeliveryType::Internal,
        DeliveryType::Outbox,
        DeliveryType::Inbox,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryType::Internal => "internal",
            DeliveryType::Outbox => "outbox",
            DeliveryType::Inbox => "inbox",
        }
    }
}

impl std::fmt::Display for DeliveryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "internal" => Ok(DeliveryType::Internal),
            "outbox" => Ok(DeliveryType::Outbox),
            "inbox" => Ok(DeliveryType::Inbox),
            other => Err(StoreError::Decode(format!("unknown delivery type '{other}'"))),
        }
    }
}

/// Delivery status of a persisted message.
///
/// ```text
/// Stored ──► Processing ──► Processed
///               ▲   │
///               │   ▼
///               └─ Failed   (retry while retry_count < max_retries)
/// ```
///
/// Dead-lettering is the `dead_lettered` flag, not a status. A message
/// dead-lettered by delivery failures ends in `Failed`. One dead-lettered
/// while its cause was still pending was never claimed, so it stays `Stored`.
/// Find dead letters with `dead_lettered = true`, never by status alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    #[default]
    Stored,
    Processing,
    Processed,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Stored => "stored",
            MessageStatus::Processing => "processing",
            MessageStatus::Processed => "processed",
            MessageStatus::Failed => "failed",
        }
    }

    /// Returns true if `next` is an edge of the delivery state machine.
    ///
    /// This only checks the shape of the graph; the retry ceiling is
    /// enforced by [`check_transition`].
    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        matches!(
            (self, next),
            (MessageStatus::Stored, MessageStatus::Processing)
                | (MessageStatus::Processing, MessageStatus::Processed)
                | (MessageStatus::Processing, MessageStatus::Failed)
                | (MessageStatus::Failed, MessageStatus::Processing)
        )
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stored" => Ok(MessageStatus::Stored),
            "processing" => Ok(MessageStatus::Processing),
            "processed" => Ok(MessageStatus::Processed),
            "failed" => Ok(MessageStatus::Failed),
            other => Err(StoreError::Decode(format!("unknown message status '{other}'"))),
        }
    }
}

/// Why a status change was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionRejection {
    /// The edge does not exist in the state machine.
    IllegalEdge,
    /// A retry was requested but the retry ceiling has been reached.
    RetriesExhausted,
    /// The message is dead-lettered and needs operator intervention.
    DeadLettered,
}

impl std::fmt::Display for TransitionRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionRejection::IllegalEdge => f.write_str("illegal edge"),
            TransitionRejection::RetriesExhausted => f.write_str("retries exhausted"),
            TransitionRejection::DeadLettered => f.write_str("message is dead-lettered"),
        }
    }
}

/// Validates moving `record` to `next` under a retry ceiling of `max_retries`.
pub fn check_transition(
    record: &PersistedMessage,
    next: MessageStatus,
    max_retries: u32,
) -> Result<(), TransitionRejection> {
    if !record.message_status.can_transition_to(next) {
        return Err(TransitionRejection::IllegalEdge);
    }

    if record.dead_lettered {
        return Err(TransitionRejection::DeadLettered);
    }

    if record.message_status == MessageStatus::Failed && record.retry_count >= max_retries {
        return Err(TransitionRejection::RetriesExhausted);
    }

    Ok(())
}
