use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CorrelationId, DeliveryType, MessageId, MessageStatus, PersistedMessageId};

/// A message row staged inside a business transaction.
///
/// `data` holds the serialized envelope; `data_type` is the registered type
/// name of its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedMessage {
    pub id: PersistedMessageId,
    pub message_id: MessageId,
    pub data_type: String,
    pub data: serde_json::Value,
    pub delivery_type: DeliveryType,
    pub message_status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub deferral_count: u32,
    pub last_processed_at: Option<DateTime<Utc>>,
    /// Earliest time the publisher may pick this message up again.
    pub next_attempt_at: DateTime<Utc>,
    pub correlation_id: CorrelationId,
    pub causation_id: Option<MessageId>,
    /// Terminal failure: never fetched for delivery again.
    pub dead_lettered: bool,
    pub last_error: Option<String>,
    /// Row version, bumped on every update.
    pub version: i64,
}

impl PersistedMessage {
    /// Builds the row for a freshly staged message.
    pub fn stored(id: PersistedMessageId, message: NewMessage, now: DateTime<Utc>) -> Self {
        Self {
            id,
            message_id: message.message_id,
            data_type: message.data_type,
            data: message.data,
            delivery_type: message.delivery_type,
            message_status: MessageStatus::Stored,
            created_at: now,
            retry_count: 0,
            deferral_count: 0,
            last_processed_at: None,
            next_attempt_at: now,
            correlation_id: message.correlation_id,
            causation_id: message.causation_id,
            dead_lettered: false,
            last_error: None,
            version: 1,
        }
    }

    /// Returns true if the message has reached a state it will never leave.
    pub fn is_terminal(&self) -> bool {
        self.message_status == MessageStatus::Processed || self.dead_lettered
    }

    /// Applies an update's target values. The caller checks the expectations.
    pub(crate) fn apply(&mut self, update: &MessageUpdate) {
        self.message_status = update.message_status;
        self.retry_count = update.retry_count;
        self.deferral_count = update.deferral_count;
        self.next_attempt_at = update.next_attempt_at;
        self.last_processed_at = update.last_processed_at;
        self.last_error = update.last_error.clone();
        self.dead_lettered = update.dead_lettered;
        self.version += 1;
    }
}

/// Input for inserting a message inside a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub message_id: MessageId,
    pub data_type: String,
    pub data: serde_json::Value,
    pub delivery_type: DeliveryType,
    pub correlation_id: CorrelationId,
    pub causation_id: Option<MessageId>,
}

/// A conditional update of a persisted message.
///
/// The update only applies if the row is still at `expected_version` and
/// `expected_status` (compare-and-swap); otherwise the store reports that
/// nothing changed.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageUpdate {
    pub id: PersistedMessageId,
    pub expected_version: i64,
    pub expected_status: MessageStatus,
    pub message_status: MessageStatus,
    pub retry_count: u32,
    pub deferral_count: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub dead_lettered: bool,
}

impl MessageUpdate {
    /// Starts an update that, unless changed, rewrites the record's current values.
    pub fn from_record(record: &PersistedMessage) -> Self {
        Self {
            id: record.id,
            expected_version: record.version,
            expected_status: record.message_status,
            message_status: record.message_status,
            retry_count: record.retry_count,
            deferral_count: record.deferral_count,
            next_attempt_at: record.next_attempt_at,
            last_processed_at: record.last_processed_at,
            last_error: record.last_error.clone(),
            dead_lettered: record.dead_lettered,
        }
    }

    pub fn status(mut self, status: MessageStatus) -> Self {
        self.message_status = status;
        self
    }

    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn deferral_count(mut self, deferral_count: u32) -> Self {
        self.deferral_count = deferral_count;
        self
    }

    pub fn next_attempt_at(mut self, at: DateTime<Utc>) -> Self {
        self.next_attempt_at = at;
        self
    }

    pub fn last_processed_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_processed_at = Some(at);
        self
    }

    pub fn last_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }

    pub fn dead_lettered(mut self, dead_lettered: bool) -> Self {
        self.dead_lettered = dead_lettered;
        self
    }

    /// Returns true if the update's expectations hold for `record`.
    pub fn matches(&self, record: &PersistedMessage) -> bool {
        record.id == self.id
            && record.version == self.expected_version
            && record.message_status == self.expected_status
    }
}

/// A business document written through the same transaction as the messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub collection: String,
    pub key: String,
    pub version: i64,
    pub body: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_new_message(delivery_type: DeliveryType) -> NewMessage {
        NewMessage {
            message_id: MessageId::new(),
            data_type: "OrderPlacedV1".to_string(),
            data: serde_json::json!({"message": {"order_id": 42}}),
            delivery_type,
            correlation_id: CorrelationId::new(),
            causation_id: None,
        }
    }

    pub(crate) fn sample_record() -> PersistedMessage {
        PersistedMessage::stored(
            PersistedMessageId::new(1),
            sample_new_message(DeliveryType::Outbox),
            Utc::now(),
        )
    }

    #[test]
    fn stored_record_starts_fresh() {
        let record = sample_record();
        assert_eq!(record.message_status, MessageStatus::Stored);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.version, 1);
        assert_eq!(record.next_attempt_at, record.created_at);
        assert!(!record.is_terminal());
    }

    #[test]
    fn update_matches_only_current_version_and_status() {
        let record = sample_record();
        let update = MessageUpdate::from_record(&record).status(MessageStatus::Processing);
        assert!(update.matches(&record));

        let mut moved = record.clone();
        moved.apply(&update);
        assert_eq!(moved.message_status, MessageStatus::Processing);
        assert_eq!(moved.version, 2);
        assert!(!update.matches(&moved));
    }

    #[test]
    fn dead_lettered_record_is_terminal() {
        let mut record = sample_record();
        record.message_status = MessageStatus::Failed;
        record.dead_lettered = true;
        assert!(record.is_terminal());
    }
}
