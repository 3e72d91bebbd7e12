use chrono::{DateTime, Utc};

use crate::{CorrelationId, DeliveryType, MessageId, MessageStatus, PersistedMessage};

/// Builder for read-only queries over persisted messages.
///
/// Used for monitoring and tests; delivery state is never driven from it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageFilter {
    /// Filter by delivery type.
    pub delivery_type: Option<DeliveryType>,

    /// Filter by status (any of these).
    pub statuses: Option<Vec<MessageStatus>>,

    /// Filter by payload type name.
    pub data_type: Option<String>,

    /// Filter by correlation id.
    pub correlation_id: Option<CorrelationId>,

    /// Filter by envelope message id.
    pub message_id: Option<MessageId>,

    /// Filter by dead-letter flag.
    pub dead_lettered: Option<bool>,

    /// Filter by messages created at or after this timestamp.
    pub from_created_at: Option<DateTime<Utc>>,

    /// Filter by messages created at or before this timestamp.
    pub to_created_at: Option<DateTime<Utc>>,

    /// Maximum number of messages to return.
    pub limit: Option<usize>,

    /// Number of messages to skip.
    pub offset: Option<usize>,
}

impl MessageFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivery_type(mut self, delivery_type: DeliveryType) -> Self {
        self.delivery_type = Some(delivery_type);
        self
    }

    pub fn status(mut self, status: MessageStatus) -> Self {
        self.statuses = Some(vec![status]);
        self
    }

    pub fn statuses(mut self, statuses: Vec<MessageStatus>) -> Self {
        self.statuses = Some(statuses);
        self
    }

    pub fn data_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = Some(data_type.into());
        self
    }

    pub fn correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn message_id(mut self, message_id: MessageId) -> Self {
        self.message_id = Some(message_id);
        self
    }

    pub fn dead_lettered(mut self, dead_lettered: bool) -> Self {
        self.dead_lettered = Some(dead_lettered);
        self
    }

    pub fn from_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.from_created_at = Some(at);
        self
    }

    pub fn to_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.to_created_at = Some(at);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns true if `message` satisfies every predicate (limit/offset aside).
    pub fn matches(&self, message: &PersistedMessage) -> bool {
        if let Some(delivery_type) = self.delivery_type
            && message.delivery_type != delivery_type
        {
            return false;
        }
        if let Some(ref statuses) = self.statuses
            && !statuses.contains(&message.message_status)
        {
            return false;
        }
        if let Some(ref data_type) = self.data_type
            && &message.data_type != data_type
        {
            return false;
        }
        if let Some(correlation_id) = self.correlation_id
            && message.correlation_id != correlation_id
        {
            return false;
        }
        if let Some(message_id) = self.message_id
            && message.message_id != message_id
        {
            return false;
        }
        if let Some(dead_lettered) = self.dead_lettered
            && message.dead_lettered != dead_lettered
        {
            return false;
        }
        if let Some(from) = self.from_created_at
            && message.created_at < from
        {
            return false;
        }
        if let Some(to) = self.to_created_at
            && message.created_at > to
        {
            return false;
        }
        true
    }
}

/// Selects the batch of messages the publisher may claim next.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliverableQuery {
    pub delivery_types: Vec<DeliveryType>,
    pub max_retries: u32,
    pub now: DateTime<Utc>,
    pub limit: usize,
}

impl DeliverableQuery {
    pub fn new(now: DateTime<Utc>, max_retries: u32, limit: usize) -> Self {
        Self {
            delivery_types: DeliveryType::ALL.to_vec(),
            max_retries,
            now,
            limit,
        }
    }

    pub fn delivery_types(mut self, delivery_types: Vec<DeliveryType>) -> Self {
        self.delivery_types = delivery_types;
        self
    }

    /// Not dead-lettered and past `next_attempt_at`: stored, failed with
    /// retries left, or processing under a claim that has expired.
    ///
    /// For a `Processing` row `next_attempt_at` is the claim deadline.
    pub fn matches(&self, message: &PersistedMessage) -> bool {
        if message.dead_lettered || !self.delivery_types.contains(&message.delivery_type) {
            return false;
        }
        if message.next_attempt_at > self.now {
            return false;
        }
        match message.message_status {
            MessageStatus::Stored => true,
            MessageStatus::Failed | MessageStatus::Processing => {
                message.retry_count < self.max_retries
            }
            MessageStatus::Processed => false,
        }
    }
}
