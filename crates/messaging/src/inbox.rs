//! Idempotent recording of messages received from the external bus.

use std::sync::Arc;

use message_store::{
    DeliveryType, MessageId, MessageStore, PersistedMessage, StoreError, StoreTransaction,
};

use crate::envelope::RawEnvelope;
use crate::error::{MessagingError, Result};
use crate::persistence::MessagePersistenceService;
use crate::registry::MessageRegistry;

/// Outcome of receiving one envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    /// First delivery: recorded for the publisher to hand to its handler.
    Recorded(PersistedMessage),
    /// Redelivery of a message already in the inbox; nothing was done.
    Duplicate(MessageId),
}

impl Received {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Received::Duplicate(_))
    }
}

/// Entry point for a transport delivering inbound envelopes.
///
/// Each envelope is checked against the registry and recorded as an `Inbox`
/// row in its own transaction. The row is unique per message id, so a
/// redelivered message is recognised and its handler runs only once.
pub struct InboxConsumer<S: MessageStore> {
    persistence: MessagePersistenceService<S>,
    registry: Arc<MessageRegistry>,
}

impl<S: MessageStore> InboxConsumer<S> {
    pub fn new(persistence: MessagePersistenceService<S>, registry: Arc<MessageRegistry>) -> Self {
        Self {
            persistence,
            registry,
        }
    }

    /// Records an inbound envelope unless it was seen before.
    ///
    /// Envelopes of unknown types or with undecodable payloads are refused
    /// so the transport can dead-letter them.
    #[tracing::instrument(skip(self, raw), fields(message_id = %raw.metadata().message_id()))]
    pub async fn receive(&self, raw: RawEnvelope) -> Result<Received> {
        self.registry.decode(&raw)?;
        let message_type = raw.message_type().unwrap_or_default();
        if !self.registry.has_handler(message_type) {
            return Err(MessagingError::UnregisteredMessageType(
                message_type.to_string(),
            ));
        }

        let message_id = raw.metadata().message_id();
        let mut tx = self.persistence.begin().await?;

        let record = match self
            .persistence
            .save_raw(&mut tx, &raw, DeliveryType::Inbox)
            .await
        {
            Ok(record) => record,
            Err(MessagingError::Persistence(StoreError::DuplicateMessage { .. })) => {
                return Ok(self.duplicate(message_id));
            }
            Err(e) => return Err(e),
        };

        match tx.commit().await {
            Ok(()) => {
                tracing::debug!(id = %record.id, "inbound message recorded");
                Ok(Received::Recorded(record))
            }
            Err(StoreError::DuplicateMessage { .. }) => Ok(self.duplicate(message_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Parses and records an envelope received as raw bytes.
    pub async fn receive_slice(&self, bytes: &[u8]) -> Result<Received> {
        let raw = RawEnvelope::from_slice(bytes)?;
        self.receive(raw).await
    }

    fn duplicate(&self, message_id: MessageId) -> Received {
        metrics::counter!("inbox_duplicates_total").increment(1);
        tracing::info!(%message_id, "duplicate delivery ignored");
        Received::Duplicate(message_id)
    }
}
