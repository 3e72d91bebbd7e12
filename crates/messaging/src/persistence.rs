//! Transaction-scoped staging of messages and every later status change.

use std::time::Duration;

use chrono::{DateTime, Utc};
use message_store::{
    DeliverableQuery, DeliveryType, MessageFilter, MessageId, MessageStatus, MessageStore,
    MessageUpdate, NewMessage, PersistedMessage, PersistedMessageId, StoreError, StoreTransaction,
    TransitionRejection, check_transition,
};
use serde::Serialize;

use crate::context::MessageContext;
use crate::envelope::{Envelope, RawEnvelope};
use crate::error::{MessagingError, Result};
use crate::message::{IntegrationEvent, InternalCommand};

/// Default retry ceiling.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default time a claim holds before another worker may take it over.
pub const DEFAULT_CLAIM_TIMEOUT: Duration = Duration::from_secs(300);

/// The only writer of the message store.
///
/// Staging happens inside the caller's business transaction. Status changes
/// are compare-and-swap updates against the row version, so concurrent
/// publishers never both move the same message.
#[derive(Clone)]
pub struct MessagePersistenceService<S> {
    store: S,
    max_retries: u32,
    claim_timeout: Duration,
}

impl<S: MessageStore> MessagePersistenceService<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            max_retries: DEFAULT_MAX_RETRIES,
            claim_timeout: DEFAULT_CLAIM_TIMEOUT,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_claim_timeout(mut self, claim_timeout: Duration) -> Self {
        self.claim_timeout = claim_timeout;
        self
    }

    pub fn claim_timeout(&self) -> Duration {
        self.claim_timeout
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Opens a business transaction on the underlying store.
    pub async fn begin(&self) -> Result<S::Transaction> {
        Ok(self.store.begin().await?)
    }

    /// Stages an envelope in `Stored` state inside `tx`.
    ///
    /// On error the caller must roll `tx` back.
    pub async fn save<M: Serialize + Sync>(
        &self,
        tx: &mut S::Transaction,
        envelope: &Envelope<M>,
        delivery_type: DeliveryType,
    ) -> Result<PersistedMessage> {
        let raw = envelope.to_raw()?;
        self.save_raw(tx, &raw, delivery_type).await
    }

    /// Stages an already type-erased envelope.
    #[tracing::instrument(skip(self, tx, raw), fields(message_id = %raw.metadata().message_id()))]
    pub async fn save_raw(
        &self,
        tx: &mut S::Transaction,
        raw: &RawEnvelope,
        delivery_type: DeliveryType,
    ) -> Result<PersistedMessage> {
        let data_type = raw
            .message_type()
            .ok_or_else(|| {
                MessagingError::MalformedPayload("envelope has no message-type header".to_string())
            })?
            .to_string();
        let metadata = raw.metadata();

        let record = tx
            .insert_message(NewMessage {
                message_id: metadata.message_id(),
                data_type,
                data: raw.to_json()?,
                delivery_type,
                correlation_id: metadata.correlation_id(),
                causation_id: metadata.causation_id(),
            })
            .await?;

        metrics::counter!("messages_staged_total", "delivery_type" => delivery_type.as_str())
            .increment(1);
        tracing::debug!(id = %record.id, data_type = %record.data_type, "message staged");

        Ok(record)
    }

    /// Wraps an integration event in `ctx` and stages it for the external bus.
    pub async fn stage_event<M: IntegrationEvent>(
        &self,
        tx: &mut S::Transaction,
        ctx: &MessageContext,
        event: M,
    ) -> Result<PersistedMessage> {
        let envelope = Envelope::wrap(event, ctx);
        self.save(tx, &envelope, DeliveryType::Outbox).await
    }

    /// Wraps internal commands in `ctx` and stages each for in-process handling.
    pub async fn schedule<C: InternalCommand>(
        &self,
        tx: &mut S::Transaction,
        ctx: &MessageContext,
        commands: Vec<C>,
    ) -> Result<Vec<PersistedMessage>> {
        let mut staged = Vec::with_capacity(commands.len());
        for command in commands {
            let envelope = Envelope::wrap(command, ctx);
            staged.push(self.save(tx, &envelope, DeliveryType::Internal).await?);
        }
        Ok(staged)
    }

    /// Read-only query for monitoring and tests.
    pub async fn get_by_filter(&self, filter: MessageFilter) -> Result<Vec<PersistedMessage>> {
        Ok(self.store.find(&filter).await?)
    }

    pub async fn get(&self, id: PersistedMessageId) -> Result<Option<PersistedMessage>> {
        Ok(self.store.get(id).await?)
    }

    /// Every message that needs operator intervention.
    pub async fn dead_letters(&self) -> Result<Vec<PersistedMessage>> {
        self.get_by_filter(MessageFilter::new().dead_lettered(true))
            .await
    }

    /// The next batch the publisher may claim at `now`.
    pub async fn fetch_deliverable(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PersistedMessage>> {
        let query = DeliverableQuery::new(now, self.max_retries, limit);
        Ok(self.store.fetch_deliverable(&query).await?)
    }

    /// Moves a message along one edge of the delivery state machine.
    ///
    /// Entering `Failed` counts as a failed attempt and dead-letters the
    /// message at the retry ceiling; entering `Processed` stamps
    /// `last_processed_at`.
    #[tracing::instrument(skip(self))]
    pub async fn change_state(
        &self,
        id: PersistedMessageId,
        new_status: MessageStatus,
    ) -> Result<PersistedMessage> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or(StoreError::MessageNotFound(id))?;
        self.check(&record, new_status)?;

        let now = Utc::now();
        let update = match new_status {
            MessageStatus::Failed => self.failure_update(&record, None, now),
            MessageStatus::Processing => MessageUpdate::from_record(&record)
                .status(new_status)
                .next_attempt_at(self.claim_deadline(now)),
            MessageStatus::Processed => MessageUpdate::from_record(&record)
                .status(new_status)
                .last_processed_at(now),
            _ => MessageUpdate::from_record(&record).status(new_status),
        };
        self.apply(update).await
    }

    /// Claims a deliverable message for this worker.
    ///
    /// Returns `None` if another worker changed the message first.
    pub async fn try_claim(&self, record: &PersistedMessage) -> Result<Option<PersistedMessage>> {
        self.try_claim_at(record, Utc::now()).await
    }

    /// Claims a message as of `now`; the claim expires after the claim timeout.
    ///
    /// While claimed, `next_attempt_at` holds the claim deadline.
    pub async fn try_claim_at(
        &self,
        record: &PersistedMessage,
        now: DateTime<Utc>,
    ) -> Result<Option<PersistedMessage>> {
        self.check(record, MessageStatus::Processing)?;
        let update = MessageUpdate::from_record(record)
            .status(MessageStatus::Processing)
            .next_attempt_at(self.claim_deadline(now));
        Ok(self.store.compare_and_swap(update).await?)
    }

    /// Takes over a claim whose holder never settled it.
    ///
    /// The expired claim counts as a failed attempt. At the retry ceiling the
    /// message is failed and dead-lettered instead of claimed again. Returns
    /// `None` if another writer changed it first.
    #[tracing::instrument(skip(self, record), fields(id = %record.id))]
    pub async fn reclaim_expired(
        &self,
        record: &PersistedMessage,
        now: DateTime<Utc>,
    ) -> Result<Option<PersistedMessage>> {
        if record.dead_lettered
            || record.message_status != MessageStatus::Processing
            || record.next_attempt_at > now
        {
            return Err(MessagingError::InvalidTransition {
                id: record.id,
                from: record.message_status,
                to: MessageStatus::Processing,
                reason: TransitionRejection::IllegalEdge,
            });
        }

        let reason = format!("claim expired at {}", record.next_attempt_at);
        let attempts = record.retry_count.saturating_add(1);
        let update = if attempts >= self.max_retries {
            self.failure_update(record, Some(reason.as_str()), now)
        } else {
            MessageUpdate::from_record(record)
                .retry_count(attempts)
                .last_error(reason.as_str())
                .next_attempt_at(self.claim_deadline(now))
        };

        let updated = self.store.compare_and_swap(update).await?;
        match updated {
            Some(ref record) if record.dead_lettered => tracing::error!(
                retry_count = record.retry_count,
                "claim expired at the retry ceiling; message dead-lettered"
            ),
            Some(ref record) => tracing::warn!(
                retry_count = record.retry_count,
                "expired claim taken over"
            ),
            None => {}
        }
        Ok(updated)
    }

    pub async fn mark_processed(&self, claimed: &PersistedMessage) -> Result<PersistedMessage> {
        self.check(claimed, MessageStatus::Processed)?;
        let update = MessageUpdate::from_record(claimed)
            .status(MessageStatus::Processed)
            .last_processed_at(Utc::now());
        self.apply(update).await
    }

    /// Records a retryable delivery failure.
    ///
    /// The message becomes eligible again at `next_attempt_at`, or is
    /// dead-lettered if this failure reaches the retry ceiling.
    pub async fn record_failure(
        &self,
        claimed: &PersistedMessage,
        reason: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<PersistedMessage> {
        self.check(claimed, MessageStatus::Failed)?;
        let update = self
            .failure_update(claimed, Some(reason), Utc::now())
            .next_attempt_at(next_attempt_at);
        let record = self.apply(update).await?;

        if record.dead_lettered {
            tracing::error!(
                id = %record.id,
                data_type = %record.data_type,
                retry_count = record.retry_count,
                reason,
                "delivery retries exhausted; message dead-lettered"
            );
        }
        Ok(record)
    }

    /// Fails a claimed message for good without counting a retry.
    pub async fn mark_malformed(
        &self,
        claimed: &PersistedMessage,
        reason: &str,
    ) -> Result<PersistedMessage> {
        self.check(claimed, MessageStatus::Failed)?;
        let update = MessageUpdate::from_record(claimed)
            .status(MessageStatus::Failed)
            .last_processed_at(Utc::now())
            .last_error(reason)
            .dead_lettered(true);
        let record = self.apply(update).await?;

        tracing::error!(
            id = %record.id,
            data_type = %record.data_type,
            reason,
            "malformed payload; message dead-lettered"
        );
        Ok(record)
    }

    /// Postpones a message whose cause has not been processed yet.
    ///
    /// The status is left alone. After `max_retries` deferrals the message is
    /// dead-lettered. Returns `None` if another writer changed it first.
    pub async fn defer(
        &self,
        record: &PersistedMessage,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<Option<PersistedMessage>> {
        if record.dead_lettered
            || !matches!(
                record.message_status,
                MessageStatus::Stored | MessageStatus::Failed
            )
        {
            return Err(MessagingError::InvalidTransition {
                id: record.id,
                from: record.message_status,
                to: record.message_status,
                reason: TransitionRejection::IllegalEdge,
            });
        }

        let deferrals = record.deferral_count.saturating_add(1);
        let mut update = MessageUpdate::from_record(record)
            .deferral_count(deferrals)
            .next_attempt_at(next_attempt_at);
        if deferrals >= self.max_retries {
            update = update
                .dead_lettered(true)
                .last_error(format!("cause unresolved after {deferrals} deferrals"));
        }

        let updated = self.store.compare_and_swap(update).await?;
        if let Some(ref record) = updated
            && record.dead_lettered
        {
            tracing::error!(
                id = %record.id,
                causation_id = ?record.causation_id,
                "cause never processed; message dead-lettered"
            );
        }
        Ok(updated)
    }

    /// Returns true unless an outgoing message with id `causation_id` is still
    /// waiting to be processed.
    ///
    /// A cause that was never persisted (a domain event, or a message from
    /// another service) counts as resolved.
    pub async fn cause_resolved(&self, causation_id: MessageId) -> Result<bool> {
        let statuses = self.store.outgoing_statuses(causation_id).await?;
        Ok(statuses.iter().all(|s| *s == MessageStatus::Processed))
    }

    fn claim_deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.claim_timeout)
            .ok()
            .and_then(|timeout| now.checked_add_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn check(&self, record: &PersistedMessage, next: MessageStatus) -> Result<()> {
        check_transition(record, next, self.max_retries).map_err(|reason| {
            MessagingError::InvalidTransition {
                id: record.id,
                from: record.message_status,
                to: next,
                reason,
            }
        })
    }

    fn failure_update(
        &self,
        record: &PersistedMessage,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> MessageUpdate {
        let retry_count = record.retry_count.saturating_add(1);
        let mut update = MessageUpdate::from_record(record)
            .status(MessageStatus::Failed)
            .retry_count(retry_count)
            .last_processed_at(now)
            .dead_lettered(retry_count >= self.max_retries);
        if let Some(reason) = reason {
            update = update.last_error(reason);
        }
        update
    }

    async fn apply(&self, update: MessageUpdate) -> Result<PersistedMessage> {
        let id = update.id;
        self.store
            .compare_and_swap(update)
            .await?
            .ok_or(MessagingError::ClaimConflict(id))
    }
}
