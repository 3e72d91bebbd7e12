//! The outbox publisher: a polling worker that claims and delivers messages.

use std::time::Instant;

use chrono::{DateTime, Utc};
use message_store::{MessageStatus, MessageStore, PersistedMessage};
use messaging::{MessagePersistenceService, MessagingError};
use tokio::sync::watch;

use crate::backoff::Backoff;
use crate::config::OutboxConfig;
use crate::error::Result;
use crate::router::DeliveryRouter;

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub fetched: usize,
    pub claimed: usize,
    pub lost_claims: usize,
    pub processed: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub deferred: usize,
    pub reclaimed: usize,
    pub errors: usize,
}

impl TickReport {
    /// Returns true if the tick found nothing to do.
    pub fn is_idle(&self) -> bool {
        self.fetched == 0
    }
}

/// Delivers persisted messages through the router.
///
/// Any number of publishers may run against one store; the compare-and-swap
/// claim guarantees each message is delivered by at most one of them per
/// attempt.
pub struct OutboxPublisher<S: MessageStore> {
    persistence: MessagePersistenceService<S>,
    router: DeliveryRouter,
    backoff: Backoff,
    config: OutboxConfig,
}

impl<S: MessageStore> OutboxPublisher<S> {
    /// Creates a publisher; the persistence service adopts the configured
    /// retry ceiling and claim timeout.
    pub fn new(
        persistence: MessagePersistenceService<S>,
        router: DeliveryRouter,
        config: OutboxConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            persistence: persistence
                .with_max_retries(config.max_retries)
                .with_claim_timeout(config.claim_timeout),
            router,
            backoff: Backoff::new(config.backoff_base, config.backoff_cap),
            config,
        })
    }

    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    pub fn persistence(&self) -> &MessagePersistenceService<S> {
        &self.persistence
    }

    /// Runs one delivery cycle at the current time.
    pub async fn tick(&self) -> Result<TickReport> {
        self.tick_at(Utc::now()).await
    }

    /// Runs one delivery cycle as of `now`.
    ///
    /// A failing message never aborts the batch, and neither does a store
    /// error while handling one message: that message keeps whatever state
    /// it reached and is counted in `errors`. Only a failed fetch ends the
    /// tick.
    #[tracing::instrument(skip(self), fields(batch_size = self.config.batch_size))]
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let started = Instant::now();
        let mut report = TickReport::default();

        let candidates = self
            .persistence
            .fetch_deliverable(now, self.config.batch_size)
            .await?;
        report.fetched = candidates.len();

        for candidate in candidates {
            let id = candidate.id;
            if let Err(e) = self.process(candidate, now, &mut report).await {
                report.errors += 1;
                metrics::counter!("outbox_message_errors_total").increment(1);
                tracing::error!(%id, error = %e, "message handling failed; batch continues");
            }
        }

        metrics::histogram!("outbox_tick_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        if !report.is_idle() {
            tracing::debug!(?report, "outbox tick complete");
        }
        Ok(report)
    }

    /// Ticks until `shutdown` flips to true or its sender is dropped.
    ///
    /// A tick in flight finishes its batch first. When a tick fills its
    /// batch the next one starts without waiting.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            max_retries = self.config.max_retries,
            "outbox publisher started"
        );

        while !*shutdown.borrow() {
            let full_batch = match self.tick().await {
                Ok(report) => report.fetched >= self.config.batch_size,
                Err(e) => {
                    tracing::error!(error = %e, "outbox tick failed");
                    false
                }
            };
            if full_batch {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("outbox publisher stopped");
    }

    async fn process(
        &self,
        candidate: PersistedMessage,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<()> {
        let claim = if candidate.message_status == MessageStatus::Processing {
            // Its cause was resolved when it was first claimed.
            match self.persistence.reclaim_expired(&candidate, now).await? {
                Some(record) if record.dead_lettered => {
                    self.dead_lettered(&record, report);
                    return Ok(());
                }
                Some(record) => {
                    report.reclaimed += 1;
                    metrics::counter!("outbox_claims_reclaimed_total").increment(1);
                    Some(record)
                }
                None => None,
            }
        } else {
            if let Some(cause) = candidate.causation_id
                && !self.persistence.cause_resolved(cause).await?
            {
                return self.defer(&candidate, now, report).await;
            }
            self.persistence.try_claim_at(&candidate, now).await?
        };

        let Some(claimed) = claim else {
            self.lost_claim(&candidate, report);
            return Ok(());
        };
        report.claimed += 1;

        let envelope = match self.router.decode(&claimed) {
            Ok(envelope) => envelope,
            Err(e) => {
                let outcome = self.persistence.mark_malformed(&claimed, &e.to_string()).await;
                if let Some(record) = self.settle(&claimed, outcome, report)? {
                    self.dead_lettered(&record, report);
                }
                return Ok(());
            }
        };

        match self.router.deliver(&claimed, envelope).await {
            Ok(()) => {
                let outcome = self.persistence.mark_processed(&claimed).await;
                if self.settle(&claimed, outcome, report)?.is_some() {
                    report.processed += 1;
                    metrics::counter!(
                        "outbox_messages_processed_total",
                        "delivery_type" => claimed.delivery_type.as_str()
                    )
                    .increment(1);
                }
            }
            Err(e) if !e.is_retryable() => {
                let outcome = self.persistence.mark_malformed(&claimed, &e.to_string()).await;
                if let Some(record) = self.settle(&claimed, outcome, report)? {
                    self.dead_lettered(&record, report);
                }
            }
            Err(e) => {
                let attempt = claimed.retry_count.saturating_add(1);
                let next_attempt_at = self.backoff.next_attempt_at(now, attempt);
                let outcome = self
                    .persistence
                    .record_failure(&claimed, &e.to_string(), next_attempt_at)
                    .await;
                match self.settle(&claimed, outcome, report)? {
                    Some(record) if record.dead_lettered => self.dead_lettered(&record, report),
                    Some(record) => {
                        report.retried += 1;
                        metrics::counter!("outbox_messages_retried_total").increment(1);
                        tracing::warn!(
                            id = %record.id,
                            data_type = %record.data_type,
                            retry_count = record.retry_count,
                            %next_attempt_at,
                            error = %e,
                            "delivery failed; will retry"
                        );
                    }
                    None => {}
                }
            }
        }
        Ok(())
    }

    async fn defer(
        &self,
        candidate: &PersistedMessage,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<()> {
        let attempt = candidate.deferral_count.saturating_add(1);
        let next_attempt_at = self.backoff.next_attempt_at(now, attempt);

        match self.persistence.defer(candidate, next_attempt_at).await? {
            Some(record) if record.dead_lettered => self.dead_lettered(&record, report),
            Some(record) => {
                report.deferred += 1;
                metrics::counter!("outbox_messages_deferred_total").increment(1);
                tracing::debug!(
                    id = %record.id,
                    causation_id = ?record.causation_id,
                    deferral_count = record.deferral_count,
                    "cause not processed yet; delivery deferred"
                );
            }
            None => self.lost_claim(candidate, report),
        }
        Ok(())
    }

    /// Turns a lost compare-and-swap into `None`; other errors fail the message.
    fn settle(
        &self,
        claimed: &PersistedMessage,
        outcome: messaging::Result<PersistedMessage>,
        report: &mut TickReport,
    ) -> Result<Option<PersistedMessage>> {
        match outcome {
            Ok(record) => Ok(Some(record)),
            Err(MessagingError::ClaimConflict(_)) => {
                self.lost_claim(claimed, report);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn lost_claim(&self, record: &PersistedMessage, report: &mut TickReport) {
        report.lost_claims += 1;
        metrics::counter!("outbox_claims_lost_total").increment(1);
        tracing::debug!(id = %record.id, "message changed by another worker; skipped");
    }

    fn dead_lettered(&self, record: &PersistedMessage, report: &mut TickReport) {
        report.dead_lettered += 1;
        metrics::counter!(
            "outbox_messages_dead_lettered_total",
            "delivery_type" => record.delivery_type.as_str()
        )
        .increment(1);
    }
}

impl<S: MessageStore> std::fmt::Debug for OutboxPublisher<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxPublisher")
            .field("router", &self.router)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
