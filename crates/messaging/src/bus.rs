//! Egress ports and the adapters provided with the core.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::envelope::RawEnvelope;
use crate::error::MessagingError;
use crate::registry::MessageRegistry;

/// Port-level delivery failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// The transport did not durably accept the message.
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// An internal command could not be scheduled or its handler failed.
    #[error("Scheduling failed: {0}")]
    Scheduling(String),

    /// The message can never be delivered.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
}

impl BusError {
    /// Returns true if a later attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, BusError::MalformedPayload(_))
    }
}

/// Publishes integration events to other services.
///
/// `publish` returns `Ok` only once the transport has durably accepted the
/// message.
#[async_trait]
pub trait ExternalEventBus: Send + Sync {
    async fn publish(&self, routing_key: &str, envelope: &RawEnvelope) -> Result<(), BusError>;
}

/// Schedules internal commands for in-process handlers.
#[async_trait]
pub trait InternalCommandBus: Send + Sync {
    async fn schedule(&self, commands: Vec<RawEnvelope>) -> Result<(), BusError>;
}

/// Runs internal commands through the registry's handler table.
#[derive(Debug, Clone)]
pub struct InProcessCommandBus {
    registry: Arc<MessageRegistry>,
}

impl InProcessCommandBus {
    pub fn new(registry: Arc<MessageRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &MessageRegistry {
        &self.registry
    }
}

#[async_trait]
impl InternalCommandBus for InProcessCommandBus {
    async fn schedule(&self, commands: Vec<RawEnvelope>) -> Result<(), BusError> {
        for command in commands {
            self.registry
                .dispatch(command)
                .await
                .map_err(BusError::from)?;
        }
        Ok(())
    }
}

/// A message accepted by [`InMemoryEventBus`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub routing_key: String,
    pub envelope: RawEnvelope,
}

/// In-memory transport for tests, with programmable failures.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventBus {
    published: Arc<RwLock<Vec<PublishedMessage>>>,
    failures_remaining: Arc<AtomicU32>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` publishes fail with `TransportUnavailable`.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Makes every publish fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published.read().await.clone()
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    pub async fn clear(&self) {
        self.published.write().await.clear();
    }
}

#[async_trait]
impl ExternalEventBus for InMemoryEventBus {
    async fn publish(&self, routing_key: &str, envelope: &RawEnvelope) -> Result<(), BusError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BusError::TransportUnavailable("bus is offline".to_string()));
        }
        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(BusError::TransportUnavailable(
                "injected transport failure".to_string(),
            ));
        }

        self.published.write().await.push(PublishedMessage {
            routing_key: routing_key.to_string(),
            envelope: envelope.clone(),
        });
        Ok(())
    }
}

/// Transport that only logs each publish.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEventBus;

#[async_trait]
impl ExternalEventBus for LogEventBus {
    async fn publish(&self, routing_key: &str, envelope: &RawEnvelope) -> Result<(), BusError> {
        tracing::info!(
            routing_key,
            message_id = %envelope.metadata().message_id(),
            correlation_id = %envelope.metadata().correlation_id(),
            message_type = envelope.message_type().unwrap_or_default(),
            "published integration event"
        );
        Ok(())
    }
}

impl From<MessagingError> for BusError {
    fn from(err: MessagingError) -> Self {
        match err {
            MessagingError::TransportUnavailable(reason) => BusError::TransportUnavailable(reason),
            err if err.is_permanent() => BusError::MalformedPayload(err.to_string()),
            err => BusError::Scheduling(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::context::MessageContext;
    use crate::envelope::Envelope;
    use crate::error::Result;
    use crate::message::Message;
    use crate::registry::MessageHandler;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Rebuild {
        id: u32,
    }

    impl Message for Rebuild {
        const MESSAGE_TYPE: &'static str = "Rebuild";
    }

    struct FailingHandler {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MessageHandler<Rebuild> for FailingHandler {
        fn name(&self) -> &'static str {
            "FailingHandler"
        }

        async fn handle(&self, _envelope: Envelope<Rebuild>) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(MessagingError::Scheduling("view locked".to_string()))
        }
    }

    fn raw(id: u32) -> RawEnvelope {
        Envelope::wrap(Rebuild { id }, &MessageContext::root())
            .to_raw()
            .unwrap()
    }

    #[test]
    fn only_malformed_is_terminal() {
        assert!(BusError::TransportUnavailable("x".into()).is_retryable());
        assert!(BusError::Scheduling("x".into()).is_retryable());
        assert!(!BusError::MalformedPayload("x".into()).is_retryable());
    }

    #[tokio::test]
    async fn in_memory_bus_records_and_fails_on_demand() {
        let bus = InMemoryEventBus::new();
        bus.fail_next(2);

        let envelope = raw(1);
        assert!(matches!(
            bus.publish("rebuild", &envelope).await,
            Err(BusError::TransportUnavailable(_))
        ));
        assert!(bus.publish("rebuild", &envelope).await.is_err());
        bus.publish("rebuild", &envelope).await.unwrap();

        let published = bus.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].routing_key, "rebuild");

        bus.set_unavailable(true);
        assert!(bus.publish("rebuild", &envelope).await.is_err());
        assert_eq!(bus.published_count().await, 1);
    }

    #[tokio::test]
    async fn command_bus_classifies_handler_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = MessageRegistry::new();
        registry.register_handler::<Rebuild, _>(FailingHandler {
            calls: Arc::clone(&calls),
        });
        let bus = InProcessCommandBus::new(Arc::new(registry));

        let result = bus.schedule(vec![raw(1)]).await;
        assert!(matches!(result, Err(BusError::Scheduling(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn command_bus_rejects_undecodable_commands() {
        let mut registry = MessageRegistry::new();
        registry.register_handler::<Rebuild, _>(FailingHandler {
            calls: Arc::new(AtomicUsize::new(0)),
        });
        let bus = InProcessCommandBus::new(Arc::new(registry));

        let mut json = raw(1).to_json().unwrap();
        json["message"] = serde_json::json!({"id": "seven"});
        let broken = RawEnvelope::from_json(&json).unwrap();

        let result = bus.schedule(vec![broken]).await;
        assert!(matches!(result, Err(BusError::MalformedPayload(_))));
    }
}
