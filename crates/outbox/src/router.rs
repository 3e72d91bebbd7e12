//! Routes each persisted message to the bus port for its delivery type.

use std::collections::HashMap;
use std::sync::Arc;

use message_store::{DeliveryType, PersistedMessage};
use messaging::{
    BusError, ExternalEventBus, InternalCommandBus, MessageRegistry, MessagingError, RawEnvelope,
};

/// Sends `Outbox` rows to the external bus and `Internal`/`Inbox` rows to
/// the internal command bus.
#[derive(Clone)]
pub struct DeliveryRouter {
    external: Arc<dyn ExternalEventBus>,
    internal: Arc<dyn InternalCommandBus>,
    registry: Arc<MessageRegistry>,
    routing_keys: HashMap<String, String>,
}

impl DeliveryRouter {
    pub fn new(
        external: Arc<dyn ExternalEventBus>,
        internal: Arc<dyn InternalCommandBus>,
        registry: Arc<MessageRegistry>,
    ) -> Self {
        Self {
            external,
            internal,
            registry,
            routing_keys: HashMap::new(),
        }
    }

    pub fn with_routing_keys(mut self, routing_keys: HashMap<String, String>) -> Self {
        self.routing_keys = routing_keys;
        self
    }

    pub fn registry(&self) -> &MessageRegistry {
        &self.registry
    }

    /// The configured key for `data_type`, otherwise its snake_case form.
    pub fn routing_key(&self, data_type: &str) -> String {
        self.routing_keys
            .get(data_type)
            .cloned()
            .unwrap_or_else(|| snake_case(data_type))
    }

    /// Restores the stored envelope of `record`.
    ///
    /// The envelope must carry the record's type name and, for registered
    /// types, decode as that type.
    pub fn decode(&self, record: &PersistedMessage) -> messaging::Result<RawEnvelope> {
        let raw = RawEnvelope::from_json(&record.data)?;
        match raw.message_type() {
            Some(actual) if actual == record.data_type => {}
            actual => {
                return Err(MessagingError::TypeMismatch {
                    expected: record.data_type.clone(),
                    actual: actual.unwrap_or_default().to_string(),
                });
            }
        }
        if self.registry.is_registered(&record.data_type) {
            self.registry.decode(&raw)?;
        }
        Ok(raw)
    }

    /// Hands one envelope to the port for the record's delivery type.
    pub async fn deliver(
        &self,
        record: &PersistedMessage,
        envelope: RawEnvelope,
    ) -> Result<(), BusError> {
        match record.delivery_type {
            DeliveryType::Outbox => {
                let routing_key = self.routing_key(&record.data_type);
                self.external.publish(&routing_key, &envelope).await
            }
            DeliveryType::Internal | DeliveryType::Inbox => {
                self.internal.schedule(vec![envelope]).await
            }
        }
    }
}

impl std::fmt::Debug for DeliveryRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryRouter")
            .field("registry", &self.registry)
            .field("routing_keys", &self.routing_keys)
            .finish_non_exhaustive()
    }
}

/// `OrderPlacedV1` -> `order_placed_v1`, `HTTPRequestSeen` -> `http_request_seen`.
pub fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let starts_word = match prev {
                None => false,
                Some('_') => false,
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) => p.is_uppercase() && next.is_some_and(char::is_lowercase),
            };
            if starts_word {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use messaging::{Envelope, InMemoryEventBus, InProcessCommandBus, Message, MessageContext};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct OrderPlacedV1 {
        order_id: u64,
    }

    impl Message for OrderPlacedV1 {
        const MESSAGE_TYPE: &'static str = "OrderPlacedV1";
    }

    fn router(bus: &InMemoryEventBus) -> DeliveryRouter {
        let mut registry = MessageRegistry::new();
        registry.register::<OrderPlacedV1>();
        let registry = Arc::new(registry);
        DeliveryRouter::new(
            Arc::new(bus.clone()),
            Arc::new(InProcessCommandBus::new(Arc::clone(&registry))),
            registry,
        )
    }

    fn record(delivery_type: DeliveryType, data: serde_json::Value) -> PersistedMessage {
        let raw = RawEnvelope::from_json(&data).unwrap();
        PersistedMessage::stored(
            message_store::PersistedMessageId::new(1),
            message_store::NewMessage {
                message_id: raw.metadata().message_id(),
                data_type: "OrderPlacedV1".to_string(),
                data,
                delivery_type,
                correlation_id: raw.metadata().correlation_id(),
                causation_id: None,
            },
            chrono::Utc::now(),
        )
    }

    fn envelope_json(order_id: u64) -> serde_json::Value {
        Envelope::wrap(OrderPlacedV1 { order_id }, &MessageContext::root())
            .to_raw()
            .unwrap()
            .to_json()
            .unwrap()
    }

    #[test]
    fn snake_case_handles_versions_and_acronyms() {
        assert_eq!(snake_case("OrderPlacedV1"), "order_placed_v1");
        assert_eq!(snake_case("UpdateOrderReadModel"), "update_order_read_model");
        assert_eq!(snake_case("HTTPRequestSeen"), "http_request_seen");
        assert_eq!(snake_case("Order2Shipped"), "order2_shipped");
        assert_eq!(snake_case("already_snake"), "already_snake");
    }

    #[test]
    fn configured_routing_key_wins() {
        let bus = InMemoryEventBus::new();
        let router = router(&bus).with_routing_keys(HashMap::from([(
            "OrderPlacedV1".to_string(),
            "orders.placed".to_string(),
        )]));
        assert_eq!(router.routing_key("OrderPlacedV1"), "orders.placed");
        assert_eq!(router.routing_key("OrderCancelledV1"), "order_cancelled_v1");
    }

    #[tokio::test]
    async fn outbox_rows_go_to_the_external_bus() {
        let bus = InMemoryEventBus::new();
        let router = router(&bus);
        let record = record(DeliveryType::Outbox, envelope_json(42));

        let envelope = router.decode(&record).unwrap();
        router.deliver(&record, envelope).await.unwrap();

        let published = bus.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].routing_key, "order_placed_v1");
        let event = published[0].envelope.unwrap::<OrderPlacedV1>().unwrap();
        assert_eq!(event.message().order_id, 42);
    }

    #[tokio::test]
    async fn internal_rows_go_to_the_command_bus() {
        let bus = InMemoryEventBus::new();
        let router = router(&bus);
        let record = record(DeliveryType::Internal, envelope_json(1));

        // Registered without a handler, so the command bus refuses it.
        let envelope = router.decode(&record).unwrap();
        let err = router.deliver(&record, envelope).await.unwrap_err();
        assert!(matches!(err, BusError::Scheduling(_)));
        assert_eq!(bus.published_count().await, 0);
    }

    #[test]
    fn decode_rejects_payloads_that_do_not_fit_the_type() {
        let bus = InMemoryEventBus::new();
        let router = router(&bus);

        let mut data = envelope_json(1);
        data["message"] = serde_json::json!({"order_id": "forty-two"});
        let err = router.decode(&record(DeliveryType::Outbox, data)).unwrap_err();
        assert!(err.is_permanent());

        let mut mislabelled = record(DeliveryType::Outbox, envelope_json(1));
        mislabelled.data_type = "OrderCancelledV1".to_string();
        assert!(matches!(
            router.decode(&mislabelled),
            Err(MessagingError::TypeMismatch { .. })
        ));

        let mut garbage = record(DeliveryType::Outbox, envelope_json(1));
        garbage.data = serde_json::json!("not an envelope");
        assert!(matches!(
            router.decode(&garbage),
            Err(MessagingError::MalformedPayload(_))
        ));
    }
}
