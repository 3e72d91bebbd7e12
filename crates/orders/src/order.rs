//! Order aggregate.

use chrono::{DateTime, Utc};
use messaging::{DomainEvent, EventRecorder, RaisedEvent};
use serde::{Deserialize, Serialize};

use crate::error::OrderError;

/// Order identifier, also the order's document key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub u64);

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The state of an order.
///
/// ```text
/// Placed ──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderState {
    #[default]
    Placed,
    Cancelled,
}

impl OrderState {
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderState::Placed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Placed => "Placed",
            OrderState::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Domain events raised by [`Order`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum OrderEvent {
    OrderPlaced {
        order_id: OrderId,
        customer: String,
        total_cents: i64,
    },
    OrderCancelled {
        order_id: OrderId,
        reason: String,
    },
}

impl OrderEvent {
    pub fn order_id(&self) -> OrderId {
        match self {
            OrderEvent::OrderPlaced { order_id, .. } | OrderEvent::OrderCancelled { order_id, .. } => {
                *order_id
            }
        }
    }
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced { .. } => "OrderPlaced",
            OrderEvent::OrderCancelled { .. } => "OrderCancelled",
        }
    }
}

/// Order aggregate root, stored as one business document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    customer: String,
    total_cents: i64,
    state: OrderState,
    placed_at: DateTime<Utc>,
    #[serde(default)]
    cancel_reason: Option<String>,

    /// Document version this aggregate was loaded at; 0 if never saved.
    #[serde(skip)]
    version: i64,

    #[serde(skip)]
    events: EventRecorder<OrderEvent>,
}

impl Order {
    /// Places a new order.
    pub fn place(
        id: OrderId,
        customer: impl Into<String>,
        total_cents: i64,
    ) -> Result<Self, OrderError> {
        let customer = customer.into();
        if customer.trim().is_empty() {
            return Err(OrderError::CustomerRequired);
        }
        if total_cents <= 0 {
            return Err(OrderError::InvalidTotal { total_cents });
        }

        let mut order = Self {
            id,
            customer: customer.clone(),
            total_cents,
            state: OrderState::Placed,
            placed_at: Utc::now(),
            cancel_reason: None,
            version: 0,
            events: EventRecorder::new(),
        };
        order.events.record(OrderEvent::OrderPlaced {
            order_id: id,
            customer,
            total_cents,
        });
        Ok(order)
    }

    /// Cancels the order.
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), OrderError> {
        if !self.state.can_cancel() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.state,
                action: "cancel",
            });
        }

        let reason = reason.into();
        self.state = OrderState::Cancelled;
        self.cancel_reason = Some(reason.clone());
        self.events.record(OrderEvent::OrderCancelled {
            order_id: self.id,
            reason,
        });
        Ok(())
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn customer(&self) -> &str {
        &self.customer
    }

    pub fn total_cents(&self) -> i64 {
        self.total_cents
    }

    pub fn state(&self) -> OrderState {
        self.state
    }

    pub fn placed_at(&self) -> DateTime<Utc> {
        self.placed_at
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    /// Events raised since the last call, in raise order.
    pub fn take_events(&mut self) -> Vec<RaisedEvent<OrderEvent>> {
        self.events.take_events()
    }

    pub fn has_pending_events(&self) -> bool {
        !self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placing_raises_order_placed() {
        let mut order = Order::place(OrderId(42), "ada", 1250).unwrap();
        assert_eq!(order.state(), OrderState::Placed);
        assert_eq!(order.version(), 0);

        let events = order.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].event,
            OrderEvent::OrderPlaced {
                order_id: OrderId(42),
                customer: "ada".to_string(),
                total_cents: 1250,
            }
        );
        assert!(!order.has_pending_events());
    }

    #[test]
    fn placing_validates_input() {
        assert_eq!(
            Order::place(OrderId(1), " ", 100).unwrap_err(),
            OrderError::CustomerRequired
        );
        assert_eq!(
            Order::place(OrderId(1), "ada", 0).unwrap_err(),
            OrderError::InvalidTotal { total_cents: 0 }
        );
    }

    #[test]
    fn cancel_only_once() {
        let mut order = Order::place(OrderId(7), "ada", 100).unwrap();
        order.take_events();

        order.cancel("changed mind").unwrap();
        assert_eq!(order.state(), OrderState::Cancelled);
        assert_eq!(order.cancel_reason(), Some("changed mind"));
        assert_eq!(order.take_events()[0].event.event_type(), "OrderCancelled");

        assert!(matches!(
            order.cancel("again"),
            Err(OrderError::InvalidStateTransition { .. })
        ));
        assert!(!order.has_pending_events());
    }

    #[test]
    fn document_body_omits_pending_events() {
        let order = Order::place(OrderId(3), "ada", 100).unwrap();
        let body = serde_json::to_value(&order).unwrap();
        assert!(body.get("events").is_none());
        assert!(body.get("version").is_none());

        let restored: Order = serde_json::from_value(body).unwrap();
        assert_eq!(restored.id(), OrderId(3));
        assert!(!restored.has_pending_events());
    }
}
