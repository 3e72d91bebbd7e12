//! Messages the order slice sends: integration events for other services
//! and internal commands for its own read side.

use messaging::{IntegrationEvent, InternalCommand, Message};
use serde::{Deserialize, Serialize};

use crate::order::{OrderId, OrderState};

/// Published when an order is placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlacedV1 {
    pub order_id: OrderId,
    pub customer: String,
    pub total_cents: i64,
}

impl Message for OrderPlacedV1 {
    const MESSAGE_TYPE: &'static str = "OrderPlacedV1";
}

impl IntegrationEvent for OrderPlacedV1 {}

/// Published when an order is cancelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelledV1 {
    pub order_id: OrderId,
    pub reason: String,
}

impl Message for OrderCancelledV1 {
    const MESSAGE_TYPE: &'static str = "OrderCancelledV1";
}

impl IntegrationEvent for OrderCancelledV1 {}

/// Brings the order read model up to date with one change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateOrderReadModel {
    pub order_id: OrderId,
    pub state: OrderState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cents: Option<i64>,
}

impl Message for UpdateOrderReadModel {
    const MESSAGE_TYPE: &'static str = "UpdateOrderReadModel";
}

impl InternalCommand for UpdateOrderReadModel {}
