//! Domain event handlers run inside the order's unit of work.

use async_trait::async_trait;
use message_store::MessageStore;
use messaging::{DomainEventHandler, Envelope, HandlerContext};

use crate::messages::{OrderCancelledV1, OrderPlacedV1, UpdateOrderReadModel};
use crate::order::{OrderEvent, OrderState};

/// Stages `OrderPlacedV1` for other services.
pub struct PublishOrderPlaced;

#[async_trait]
impl<S: MessageStore + 'static> DomainEventHandler<S, OrderEvent> for PublishOrderPlaced {
    fn name(&self) -> &'static str {
        "PublishOrderPlaced"
    }

    async fn handle(
        &self,
        ctx: &mut HandlerContext<'_, S>,
        event: &Envelope<OrderEvent>,
    ) -> messaging::Result<()> {
        if let OrderEvent::OrderPlaced {
            order_id,
            customer,
            total_cents,
        } = event.message()
        {
            ctx.stage_event(OrderPlacedV1 {
                order_id: *order_id,
                customer: customer.clone(),
                total_cents: *total_cents,
            })
            .await?;
        }
        Ok(())
    }
}

/// Stages `OrderCancelledV1` for other services.
pub struct PublishOrderCancelled;

#[async_trait]
impl<S: MessageStore + 'static> DomainEventHandler<S, OrderEvent> for PublishOrderCancelled {
    fn name(&self) -> &'static str {
        "PublishOrderCancelled"
    }

    async fn handle(
        &self,
        ctx: &mut HandlerContext<'_, S>,
        event: &Envelope<OrderEvent>,
    ) -> messaging::Result<()> {
        if let OrderEvent::OrderCancelled { order_id, reason } = event.message() {
            ctx.stage_event(OrderCancelledV1 {
                order_id: *order_id,
                reason: reason.clone(),
            })
            .await?;
        }
        Ok(())
    }
}

/// Stages an `UpdateOrderReadModel` command for every order event.
pub struct ScheduleReadModelUpdate;

#[async_trait]
impl<S: MessageStore + 'static> DomainEventHandler<S, OrderEvent> for ScheduleReadModelUpdate {
    fn name(&self) -> &'static str {
        "ScheduleReadModelUpdate"
    }

    async fn handle(
        &self,
        ctx: &mut HandlerContext<'_, S>,
        event: &Envelope<OrderEvent>,
    ) -> messaging::Result<()> {
        let command = match event.message() {
            OrderEvent::OrderPlaced {
                order_id,
                customer,
                total_cents,
            } => UpdateOrderReadModel {
                order_id: *order_id,
                state: OrderState::Placed,
                customer: Some(customer.clone()),
                total_cents: Some(*total_cents),
            },
            OrderEvent::OrderCancelled { order_id, .. } => UpdateOrderReadModel {
                order_id: *order_id,
                state: OrderState::Cancelled,
                customer: None,
                total_cents: None,
            },
        };
        ctx.schedule(vec![command]).await?;
        Ok(())
    }
}
