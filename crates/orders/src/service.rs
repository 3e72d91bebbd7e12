//! Order service running each command as one unit of work.

use message_store::{MessageStore, PersistedMessage};
use messaging::{
    DomainEventDispatcher, MessageContext, MessagePersistenceService, MessageRegistry, UnitOfWork,
};

use crate::error::{OrderError, OrdersError, Result};
use crate::handlers::{PublishOrderCancelled, PublishOrderPlaced, ScheduleReadModelUpdate};
use crate::messages::{OrderCancelledV1, OrderPlacedV1, UpdateOrderReadModel};
use crate::order::{Order, OrderEvent, OrderId};
use crate::read_model::{OrderReadModel, UpdateOrderReadModelHandler};
use crate::repository::{ORDERS_COLLECTION, OrderRepository};

/// Command to place a new order.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub customer: String,
    pub total_cents: i64,
}

/// Command to cancel an order.
#[derive(Debug, Clone)]
pub struct CancelOrder {
    pub order_id: OrderId,
    pub reason: String,
}

/// Registers every message type the order slice sends, and the read-model
/// handler for its internal command.
pub fn register_messages(registry: &mut MessageRegistry, read_model: &OrderReadModel) {
    registry
        .register::<OrderPlacedV1>()
        .register::<OrderCancelledV1>()
        .register_handler::<UpdateOrderReadModel, _>(UpdateOrderReadModelHandler::new(
            read_model.clone(),
        ));
}

/// Service for placing and cancelling orders.
///
/// The order document and every message its events stage are committed
/// together or not at all.
pub struct OrderService<S: MessageStore> {
    dispatcher: DomainEventDispatcher<S, OrderEvent>,
}

impl<S: MessageStore + 'static> OrderService<S> {
    pub fn new(persistence: MessagePersistenceService<S>) -> Self {
        let mut dispatcher = DomainEventDispatcher::new(persistence);
        dispatcher
            .register(PublishOrderPlaced)
            .register(PublishOrderCancelled)
            .register(ScheduleReadModelUpdate);
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &DomainEventDispatcher<S, OrderEvent> {
        &self.dispatcher
    }

    /// Places an order; `ctx` carries the caller's correlation.
    #[tracing::instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id()))]
    pub async fn place_order(&self, ctx: &MessageContext, cmd: PlaceOrder) -> Result<Order> {
        let mut uow = UnitOfWork::begin(&self.dispatcher, *ctx).await?;
        if OrderRepository::load(uow.transaction(), cmd.order_id)
            .await?
            .is_some()
        {
            return Err(OrderError::AlreadyPlaced(cmd.order_id).into());
        }

        let mut order = Order::place(cmd.order_id, cmd.customer, cmd.total_cents)?;
        uow.dispatch(order.take_events()).await?;
        OrderRepository::save(uow.transaction(), &mut order).await?;
        uow.commit().await?;

        tracing::info!(order_id = %order.id(), "order placed");
        Ok(order)
    }

    /// Cancels an order.
    #[tracing::instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id()))]
    pub async fn cancel_order(&self, ctx: &MessageContext, cmd: CancelOrder) -> Result<Order> {
        let mut uow = UnitOfWork::begin(&self.dispatcher, *ctx).await?;
        let mut order = OrderRepository::load(uow.transaction(), cmd.order_id)
            .await?
            .ok_or(OrdersError::NotFound(cmd.order_id))?;

        order.cancel(cmd.reason)?;
        uow.dispatch(order.take_events()).await?;
        OrderRepository::save(uow.transaction(), &mut order).await?;
        uow.commit().await?;

        tracing::info!(order_id = %order.id(), "order cancelled");
        Ok(order)
    }

    /// Reads the committed order.
    pub async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let store = self.dispatcher.persistence().store();
        let Some(document) = store
            .load_document(ORDERS_COLLECTION, &order_id.to_string())
            .await?
        else {
            return Ok(None);
        };
        let mut order: Order = serde_json::from_value(document.body)?;
        order.set_version(document.version);
        Ok(Some(order))
    }

    /// Messages staged under one correlation, oldest first.
    pub async fn messages_for(&self, ctx: &MessageContext) -> Result<Vec<PersistedMessage>> {
        Ok(self
            .dispatcher
            .persistence()
            .get_by_filter(message_store::MessageFilter::new().correlation_id(ctx.correlation_id()))
            .await?)
    }
}
