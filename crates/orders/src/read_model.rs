//! Order summaries kept up to date by internal commands.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use messaging::{Envelope, MessageHandler};
use tokio::sync::RwLock;

use crate::messages::UpdateOrderReadModel;
use crate::order::{OrderId, OrderState};

/// One row of the order read model.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSummary {
    pub order_id: OrderId,
    pub customer: Option<String>,
    pub total_cents: Option<i64>,
    pub state: OrderState,
    pub updated_at: DateTime<Utc>,
}

/// In-memory order read model.
#[derive(Debug, Clone, Default)]
pub struct OrderReadModel {
    orders: Arc<RwLock<HashMap<OrderId, OrderSummary>>>,
    applied: Arc<AtomicUsize>,
}

impl OrderReadModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, order_id: OrderId) -> Option<OrderSummary> {
        self.orders.read().await.get(&order_id).cloned()
    }

    pub async fn all(&self) -> Vec<OrderSummary> {
        let mut orders: Vec<_> = self.orders.read().await.values().cloned().collect();
        orders.sort_by_key(|o| o.order_id);
        orders
    }

    /// Number of updates applied so far.
    pub fn applied_count(&self) -> usize {
        self.applied.load(Ordering::SeqCst)
    }

    /// Folds one update into the view; absent fields keep their value.
    pub async fn apply(&self, update: &UpdateOrderReadModel, at: DateTime<Utc>) {
        let mut orders = self.orders.write().await;
        let summary = orders
            .entry(update.order_id)
            .or_insert_with(|| OrderSummary {
                order_id: update.order_id,
                customer: None,
                total_cents: None,
                state: update.state,
                updated_at: at,
            });

        summary.state = update.state;
        summary.updated_at = at;
        if let Some(ref customer) = update.customer {
            summary.customer = Some(customer.clone());
        }
        if let Some(total_cents) = update.total_cents {
            summary.total_cents = Some(total_cents);
        }
        self.applied.fetch_add(1, Ordering::SeqCst);
    }
}

/// Applies `UpdateOrderReadModel` commands to an [`OrderReadModel`].
pub struct UpdateOrderReadModelHandler {
    read_model: OrderReadModel,
}

impl UpdateOrderReadModelHandler {
    pub fn new(read_model: OrderReadModel) -> Self {
        Self { read_model }
    }
}

#[async_trait]
impl MessageHandler<UpdateOrderReadModel> for UpdateOrderReadModelHandler {
    fn name(&self) -> &'static str {
        "UpdateOrderReadModelHandler"
    }

    async fn handle(&self, envelope: Envelope<UpdateOrderReadModel>) -> messaging::Result<()> {
        let at = envelope.metadata().created_at();
        let update = envelope.into_message();
        self.read_model.apply(&update, at).await;
        tracing::debug!(order_id = %update.order_id, state = %update.state, "order read model updated");
        Ok(())
    }
}
