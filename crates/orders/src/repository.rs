//! Loads and saves orders as business documents inside a transaction.

use message_store::StoreTransaction;

use crate::error::Result;
use crate::order::{Order, OrderId};

/// Document collection holding order aggregates.
pub const ORDERS_COLLECTION: &str = "orders";

/// Order persistence over the business transaction.
///
/// Saves are optimistic: the document must still be at the version the
/// order was loaded at.
pub struct OrderRepository;

impl OrderRepository {
    pub async fn load<T: StoreTransaction>(tx: &mut T, id: OrderId) -> Result<Option<Order>> {
        let Some(document) = tx.load_document(ORDERS_COLLECTION, &id.to_string()).await? else {
            return Ok(None);
        };
        let mut order: Order = serde_json::from_value(document.body)?;
        order.set_version(document.version);
        Ok(Some(order))
    }

    pub async fn save<T: StoreTransaction>(tx: &mut T, order: &mut Order) -> Result<()> {
        let body = serde_json::to_value(&*order)?;
        let document = tx
            .save_document(
                ORDERS_COLLECTION,
                &order.id().to_string(),
                body,
                order.version(),
            )
            .await?;
        order.set_version(document.version);
        Ok(())
    }
}
