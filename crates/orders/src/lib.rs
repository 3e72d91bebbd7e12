//! Order slice built on the transactional messaging core.
//!
//! Placing or cancelling an order writes the order document and stages, in
//! the same transaction:
//! - an integration event for other services (`OrderPlacedV1`, `OrderCancelledV1`)
//! - an `UpdateOrderReadModel` internal command for the local read model

pub mod error;
pub mod handlers;
pub mod messages;
pub mod order;
pub mod read_model;
pub mod repository;
pub mod service;

pub use error::{OrderError, OrdersError, Result};
pub use handlers::{PublishOrderCancelled, PublishOrderPlaced, ScheduleReadModelUpdate};
pub use messages::{OrderCancelledV1, OrderPlacedV1, UpdateOrderReadModel};
pub use order::{Order, OrderEvent, OrderId, OrderState};
pub use read_model::{OrderReadModel, OrderSummary, UpdateOrderReadModelHandler};
pub use repository::{ORDERS_COLLECTION, OrderRepository};
pub use service::{CancelOrder, OrderService, PlaceOrder, register_messages};
