//! Order error types.

use thiserror::Error;

use crate::order::{OrderId, OrderState};

/// Business rule violations raised by the order aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// Customer is required.
    #[error("Customer is required")]
    CustomerRequired,

    /// Order totals must be positive.
    #[error("Invalid total: {total_cents} (must be greater than 0)")]
    InvalidTotal { total_cents: i64 },

    /// Order is not in the expected state.
    #[error("Invalid state transition: cannot {action} from {current_state} state")]
    InvalidStateTransition {
        current_state: OrderState,
        action: &'static str,
    },

    /// An order with this id already exists.
    #[error("Order {0} already placed")]
    AlreadyPlaced(OrderId),
}

/// Errors that can occur in order service operations.
#[derive(Debug, Error)]
pub enum OrdersError {
    /// A business rule was violated.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// The order does not exist.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// Staging or dispatching messages failed.
    #[error("Messaging error: {0}")]
    Messaging(#[from] messaging::MessagingError),

    /// The business document could not be read or written.
    #[error("Store error: {0}")]
    Store(#[from] message_store::StoreError),

    /// The order document could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for order service operations.
pub type Result<T> = std::result::Result<T, OrdersError>;
