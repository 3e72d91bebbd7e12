//! Outbox publisher for the transactional messaging core.
//!
//! Each publisher worker repeatedly:
//! 1. fetches deliverable messages oldest first
//! 2. defers messages whose cause is still pending
//! 3. claims each remaining message with a compare-and-swap
//! 4. delivers it through the port for its delivery type
//! 5. records success, retry with backoff, or dead-lettering

pub mod backoff;
pub mod config;
pub mod error;
pub mod publisher;
pub mod router;

pub use backoff::Backoff;
pub use config::OutboxConfig;
pub use error::{OutboxError, Result};
pub use publisher::{OutboxPublisher, TickReport};
pub use router::{DeliveryRouter, snake_case};
