pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod record;
pub mod status;
pub mod store;

pub use common::{CorrelationId, MessageId, PersistedMessageId};
pub use error::{Result, StoreError};
pub use memory::{InMemoryMessageStore, InMemoryTransaction};
pub use postgres::{PostgresMessageStore, PostgresTransaction};
pub use query::{DeliverableQuery, MessageFilter};
pub use record::{Document, MessageUpdate, NewMessage, PersistedMessage};
pub use status::{DeliveryType, MessageStatus, TransitionRejection, check_transition};
pub use store::{MessageStore, StoreTransaction};
