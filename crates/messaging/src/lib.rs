//! Transactional messaging core.
//!
//! This crate provides:
//! - Envelopes carrying message identity and causal lineage
//! - The message persistence service, the only writer of the message store
//! - A startup-time type registry and the egress bus ports
//! - In-transaction dispatch of domain events to handlers that stage messages
//! - An idempotent inbox for messages received from the external bus

pub mod aggregate;
pub mod bus;
pub mod context;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod inbox;
pub mod message;
pub mod persistence;
pub mod registry;
pub mod validation;

pub use aggregate::{EventRecorder, RaisedEvent};
pub use bus::{
    BusError, ExternalEventBus, InMemoryEventBus, InProcessCommandBus, InternalCommandBus,
    LogEventBus, PublishedMessage,
};
pub use context::MessageContext;
pub use dispatcher::{DomainEventDispatcher, DomainEventHandler, HandlerContext, UnitOfWork};
pub use envelope::{
    Envelope, EnvelopeBuilder, EnvelopeMetadata, MESSAGE_TYPE_HEADER, RawEnvelope,
};
pub use error::{MessagingError, Result};
pub use inbox::{InboxConsumer, Received};
pub use message::{DomainEvent, IntegrationEvent, InternalCommand, Message};
pub use persistence::{DEFAULT_CLAIM_TIMEOUT, DEFAULT_MAX_RETRIES, MessagePersistenceService};
pub use registry::{MessageHandler, MessageRegistry};
pub use validation::{ValidationError, ValidationErrors};
