//! Marker traits for the kinds of messages that flow through the system.

use serde::{Serialize, de::DeserializeOwned};

/// A payload type that can travel inside an envelope.
///
/// `MESSAGE_TYPE` is the stable name the payload is registered under and the
/// value of the envelope's `message-type` header. Renaming a Rust type must not
/// change it.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    const MESSAGE_TYPE: &'static str;
}

/// A message intended for other services, delivered via the external bus.
pub trait IntegrationEvent: Message {}

/// A message intended for another in-process handler.
pub trait InternalCommand: Message {}

/// In-process notification raised by an aggregate on state change.
///
/// Domain events are consumed before the owning transaction commits and are
/// never persisted themselves.
pub trait DomainEvent: Serialize + Send + Sync + Clone + 'static {
    /// Returns the event type name.
    fn event_type(&self) -> &'static str;
}
