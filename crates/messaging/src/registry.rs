//! Startup-time registry mapping message type names to decode and handle functions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::context::MessageContext;
use crate::envelope::{Envelope, RawEnvelope};
use crate::error::{MessagingError, Result};
use crate::message::Message;

/// Handles one message type delivered through the internal command path.
#[async_trait]
pub trait MessageHandler<M: Message>: Send + Sync {
    /// Returns the handler name, used in logs.
    fn name(&self) -> &'static str;

    async fn handle(&self, envelope: Envelope<M>) -> Result<()>;
}

type DecodeFn = fn(&RawEnvelope) -> Result<()>;
type HandleFn = Arc<dyn Fn(RawEnvelope) -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct Registration {
    decode: DecodeFn,
    handler: Option<(&'static str, HandleFn)>,
}

fn decode_as<M: Message>(raw: &RawEnvelope) -> Result<()> {
    raw.unwrap::<M>().map(|_| ())
}

/// Known message types, filled once at process start.
#[derive(Default)]
pub struct MessageRegistry {
    entries: HashMap<&'static str, Registration>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a payload type without an in-process handler.
    pub fn register<M: Message>(&mut self) -> &mut Self {
        self.entries
            .entry(M::MESSAGE_TYPE)
            .or_insert_with(|| Registration {
                decode: decode_as::<M>,
                handler: None,
            });
        self
    }

    /// Registers a payload type together with its handler.
    ///
    /// A later registration for the same type replaces the earlier handler.
    pub fn register_handler<M, H>(&mut self, handler: H) -> &mut Self
    where
        M: Message,
        H: MessageHandler<M> + 'static,
    {
        let name = handler.name();
        let handler = Arc::new(handler);
        let handle: HandleFn = Arc::new(move |raw: RawEnvelope| {
            let handler = Arc::clone(&handler);
            async move {
                let envelope = raw.unwrap::<M>()?;
                handler.handle(envelope).await
            }
            .boxed()
        });

        self.entries.insert(
            M::MESSAGE_TYPE,
            Registration {
                decode: decode_as::<M>,
                handler: Some((name, handle)),
            },
        );
        self
    }

    pub fn is_registered(&self, message_type: &str) -> bool {
        self.entries.contains_key(message_type)
    }

    pub fn has_handler(&self, message_type: &str) -> bool {
        self.entries
            .get(message_type)
            .is_some_and(|r| r.handler.is_some())
    }

    /// Registered type names, sorted.
    pub fn message_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.entries.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Wraps a payload, refusing types that were never registered.
    pub fn wrap<M: Message>(&self, message: M, ctx: &MessageContext) -> Result<Envelope<M>> {
        if !self.is_registered(M::MESSAGE_TYPE) {
            return Err(MessagingError::UnregisteredMessageType(
                M::MESSAGE_TYPE.to_string(),
            ));
        }
        Ok(Envelope::wrap(message, ctx))
    }

    fn lookup(&self, raw: &RawEnvelope) -> Result<&Registration> {
        let message_type = raw.message_type().unwrap_or("<none>");
        self.entries
            .get(message_type)
            .ok_or_else(|| MessagingError::UnregisteredMessageType(message_type.to_string()))
    }

    /// Checks that a raw envelope decodes as its declared, registered type.
    pub fn decode(&self, raw: &RawEnvelope) -> Result<()> {
        (self.lookup(raw)?.decode)(raw)
    }

    /// Runs the registered handler for a raw envelope.
    pub async fn dispatch(&self, raw: RawEnvelope) -> Result<()> {
        let registration = self.lookup(&raw)?;
        let Some((name, handle)) = &registration.handler else {
            return Err(MessagingError::Scheduling(format!(
                "no handler registered for {}",
                raw.message_type().unwrap_or("<none>")
            )));
        };

        tracing::debug!(
            handler = name,
            message_id = %raw.metadata().message_id(),
            "dispatching message"
        );
        (**handle)(raw).await
    }
}

impl std::fmt::Debug for MessageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRegistry")
            .field("message_types", &self.message_types())
            .finish()
    }
}
