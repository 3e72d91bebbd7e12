//! In-transaction dispatch of domain events to their handlers.

use std::sync::Arc;

use async_trait::async_trait;
use message_store::{MessageStore, PersistedMessage, StoreTransaction};

use crate::aggregate::{RaisedEvent, raise_order};
use crate::context::MessageContext;
use crate::envelope::Envelope;
use crate::error::{MessagingError, Result};
use crate::message::{DomainEvent, IntegrationEvent, InternalCommand};
use crate::persistence::MessagePersistenceService;

/// What a domain event handler may touch: the business transaction, the
/// persistence service, and the causal context of the event being handled.
pub struct HandlerContext<'a, S: MessageStore> {
    message: MessageContext,
    tx: &'a mut S::Transaction,
    persistence: &'a MessagePersistenceService<S>,
}

impl<'a, S: MessageStore> HandlerContext<'a, S> {
    pub fn new(
        message: MessageContext,
        tx: &'a mut S::Transaction,
        persistence: &'a MessagePersistenceService<S>,
    ) -> Self {
        Self {
            message,
            tx,
            persistence,
        }
    }

    /// Context for messages caused by the event being handled.
    pub fn message_context(&self) -> &MessageContext {
        &self.message
    }

    pub fn transaction(&mut self) -> &mut S::Transaction {
        &mut *self.tx
    }

    pub fn persistence(&self) -> &MessagePersistenceService<S> {
        self.persistence
    }

    /// Stages an integration event in the surrounding transaction.
    pub async fn stage_event<M: IntegrationEvent>(&mut self, event: M) -> Result<PersistedMessage> {
        self.persistence
            .stage_event(self.tx, &self.message, event)
            .await
    }

    /// Stages internal commands in the surrounding transaction.
    pub async fn schedule<C: InternalCommand>(
        &mut self,
        commands: Vec<C>,
    ) -> Result<Vec<PersistedMessage>> {
        self.persistence
            .schedule(self.tx, &self.message, commands)
            .await
    }
}

/// An in-process reaction to a domain event, run before commit.
#[async_trait]
pub trait DomainEventHandler<S: MessageStore, E: DomainEvent>: Send + Sync {
    /// Returns the handler name, reported when the handler fails.
    fn name(&self) -> &'static str;

    async fn handle(&self, ctx: &mut HandlerContext<'_, S>, event: &Envelope<E>) -> Result<()>;
}

/// Runs every registered handler for each raised event, in raise order.
///
/// Handlers are registered once at startup and run sequentially in
/// registration order. The first failure aborts the dispatch.
pub struct DomainEventDispatcher<S: MessageStore, E: DomainEvent> {
    persistence: MessagePersistenceService<S>,
    handlers: Vec<Arc<dyn DomainEventHandler<S, E>>>,
}

impl<S: MessageStore, E: DomainEvent> DomainEventDispatcher<S, E> {
    pub fn new(persistence: MessagePersistenceService<S>) -> Self {
        Self {
            persistence,
            handlers: Vec::new(),
        }
    }

    /// Registers a handler with this dispatcher.
    pub fn register<H: DomainEventHandler<S, E> + 'static>(&mut self, handler: H) -> &mut Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn persistence(&self) -> &MessagePersistenceService<S> {
        &self.persistence
    }

    /// Dispatches `events` inside `tx` and returns how many were dispatched.
    ///
    /// Each event is wrapped in `ctx`; messages its handlers stage are caused
    /// by that event's envelope.
    #[tracing::instrument(skip(self, tx, events), fields(events = events.len()))]
    pub async fn dispatch(
        &self,
        ctx: &MessageContext,
        tx: &mut S::Transaction,
        mut events: Vec<RaisedEvent<E>>,
    ) -> Result<usize> {
        raise_order(&mut events);
        let count = events.len();

        for raised in events {
            let envelope = Envelope::wrap_event(raised.event, ctx);
            let event_type = envelope.message().event_type();
            let caused = MessageContext::caused_by(envelope.metadata());

            for handler in &self.handlers {
                let mut handler_ctx = HandlerContext::new(caused, tx, &self.persistence);
                if let Err(e) = handler.handle(&mut handler_ctx, &envelope).await {
                    tracing::warn!(
                        handler = handler.name(),
                        event_type,
                        error = %e,
                        "domain event handler failed"
                    );
                    return Err(MessagingError::DomainEventHandling {
                        handler: handler.name().to_string(),
                        event_type: event_type.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(count)
    }
}

/// One business transaction: the aggregate write plus the messages its
/// domain events stage.
///
/// Dropping a unit of work without calling [`commit`](UnitOfWork::commit)
/// rolls everything back, so returning early with `?` on any error leaves
/// nothing behind.
pub struct UnitOfWork<'d, S: MessageStore, E: DomainEvent> {
    dispatcher: &'d DomainEventDispatcher<S, E>,
    ctx: MessageContext,
    tx: S::Transaction,
    dispatched: usize,
}

impl<'d, S: MessageStore, E: DomainEvent> UnitOfWork<'d, S, E> {
    pub async fn begin(
        dispatcher: &'d DomainEventDispatcher<S, E>,
        ctx: MessageContext,
    ) -> Result<Self> {
        let tx = dispatcher.persistence().begin().await?;
        Ok(Self {
            dispatcher,
            ctx,
            tx,
            dispatched: 0,
        })
    }

    pub fn context(&self) -> &MessageContext {
        &self.ctx
    }

    /// The business transaction, for aggregate reads and writes.
    pub fn transaction(&mut self) -> &mut S::Transaction {
        &mut self.tx
    }

    /// Dispatches raised events, staging their messages in this transaction.
    pub async fn dispatch(&mut self, events: Vec<RaisedEvent<E>>) -> Result<usize> {
        let count = self
            .dispatcher
            .dispatch(&self.ctx, &mut self.tx, events)
            .await?;
        self.dispatched += count;
        Ok(count)
    }

    /// Commits the aggregate write and the staged messages together.
    ///
    /// Returns the number of domain events dispatched.
    pub async fn commit(self) -> Result<usize> {
        self.tx.commit().await?;
        tracing::debug!(events = self.dispatched, "unit of work committed");
        Ok(self.dispatched)
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
