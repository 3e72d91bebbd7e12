use async_trait::async_trait;

use crate::{
    DeliverableQuery, Document, MessageFilter, MessageId, MessageStatus, MessageUpdate, NewMessage,
    PersistedMessage, PersistedMessageId, Result,
};

/// One atomic unit of work spanning business documents and staged messages.
///
/// Nothing written through a transaction is visible to other readers until
/// [`commit`](StoreTransaction::commit) succeeds. Dropping a transaction
/// without committing discards everything it wrote.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Stages a message in `Stored` state.
    ///
    /// Fails with `DuplicateMessage` if the same message id is already
    /// recorded for the same delivery type.
    async fn insert_message(&mut self, message: NewMessage) -> Result<PersistedMessage>;

    /// Reads a business document, seeing this transaction's own writes.
    async fn load_document(&mut self, collection: &str, key: &str) -> Result<Option<Document>>;

    /// Writes a business document with optimistic concurrency.
    ///
    /// `expected_version` is 0 for a new document. Returns the stored
    /// document at its new version, or `ConcurrencyConflict`.
    async fn save_document(
        &mut self,
        collection: &str,
        key: &str,
        body: serde_json::Value,
        expected_version: i64,
    ) -> Result<Document>;

    /// Makes every write of this transaction durable and visible.
    async fn commit(self) -> Result<()>;

    /// Discards every write of this transaction.
    async fn rollback(self) -> Result<()>;
}

/// Durable store of persisted messages.
///
/// All implementations must be thread-safe (Send + Sync). Status changes go
/// through [`compare_and_swap`](MessageStore::compare_and_swap) so that
/// concurrent publishers never both win the same message.
#[async_trait]
pub trait MessageStore: Send + Sync {
    type Transaction: StoreTransaction;

    /// Opens a new business transaction.
    async fn begin(&self) -> Result<Self::Transaction>;

    /// Retrieves a single persisted message.
    async fn get(&self, id: PersistedMessageId) -> Result<Option<PersistedMessage>>;

    /// Retrieves messages matching a filter, oldest first.
    async fn find(&self, filter: &MessageFilter) -> Result<Vec<PersistedMessage>>;

    /// Retrieves the next batch of messages eligible for delivery, oldest first.
    async fn fetch_deliverable(&self, query: &DeliverableQuery) -> Result<Vec<PersistedMessage>>;

    /// Applies `update` only if the row still matches its expectations.
    ///
    /// Returns the updated record, or `None` if another writer got there first.
    async fn compare_and_swap(&self, update: MessageUpdate) -> Result<Option<PersistedMessage>>;

    /// Statuses of the outgoing (non-inbox) rows carrying `message_id`.
    async fn outgoing_statuses(&self, message_id: MessageId) -> Result<Vec<MessageStatus>>;

    /// Reads a committed business document.
    async fn load_document(&self, collection: &str, key: &str) -> Result<Option<Document>>;
}
