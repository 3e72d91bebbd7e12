use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    DeliverableQuery, DeliveryType, Document, MessageFilter, MessageId, MessageStatus,
    MessageUpdate, NewMessage, PersistedMessage, PersistedMessageId, Result, StoreError,
    store::{MessageStore, StoreTransaction},
};

#[derive(Debug, Default)]
struct MemoryState {
    messages: BTreeMap<PersistedMessageId, PersistedMessage>,
    documents: HashMap<(String, String), Document>,
}

impl MemoryState {
    fn has_message(&self, message_id: MessageId, delivery_type: DeliveryType) -> bool {
        self.messages
            .values()
            .any(|m| m.message_id == message_id && m.delivery_type == delivery_type)
    }

    fn document_version(&self, collection: &str, key: &str) -> i64 {
        self.documents
            .get(&(collection.to_string(), key.to_string()))
            .map(|d| d.version)
            .unwrap_or(0)
    }
}

/// In-memory message store for tests and single-process deployments.
///
/// Provides the same transactional and compare-and-swap semantics as the
/// PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryMessageStore {
    state: Arc<RwLock<MemoryState>>,
    next_id: Arc<AtomicI64>,
    fail_on_document_write: Arc<AtomicBool>,
}

impl InMemoryMessageStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of committed messages.
    pub async fn message_count(&self) -> usize {
        self.state.read().await.messages.len()
    }

    /// Returns the total number of committed business documents.
    pub async fn document_count(&self) -> usize {
        self.state.read().await.documents.len()
    }

    /// Clears all messages and documents.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.messages.clear();
        state.documents.clear();
    }

    /// Makes every subsequent document write fail with a backend error.
    pub fn set_fail_on_document_write(&self, fail: bool) {
        self.fail_on_document_write.store(fail, Ordering::SeqCst);
    }

    fn allocate_id(&self) -> PersistedMessageId {
        PersistedMessageId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

fn sort_oldest_first(messages: &mut [PersistedMessage]) {
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> Result<InMemoryTransaction> {
        Ok(InMemoryTransaction {
            store: self.clone(),
            messages: Vec::new(),
            documents: Vec::new(),
        })
    }

    async fn get(&self, id: PersistedMessageId) -> Result<Option<PersistedMessage>> {
        Ok(self.state.read().await.messages.get(&id).cloned())
    }

    async fn find(&self, filter: &MessageFilter) -> Result<Vec<PersistedMessage>> {
        let state = self.state.read().await;
        let mut messages: Vec<_> = state
            .messages
            .values()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect();
        sort_oldest_first(&mut messages);

        let offset = filter.offset.unwrap_or(0);
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(messages.into_iter().skip(offset).take(limit).collect())
    }

    async fn fetch_deliverable(&self, query: &DeliverableQuery) -> Result<Vec<PersistedMessage>> {
        let state = self.state.read().await;
        let mut messages: Vec<_> = state
            .messages
            .values()
            .filter(|m| query.matches(m))
            .cloned()
            .collect();
        sort_oldest_first(&mut messages);
        messages.truncate(query.limit);
        Ok(messages)
    }

    async fn compare_and_swap(&self, update: MessageUpdate) -> Result<Option<PersistedMessage>> {
        let mut state = self.state.write().await;
        let record = state
            .messages
            .get_mut(&update.id)
            .ok_or(StoreError::MessageNotFound(update.id))?;

        if !update.matches(record) {
            return Ok(None);
        }

        record.apply(&update);
        Ok(Some(record.clone()))
    }

    async fn outgoing_statuses(&self, message_id: MessageId) -> Result<Vec<MessageStatus>> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .values()
            .filter(|m| m.message_id == message_id && m.delivery_type != DeliveryType::Inbox)
            .map(|m| m.message_status)
            .collect())
    }

    async fn load_document(&self, collection: &str, key: &str) -> Result<Option<Document>> {
        let state = self.state.read().await;
        Ok(state
            .documents
            .get(&(collection.to_string(), key.to_string()))
            .cloned())
    }
}

#[derive(Debug)]
struct PendingDocument {
    expected_version: i64,
    document: Document,
}

/// Buffered writes of one in-memory business transaction.
pub struct InMemoryTransaction {
    store: InMemoryMessageStore,
    messages: Vec<PersistedMessage>,
    documents: Vec<PendingDocument>,
}

impl InMemoryTransaction {
    fn pending_document(&self, collection: &str, key: &str) -> Option<&Document> {
        self.documents
            .iter()
            .rev()
            .map(|p| &p.document)
            .find(|d| d.collection == collection && d.key == key)
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn insert_message(&mut self, message: NewMessage) -> Result<PersistedMessage> {
        let duplicate_pending = self.messages.iter().any(|m| {
            m.message_id == message.message_id && m.delivery_type == message.delivery_type
        });
        if duplicate_pending
            || self
                .store
                .state
                .read()
                .await
                .has_message(message.message_id, message.delivery_type)
        {
            return Err(StoreError::DuplicateMessage {
                message_id: message.message_id,
                delivery_type: message.delivery_type,
            });
        }

        let record = PersistedMessage::stored(self.store.allocate_id(), message, Utc::now());
        self.messages.push(record.clone());
        Ok(record)
    }

    async fn load_document(&mut self, collection: &str, key: &str) -> Result<Option<Document>> {
        if let Some(document) = self.pending_document(collection, key) {
            return Ok(Some(document.clone()));
        }
        self.store.load_document(collection, key).await
    }

    async fn save_document(
        &mut self,
        collection: &str,
        key: &str,
        body: serde_json::Value,
        expected_version: i64,
    ) -> Result<Document> {
        if self.store.fail_on_document_write.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(format!(
                "document write rejected for {collection}/{key}"
            )));
        }

        let actual = match self.pending_document(collection, key) {
            Some(document) => document.version,
            None => self
                .store
                .state
                .read()
                .await
                .document_version(collection, key),
        };

        if actual != expected_version {
            return Err(StoreError::ConcurrencyConflict {
                collection: collection.to_string(),
                key: key.to_string(),
                expected: expected_version,
                actual,
            });
        }

        let document = Document {
            collection: collection.to_string(),
            key: key.to_string(),
            version: expected_version + 1,
            body,
            updated_at: Utc::now(),
        };
        self.documents.push(PendingDocument {
            expected_version,
            document: document.clone(),
        });
        Ok(document)
    }

    async fn commit(self) -> Result<()> {
        let mut state = self.store.state.write().await;

        // Re-validate against writers that committed after our reads.
        let mut versions: HashMap<(String, String), i64> = HashMap::new();
        for pending in &self.documents {
            let doc = &pending.document;
            let slot = (doc.collection.clone(), doc.key.clone());
            let current = *versions
                .entry(slot.clone())
                .or_insert_with(|| state.document_version(&doc.collection, &doc.key));
            if current != pending.expected_version {
                return Err(StoreError::ConcurrencyConflict {
                    collection: doc.collection.clone(),
                    key: doc.key.clone(),
                    expected: pending.expected_version,
                    actual: current,
                });
            }
            versions.insert(slot, doc.version);
        }

        for message in &self.messages {
            if state.has_message(message.message_id, message.delivery_type) {
                return Err(StoreError::DuplicateMessage {
                    message_id: message.message_id,
                    delivery_type: message.delivery_type,
                });
            }
        }

        for pending in self.documents {
            let doc = pending.document;
            state
                .documents
                .insert((doc.collection.clone(), doc.key.clone()), doc);
        }

        let staged = self.messages.len();
        for message in self.messages {
            state.messages.insert(message.id, message);
        }

        tracing::debug!(staged, "in-memory transaction committed");
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        tracing::debug!(discarded = self.messages.len(), "in-memory transaction rolled back");
        Ok(())
    }
}
