//! PostgreSQL integration tests
//!
//! These tests share one PostgreSQL container and need Docker. Run with:
//!
//! ```bash
//! cargo test -p message-store --test postgres_integration -- --ignored
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use message_store::{
    CorrelationId, DeliverableQuery, DeliveryType, MessageFilter, MessageId, MessageStatus,
    MessageStore, MessageUpdate, NewMessage, PostgresMessageStore, StoreError, StoreTransaction,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_persisted_messages.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresMessageStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE persisted_messages, documents")
        .execute(&pool)
        .await
        .unwrap();

    PostgresMessageStore::new(pool)
}

fn new_message(delivery_type: DeliveryType) -> NewMessage {
    NewMessage {
        message_id: MessageId::new(),
        data_type: "OrderPlacedV1".to_string(),
        data: serde_json::json!({"message": {"orderId": 42}}),
        delivery_type,
        correlation_id: CorrelationId::new(),
        causation_id: None,
    }
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn staged_message_visible_after_commit() {
    let store = get_test_store().await;

    let mut tx = store.begin().await.unwrap();
    let staged = tx
        .insert_message(new_message(DeliveryType::Outbox))
        .await
        .unwrap();
    assert!(store.get(staged.id).await.unwrap().is_none());
    tx.commit().await.unwrap();

    let loaded = store.get(staged.id).await.unwrap().unwrap();
    assert_eq!(loaded.message_status, MessageStatus::Stored);
    assert_eq!(loaded.retry_count, 0);
    assert_eq!(loaded.version, 1);
    assert_eq!(loaded.data_type, "OrderPlacedV1");
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn rollback_discards_documents_and_messages() {
    let store = get_test_store().await;

    let mut tx = store.begin().await.unwrap();
    tx.save_document("orders", "42", serde_json::json!({"total": 10}), 0)
        .await
        .unwrap();
    tx.insert_message(new_message(DeliveryType::Outbox))
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    assert!(store.load_document("orders", "42").await.unwrap().is_none());
    assert!(store.find(&MessageFilter::new()).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn business_statements_share_the_transaction() {
    let store = get_test_store().await;

    let mut tx = store.begin().await.unwrap();
    sqlx::query("INSERT INTO documents (collection, key, version, body) VALUES ($1, $2, 1, $3)")
        .bind("orders")
        .bind("7")
        .bind(serde_json::json!({"raw": true}))
        .execute(tx.connection())
        .await
        .unwrap();
    tx.insert_message(new_message(DeliveryType::Outbox))
        .await
        .unwrap();
    drop(tx);

    assert!(store.load_document("orders", "7").await.unwrap().is_none());
    assert!(store.find(&MessageFilter::new()).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn duplicate_message_per_delivery_type_rejected() {
    let store = get_test_store().await;
    let message = new_message(DeliveryType::Inbox);

    let mut tx = store.begin().await.unwrap();
    tx.insert_message(message.clone()).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let result = tx.insert_message(message.clone()).await;
    assert!(matches!(
        result,
        Err(StoreError::DuplicateMessage {
            delivery_type: DeliveryType::Inbox,
            ..
        })
    ));

    // Same id on another delivery path is fine
    let mut tx = store.begin().await.unwrap();
    let mut outbox = message;
    outbox.delivery_type = DeliveryType::Outbox;
    tx.insert_message(outbox).await.unwrap();
    tx.commit().await.unwrap();
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn document_version_conflict() {
    let store = get_test_store().await;

    let mut tx = store.begin().await.unwrap();
    let doc = tx
        .save_document("orders", "42", serde_json::json!({"total": 10}), 0)
        .await
        .unwrap();
    assert_eq!(doc.version, 1);
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let result = tx
        .save_document("orders", "42", serde_json::json!({"total": 20}), 0)
        .await;
    assert!(matches!(
        result,
        Err(StoreError::ConcurrencyConflict {
            expected: 0,
            actual: 1,
            ..
        })
    ));
    drop(tx);

    let mut tx = store.begin().await.unwrap();
    let doc = tx
        .save_document("orders", "42", serde_json::json!({"total": 20}), 1)
        .await
        .unwrap();
    assert_eq!(doc.version, 2);
    tx.commit().await.unwrap();
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn compare_and_swap_has_one_winner() {
    let store = get_test_store().await;

    let mut tx = store.begin().await.unwrap();
    let record = tx
        .insert_message(new_message(DeliveryType::Outbox))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let claim = MessageUpdate::from_record(&record).status(MessageStatus::Processing);
    let (first, second) = tokio::join!(
        store.compare_and_swap(claim.clone()),
        store.compare_and_swap(claim)
    );

    let winners = [first.unwrap(), second.unwrap()]
        .into_iter()
        .filter(Option::is_some)
        .count();
    assert_eq!(winners, 1);

    let loaded = store.get(record.id).await.unwrap().unwrap();
    assert_eq!(loaded.message_status, MessageStatus::Processing);
    assert_eq!(loaded.version, 2);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn fetch_deliverable_respects_backoff_and_ceiling() {
    let store = get_test_store().await;

    let mut tx = store.begin().await.unwrap();
    let fresh = tx
        .insert_message(new_message(DeliveryType::Outbox))
        .await
        .unwrap();
    let retrying = tx
        .insert_message(new_message(DeliveryType::Internal))
        .await
        .unwrap();
    let exhausted = tx
        .insert_message(new_message(DeliveryType::Outbox))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let now = Utc::now();
    store
        .compare_and_swap(
            MessageUpdate::from_record(&retrying)
                .status(MessageStatus::Failed)
                .retry_count(1)
                .next_attempt_at(now + Duration::seconds(60)),
        )
        .await
        .unwrap()
        .unwrap();
    store
        .compare_and_swap(
            MessageUpdate::from_record(&exhausted)
                .status(MessageStatus::Failed)
                .retry_count(3)
                .dead_lettered(true),
        )
        .await
        .unwrap()
        .unwrap();

    let due = store
        .fetch_deliverable(&DeliverableQuery::new(now, 3, 10))
        .await
        .unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, fresh.id);

    let later = store
        .fetch_deliverable(&DeliverableQuery::new(now + Duration::seconds(120), 3, 10))
        .await
        .unwrap();
    let ids: Vec<_> = later.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![fresh.id, retrying.id]);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn fetch_deliverable_returns_expired_claims() {
    let store = get_test_store().await;

    let mut tx = store.begin().await.unwrap();
    let record = tx
        .insert_message(new_message(DeliveryType::Outbox))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let now = Utc::now();
    store
        .compare_and_swap(
            MessageUpdate::from_record(&record)
                .status(MessageStatus::Processing)
                .next_attempt_at(now + Duration::seconds(60)),
        )
        .await
        .unwrap()
        .unwrap();

    let held = store
        .fetch_deliverable(&DeliverableQuery::new(now, 3, 10))
        .await
        .unwrap();
    assert!(held.is_empty());

    let expired = store
        .fetch_deliverable(&DeliverableQuery::new(now + Duration::seconds(61), 3, 10))
        .await
        .unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].message_status, MessageStatus::Processing);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn find_with_filters() {
    let store = get_test_store().await;
    let correlation_id = CorrelationId::new();

    let mut tx = store.begin().await.unwrap();
    for delivery_type in [DeliveryType::Outbox, DeliveryType::Internal, DeliveryType::Outbox] {
        let mut message = new_message(delivery_type);
        message.correlation_id = correlation_id;
        tx.insert_message(message).await.unwrap();
    }
    tx.insert_message(new_message(DeliveryType::Outbox))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let outbox = store
        .find(
            &MessageFilter::new()
                .delivery_type(DeliveryType::Outbox)
                .correlation_id(correlation_id),
        )
        .await
        .unwrap();
    assert_eq!(outbox.len(), 2);

    let stored = store
        .find(
            &MessageFilter::new()
                .statuses(vec![MessageStatus::Stored, MessageStatus::Failed])
                .dead_lettered(false)
                .limit(2)
                .offset(1),
        )
        .await
        .unwrap();
    assert_eq!(stored.len(), 2);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn outgoing_statuses_ignore_inbox_rows() {
    let store = get_test_store().await;
    let message = new_message(DeliveryType::Outbox);
    let message_id = message.message_id;

    let mut tx = store.begin().await.unwrap();
    tx.insert_message(message.clone()).await.unwrap();
    let mut inbox = message;
    inbox.delivery_type = DeliveryType::Inbox;
    tx.insert_message(inbox).await.unwrap();
    tx.commit().await.unwrap();

    let statuses = store.outgoing_statuses(message_id).await.unwrap();
    assert_eq!(statuses, vec![MessageStatus::Stored]);
}
