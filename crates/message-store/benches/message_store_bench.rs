use chrono::Utc;
use criterion::{Criterion, criterion_group, criterion_main};
use message_store::{
    CorrelationId, DeliverableQuery, DeliveryType, InMemoryMessageStore, MessageId,
    MessageStatus, MessageStore, MessageUpdate, NewMessage, StoreTransaction,
};

fn make_message(delivery_type: DeliveryType) -> NewMessage {
    NewMessage {
        message_id: MessageId::new(),
        data_type: "OrderPlacedV1".to_string(),
        data: serde_json::json!({
            "message": {"orderId": 42},
            "metadata": {"headers": {"message-type": "OrderPlacedV1"}}
        }),
        delivery_type,
        correlation_id: CorrelationId::new(),
        causation_id: None,
    }
}

fn bench_stage_single_message(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("message_store/stage_single_message", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryMessageStore::new();
                let mut tx = store.begin().await.unwrap();
                tx.insert_message(make_message(DeliveryType::Outbox))
                    .await
                    .unwrap();
                tx.commit().await.unwrap();
            });
        });
    });
}

fn bench_stage_with_document(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("message_store/stage_with_document", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryMessageStore::new();
                let mut tx = store.begin().await.unwrap();
                tx.save_document("orders", "42", serde_json::json!({"total": 10}), 0)
                    .await
                    .unwrap();
                tx.insert_message(make_message(DeliveryType::Outbox))
                    .await
                    .unwrap();
                tx.commit().await.unwrap();
            });
        });
    });
}

fn bench_fetch_deliverable(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryMessageStore::new();

    // Pre-populate with 1000 messages
    rt.block_on(async {
        let mut tx = store.begin().await.unwrap();
        for _ in 0..1000 {
            tx.insert_message(make_message(DeliveryType::Outbox))
                .await
                .unwrap();
        }
        tx.commit().await.unwrap();
    });

    c.bench_function("message_store/fetch_deliverable_100_of_1000", |b| {
        b.iter(|| {
            rt.block_on(async {
                let query = DeliverableQuery::new(Utc::now(), 3, 100);
                store.fetch_deliverable(&query).await.unwrap();
            });
        });
    });
}

fn bench_claim(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("message_store/claim", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryMessageStore::new();
                let mut tx = store.begin().await.unwrap();
                let record = tx
                    .insert_message(make_message(DeliveryType::Outbox))
                    .await
                    .unwrap();
                tx.commit().await.unwrap();

                let update = MessageUpdate::from_record(&record).status(MessageStatus::Processing);
                store.compare_and_swap(update).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_stage_single_message,
    bench_stage_with_document,
    bench_fetch_deliverable,
    bench_claim,
);
criterion_main!(benches);
