use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgConnection, PgPool, Postgres, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    CorrelationId, DeliverableQuery, Document, MessageFilter, MessageId,
    MessageStatus, MessageUpdate, NewMessage, PersistedMessage, PersistedMessageId, Result,
    StoreError,
    store::{MessageStore, StoreTransaction},
};

const MESSAGE_COLUMNS: &str = "id, message_id, data_type, data, delivery_type, message_status, \
     created_at, retry_count, deferral_count, last_processed_at, next_attempt_at, \
     correlation_id, causation_id, dead_lettered, last_error, version";

/// PostgreSQL-backed message store.
#[derive(Clone)]
pub struct PostgresMessageStore {
    pool: PgPool,
}

impl PostgresMessageStore {
    /// Creates a new PostgreSQL message store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool of at most `max_connections` to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn row_to_message(row: PgRow) -> Result<PersistedMessage> {
    let delivery_type: String = row.try_get("delivery_type")?;
    let message_status: String = row.try_get("message_status")?;

    Ok(PersistedMessage {
        id: PersistedMessageId::new(row.try_get("id")?),
        message_id: MessageId::from_uuid(row.try_get::<Uuid, _>("message_id")?),
        data_type: row.try_get("data_type")?,
        data: row.try_get("data")?,
        delivery_type: delivery_type.parse()?,
        message_status: message_status.parse()?,
        created_at: row.try_get("created_at")?,
        retry_count: to_count(row.try_get("retry_count")?)?,
        deferral_count: to_count(row.try_get("deferral_count")?)?,
        last_processed_at: row.try_get("last_processed_at")?,
        next_attempt_at: row.try_get("next_attempt_at")?,
        correlation_id: CorrelationId::from_uuid(row.try_get::<Uuid, _>("correlation_id")?),
        causation_id: row
            .try_get::<Option<Uuid>, _>("causation_id")?
            .map(MessageId::from_uuid),
        dead_lettered: row.try_get("dead_lettered")?,
        last_error: row.try_get("last_error")?,
        version: row.try_get("version")?,
    })
}

fn row_to_document(row: PgRow) -> Result<Document> {
    Ok(Document {
        collection: row.try_get("collection")?,
        key: row.try_get("key")?,
        version: row.try_get("version")?,
        body: row.try_get("body")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn to_count(value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::Decode(format!("negative counter {value}")))
}

async fn load_document_with(
    conn: &mut PgConnection,
    collection: &str,
    key: &str,
) -> Result<Option<Document>> {
    let row = sqlx::query(
        r#"
        SELECT collection, key, version, body, updated_at
        FROM documents
        WHERE collection = $1 AND key = $2
        "#,
    )
    .bind(collection)
    .bind(key)
    .fetch_optional(conn)
    .await?;

    row.map(row_to_document).transpose()
}

#[async_trait]
impl MessageStore for PostgresMessageStore {
    type Transaction = PostgresTransaction;

    async fn begin(&self) -> Result<PostgresTransaction> {
        Ok(PostgresTransaction {
            tx: self.pool.begin().await?,
        })
    }

    async fn get(&self, id: PersistedMessageId) -> Result<Option<PersistedMessage>> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM persisted_messages WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_message).transpose()
    }

    async fn find(&self, filter: &MessageFilter) -> Result<Vec<PersistedMessage>> {
        let mut sql = format!("SELECT {MESSAGE_COLUMNS} FROM persisted_messages WHERE 1=1");
        let mut param_count = 0;

        // Build dynamic query
        if filter.delivery_type.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND delivery_type = ${param_count}"));
        }
        if filter.statuses.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND message_status = ANY(${param_count})"));
        }
        if filter.data_type.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND data_type = ${param_count}"));
        }
        if filter.correlation_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND correlation_id = ${param_count}"));
        }
        if filter.message_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND message_id = ${param_count}"));
        }
        if filter.dead_lettered.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND dead_lettered = ${param_count}"));
        }
        if filter.from_created_at.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND created_at >= ${param_count}"));
        }
        if filter.to_created_at.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND created_at <= ${param_count}"));
        }

        sql.push_str(" ORDER BY created_at ASC, id ASC");

        if filter.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if filter.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut query = sqlx::query(&sql);

        if let Some(delivery_type) = filter.delivery_type {
            query = query.bind(delivery_type.as_str());
        }
        if let Some(ref statuses) = filter.statuses {
            let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
            query = query.bind(statuses);
        }
        if let Some(ref data_type) = filter.data_type {
            query = query.bind(data_type.clone());
        }
        if let Some(correlation_id) = filter.correlation_id {
            query = query.bind(correlation_id.as_uuid());
        }
        if let Some(message_id) = filter.message_id {
            query = query.bind(message_id.as_uuid());
        }
        if let Some(dead_lettered) = filter.dead_lettered {
            query = query.bind(dead_lettered);
        }
        if let Some(from) = filter.from_created_at {
            query = query.bind(from);
        }
        if let Some(to) = filter.to_created_at {
            query = query.bind(to);
        }
        if let Some(limit) = filter.limit {
            query = query.bind(limit as i64);
        }
        if let Some(offset) = filter.offset {
            query = query.bind(offset as i64);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_message).collect()
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_deliverable(&self, query: &DeliverableQuery) -> Result<Vec<PersistedMessage>> {
        let sql = format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM persisted_messages
            WHERE dead_lettered = FALSE
              AND delivery_type = ANY($1)
              AND next_attempt_at <= $2
              AND (message_status = 'stored'
                   OR (message_status IN ('failed', 'processing') AND retry_count < $3))
            ORDER BY created_at ASC, id ASC
            LIMIT $4
            "#
        );
        let delivery_types: Vec<&str> = query.delivery_types.iter().map(|d| d.as_str()).collect();

        let rows = sqlx::query(&sql)
            .bind(delivery_types)
            .bind(query.now)
            .bind(i32::try_from(query.max_retries).unwrap_or(i32::MAX))
            .bind(query.limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(row_to_message).collect()
    }

    async fn compare_and_swap(&self, update: MessageUpdate) -> Result<Option<PersistedMessage>> {
        let sql = format!(
            r#"
            UPDATE persisted_messages
            SET message_status = $4,
                retry_count = $5,
                deferral_count = $6,
                next_attempt_at = $7,
                last_processed_at = $8,
                last_error = $9,
                dead_lettered = $10,
                version = version + 1
            WHERE id = $1 AND version = $2 AND message_status = $3
            RETURNING {MESSAGE_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(update.id.as_i64())
            .bind(update.expected_version)
            .bind(update.expected_status.as_str())
            .bind(update.message_status.as_str())
            .bind(update.retry_count as i32)
            .bind(update.deferral_count as i32)
            .bind(update.next_attempt_at)
            .bind(update.last_processed_at)
            .bind(update.last_error.as_deref())
            .bind(update.dead_lettered)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row_to_message(row)?)),
            None => {
                // Distinguish a lost race from a missing row.
                let exists: bool = sqlx::query_scalar(
                    "SELECT EXISTS(SELECT 1 FROM persisted_messages WHERE id = $1)",
                )
                .bind(update.id.as_i64())
                .fetch_one(&self.pool)
                .await?;

                if exists {
                    tracing::debug!(id = %update.id, "compare-and-swap lost");
                    Ok(None)
                } else {
                    Err(StoreError::MessageNotFound(update.id))
                }
            }
        }
    }

    async fn outgoing_statuses(&self, message_id: MessageId) -> Result<Vec<MessageStatus>> {
        let statuses: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT message_status
            FROM persisted_messages
            WHERE message_id = $1 AND delivery_type <> 'inbox'
            "#,
        )
        .bind(message_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        statuses.iter().map(|s| s.parse()).collect()
    }

    async fn load_document(&self, collection: &str, key: &str) -> Result<Option<Document>> {
        let mut conn = self.pool.acquire().await?;
        load_document_with(&mut conn, collection, key).await
    }
}

/// A PostgreSQL business transaction.
///
/// Business code can run its own statements through
/// [`connection`](PostgresTransaction::connection); they commit or roll back
/// together with the staged messages.
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl PostgresTransaction {
    /// Returns the transaction's connection for business statements.
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.tx
    }
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn insert_message(&mut self, message: NewMessage) -> Result<PersistedMessage> {
        let sql = format!(
            r#"
            INSERT INTO persisted_messages
                (message_id, data_type, data, delivery_type, message_status,
                 created_at, next_attempt_at, correlation_id, causation_id)
            VALUES ($1, $2, $3, $4, 'stored', $5, $5, $6, $7)
            RETURNING {MESSAGE_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(message.message_id.as_uuid())
            .bind(&message.data_type)
            .bind(&message.data)
            .bind(message.delivery_type.as_str())
            .bind(Utc::now())
            .bind(message.correlation_id.as_uuid())
            .bind(message.causation_id.map(|id| id.as_uuid()))
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("unique_message_delivery")
                {
                    return StoreError::DuplicateMessage {
                        message_id: message.message_id,
                        delivery_type: message.delivery_type,
                    };
                }
                StoreError::Database(e)
            })?;

        row_to_message(row)
    }

    async fn load_document(&mut self, collection: &str, key: &str) -> Result<Option<Document>> {
        load_document_with(&mut self.tx, collection, key).await
    }

    async fn save_document(
        &mut self,
        collection: &str,
        key: &str,
        body: serde_json::Value,
        expected_version: i64,
    ) -> Result<Document> {
        let row = if expected_version == 0 {
            sqlx::query(
                r#"
                INSERT INTO documents (collection, key, version, body, updated_at)
                VALUES ($1, $2, 1, $3, $4)
                ON CONFLICT (collection, key) DO NOTHING
                RETURNING collection, key, version, body, updated_at
                "#,
            )
            .bind(collection)
            .bind(key)
            .bind(&body)
            .bind(Utc::now())
            .fetch_optional(&mut *self.tx)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE documents
                SET body = $3, version = version + 1, updated_at = $5
                WHERE collection = $1 AND key = $2 AND version = $4
                RETURNING collection, key, version, body, updated_at
                "#,
            )
            .bind(collection)
            .bind(key)
            .bind(&body)
            .bind(expected_version)
            .bind(Utc::now())
            .fetch_optional(&mut *self.tx)
            .await?
        };

        match row {
            Some(row) => row_to_document(row),
            None => {
                let actual = load_document_with(&mut self.tx, collection, key)
                    .await?
                    .map(|d| d.version)
                    .unwrap_or(0);
                Err(StoreError::ConcurrencyConflict {
                    collection: collection.to_string(),
                    key: key.to_string(),
                    expected: expected_version,
                    actual,
                })
            }
        }
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
