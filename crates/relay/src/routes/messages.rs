//! Read-only views of the message store for operators.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use message_store::{
    CorrelationId, DeliveryType, MessageFilter, MessageStatus, MessageStore, PersistedMessage,
    PersistedMessageId,
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

/// Page size when the query names none.
pub const DEFAULT_LIMIT: usize = 100;

/// Largest page the endpoint returns.
pub const MAX_LIMIT: usize = 1000;

// -- Request types --

/// Filters for `GET /messages`.
///
/// `status` matches the delivery status only. Messages dead-lettered while
/// waiting on their cause are still `stored`, so use `dead_lettered=true`
/// to list every dead letter.
#[derive(Debug, Default, Deserialize)]
pub struct MessagesQuery {
    pub status: Option<String>,
    pub delivery_type: Option<String>,
    pub dead_lettered: Option<bool>,
    pub data_type: Option<String>,
    pub correlation_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl MessagesQuery {
    /// Builds a store filter, rejecting values that do not parse.
    pub fn to_filter(&self) -> Result<MessageFilter, ApiError> {
        let mut filter = MessageFilter::new()
            .limit(self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT))
            .offset(self.offset.unwrap_or(0));

        if let Some(ref status) = self.status {
            let statuses = status
                .split(',')
                .map(|s| s.trim().parse::<MessageStatus>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            filter = filter.statuses(statuses);
        }
        if let Some(ref delivery_type) = self.delivery_type {
            let delivery_type = delivery_type
                .parse::<DeliveryType>()
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            filter = filter.delivery_type(delivery_type);
        }
        if let Some(dead_lettered) = self.dead_lettered {
            filter = filter.dead_lettered(dead_lettered);
        }
        if let Some(ref data_type) = self.data_type {
            filter = filter.data_type(data_type.as_str());
        }
        if let Some(ref correlation_id) = self.correlation_id {
            let correlation_id = correlation_id
                .parse::<CorrelationId>()
                .map_err(|e| ApiError::BadRequest(format!("Invalid correlation_id: {e}")))?;
            filter = filter.correlation_id(correlation_id);
        }

        Ok(filter)
    }
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: i64,
    pub message_id: String,
    pub data_type: String,
    pub delivery_type: String,
    pub status: String,
    pub retry_count: u32,
    pub deferral_count: u32,
    pub dead_lettered: bool,
    pub last_error: Option<String>,
    pub correlation_id: String,
    pub causation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub next_attempt_at: DateTime<Utc>,
}

impl From<&PersistedMessage> for MessageResponse {
    fn from(record: &PersistedMessage) -> Self {
        Self {
            id: record.id.as_i64(),
            message_id: record.message_id.to_string(),
            data_type: record.data_type.clone(),
            delivery_type: record.delivery_type.to_string(),
            status: record.message_status.to_string(),
            retry_count: record.retry_count,
            deferral_count: record.deferral_count,
            dead_lettered: record.dead_lettered,
            last_error: record.last_error.clone(),
            correlation_id: record.correlation_id.to_string(),
            causation_id: record.causation_id.map(|id| id.to_string()),
            created_at: record.created_at,
            last_processed_at: record.last_processed_at,
            next_attempt_at: record.next_attempt_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageDetailResponse {
    #[serde(flatten)]
    pub summary: MessageResponse,
    pub data: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct MessageListResponse {
    pub count: usize,
    pub messages: Vec<MessageResponse>,
}

// -- Handlers --

/// GET /messages: filtered message list, oldest first.
#[tracing::instrument(skip(state))]
pub async fn list<S: MessageStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<MessageListResponse>, ApiError> {
    let filter = query.to_filter()?;
    let records = state.persistence.get_by_filter(filter).await?;
    let messages: Vec<MessageResponse> = records.iter().map(MessageResponse::from).collect();

    Ok(Json(MessageListResponse {
        count: messages.len(),
        messages,
    }))
}

/// GET /messages/dead-letters: every message that needs an operator.
#[tracing::instrument(skip(state))]
pub async fn dead_letters<S: MessageStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<MessageListResponse>, ApiError> {
    let records = state.persistence.dead_letters().await?;
    let messages: Vec<MessageResponse> = records.iter().map(MessageResponse::from).collect();

    Ok(Json(MessageListResponse {
        count: messages.len(),
        messages,
    }))
}

/// GET /messages/{id}: one persisted message including its envelope.
#[tracing::instrument(skip(state))]
pub async fn get<S: MessageStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<MessageDetailResponse>, ApiError> {
    let id = id
        .parse::<i64>()
        .map(PersistedMessageId::from)
        .map_err(|e| ApiError::BadRequest(format!("Invalid message id: {e}")))?;

    let record = state
        .persistence
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Message {id} not found")))?;

    Ok(Json(MessageDetailResponse {
        summary: MessageResponse::from(&record),
        data: record.data,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_uses_the_default_page() {
        let filter = MessagesQuery::default().to_filter().unwrap();
        assert_eq!(filter.limit, Some(DEFAULT_LIMIT));
        assert_eq!(filter.offset, Some(0));
        assert!(filter.statuses.is_none());
    }

    #[test]
    fn limit_is_capped() {
        let query = MessagesQuery {
            limit: Some(50_000),
            ..MessagesQuery::default()
        };
        assert_eq!(query.to_filter().unwrap().limit, Some(MAX_LIMIT));
    }

    #[test]
    fn status_list_and_delivery_type_are_parsed() {
        let query = MessagesQuery {
            status: Some(format!(
                "{}, {}",
                MessageStatus::Stored,
                MessageStatus::Failed
            )),
            delivery_type: Some(DeliveryType::Outbox.to_string()),
            dead_lettered: Some(false),
            ..MessagesQuery::default()
        };
        let filter = query.to_filter().unwrap();
        assert_eq!(
            filter.statuses,
            Some(vec![MessageStatus::Stored, MessageStatus::Failed])
        );
        assert_eq!(filter.delivery_type, Some(DeliveryType::Outbox));
        assert_eq!(filter.dead_lettered, Some(false));
    }

    #[test]
    fn unknown_values_are_bad_requests() {
        let bad_status = MessagesQuery {
            status: Some("Exploded".to_string()),
            ..MessagesQuery::default()
        };
        assert!(matches!(bad_status.to_filter(), Err(ApiError::BadRequest(_))));

        let bad_correlation = MessagesQuery {
            correlation_id: Some("not-a-uuid".to_string()),
            ..MessagesQuery::default()
        };
        assert!(matches!(
            bad_correlation.to_filter(),
            Err(ApiError::BadRequest(_))
        ));
    }
}
