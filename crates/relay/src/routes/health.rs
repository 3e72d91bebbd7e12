//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use message_store::MessageStore;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub workers: usize,
}

/// GET /health: relay status and the number of publisher workers.
pub async fn check<S: MessageStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        workers: state.workers,
    })
}
