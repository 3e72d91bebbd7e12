//! Outbox relay: runs publisher workers and exposes the operational
//! endpoints used to watch them.
//!
//! Structured logging comes from `tracing` and metrics are exported in
//! Prometheus format.

pub mod config;
pub mod error;
pub mod routes;
pub mod workers;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use message_store::MessageStore;
use messaging::MessagePersistenceService;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use error::ApiError;
pub use workers::PublisherWorkers;

/// Shared application state accessible from all handlers.
pub struct AppState<S: MessageStore> {
    pub persistence: MessagePersistenceService<S>,
    pub workers: usize,
}

impl<S: MessageStore> AppState<S> {
    pub fn new(persistence: MessagePersistenceService<S>, workers: usize) -> Arc<Self> {
        Arc::new(Self {
            persistence,
            workers,
        })
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: MessageStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/messages", get(routes::messages::list::<S>))
        .route(
            "/messages/dead-letters",
            get(routes::messages::dead_letters::<S>),
        )
        .route("/messages/{id}", get(routes::messages::get::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
