//! Relay entry point.

use std::sync::Arc;

use message_store::{InMemoryMessageStore, MessageStore, PostgresMessageStore};
use messaging::{InProcessCommandBus, LogEventBus, MessagePersistenceService, MessageRegistry};
use metrics_exporter_prometheus::PrometheusHandle;
use orders::OrderReadModel;
use outbox::DeliveryRouter;
use relay::{AppState, Config, PublisherWorkers};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Runs the publisher workers and the HTTP server until shutdown.
async fn run<S: MessageStore + Clone + 'static>(
    config: Config,
    store: S,
    metrics_handle: PrometheusHandle,
) {
    // Message types and in-process handlers are fixed at startup.
    let read_model = OrderReadModel::new();
    let mut registry = MessageRegistry::new();
    orders::register_messages(&mut registry, &read_model);
    let registry = Arc::new(registry);
    tracing::info!(message_types = ?registry.message_types(), "message registry ready");

    let router = DeliveryRouter::new(
        Arc::new(LogEventBus),
        Arc::new(InProcessCommandBus::new(Arc::clone(&registry))),
        Arc::clone(&registry),
    )
    .with_routing_keys(config.outbox.routing_keys.clone());

    let persistence = MessagePersistenceService::new(store)
        .with_max_retries(config.outbox.max_retries)
        .with_claim_timeout(config.outbox.claim_timeout);
    let workers = PublisherWorkers::spawn(
        persistence.clone(),
        router,
        config.outbox.clone(),
        config.workers,
    )
    .expect("invalid outbox configuration");
    tracing::info!(workers = workers.len(), "outbox publishers running");

    let state = AppState::new(persistence, workers.len());
    let app = relay::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting relay server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    workers.shutdown().await;
    tracing::info!("relay shut down gracefully");
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Open the message store and run
    match config.database_url.clone() {
        Some(url) => {
            let max_connections = config.max_connections();
            let store = PostgresMessageStore::connect(&url, max_connections)
                .await
                .expect("failed to connect to PostgreSQL");
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!(max_connections, "using PostgreSQL message store");
            run(config, store, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using the in-memory message store");
            run(config, InMemoryMessageStore::new(), metrics_handle).await;
        }
    }
}
