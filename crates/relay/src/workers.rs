//! Background publisher workers sharing one shutdown signal.

use message_store::MessageStore;
use messaging::MessagePersistenceService;
use outbox::{DeliveryRouter, OutboxConfig, OutboxPublisher};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A set of running [`OutboxPublisher`] loops.
#[derive(Debug)]
pub struct PublisherWorkers {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl PublisherWorkers {
    /// Spawns `count` publishers against the same store.
    ///
    /// Fails without spawning anything if `config` is invalid.
    pub fn spawn<S: MessageStore + Clone + 'static>(
        persistence: MessagePersistenceService<S>,
        router: DeliveryRouter,
        config: OutboxConfig,
        count: usize,
    ) -> outbox::Result<Self> {
        let publishers = (0..count.max(1))
            .map(|_| OutboxPublisher::new(persistence.clone(), router.clone(), config.clone()))
            .collect::<outbox::Result<Vec<_>>>()?;

        let (shutdown, rx) = watch::channel(false);
        let handles = publishers
            .into_iter()
            .enumerate()
            .map(|(worker, publisher)| {
                let rx = rx.clone();
                tokio::spawn(async move {
                    tracing::debug!(worker, "spawning outbox publisher");
                    publisher.run(rx).await;
                })
            })
            .collect::<Vec<_>>();

        metrics::gauge!("outbox_publisher_workers").set(handles.len() as f64);
        Ok(Self { shutdown, handles })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signals every worker and waits for their in-flight ticks to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "outbox publisher task failed");
            }
        }
        metrics::gauge!("outbox_publisher_workers").set(0.0);
        tracing::info!("outbox publishers stopped");
    }
}
