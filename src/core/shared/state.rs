use log::info;
use std::sync::Arc;

use crate::classifier::TicketClassifier;
use crate::core::config::AppConfig;
use crate::core::shared::utils::{create_conn, run_migrations};
use crate::tasks::{ClassifyTicketJob, JobQueue};
use crate::tickets::{MemoryTicketStore, PgTicketStore, TicketStore};

/// Shared handles passed to every HTTP handler and to the CLI.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TicketStore>,
    pub queue: JobQueue,
    pub classifier: Arc<TicketClassifier>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Build the classifier and the classification queue around `store`,
    /// register the classification job and start the workers.
    pub async fn new(config: AppConfig, store: Arc<dyn TicketStore>) -> Self {
        let classifier = Arc::new(TicketClassifier::from_config(&config.classifier));
        let queue = JobQueue::new(
            config.queue.name.clone(),
            config.queue.capacity,
            config.queue.workers,
            config.queue.retry_policy(),
        );

        ClassifyTicketJob::new(store.clone(), classifier.clone())
            .register(&queue)
            .await;
        queue.start().await;

        info!(
            "Classification queue {} ready (AI classification {})",
            queue.name(),
            if classifier.is_enabled() { "enabled" } else { "disabled" }
        );

        Self {
            store,
            queue,
            classifier,
            config: Arc::new(config),
        }
    }
}

/// Postgres when `DATABASE_URL` is configured (migrations applied first),
/// otherwise the in-memory store.
pub fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn TicketStore>> {
    match &config.database.url {
        Some(url) => {
            let pool = create_conn(url, config.database.pool_size)?;
            run_migrations(&pool).map_err(|e| anyhow::anyhow!("Migration failed: {e}"))?;
            info!("Using Postgres ticket store");
            Ok(Arc::new(PgTicketStore::new(pool)))
        }
        None => {
            info!("DATABASE_URL not set, using in-memory ticket store");
            Ok(Arc::new(MemoryTicketStore::new()))
        }
    }
}
