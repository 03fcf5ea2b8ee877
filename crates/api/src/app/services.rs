use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use shipq_core::{ProcessId, QueueConfig, QueueItemId, QueueResult};
use shipq_events::EventBus;
use shipq_infra::{Engine, EngineBuilder, PostgresStorage, QueueItem, Storages};
use shipq_observability::{MetricsSnapshot, QueueEventLogger, QueueMetrics};

/// Everything the handlers need.
pub struct AppServices {
    engine: Engine,
    metrics: Arc<QueueMetrics>,
}

impl AppServices {
    /// Attach logging and metrics to the engine's bus.
    pub fn new(engine: Engine) -> Self {
        let metrics = Arc::new(QueueMetrics::new());
        engine.bus().register_handler(Arc::new(QueueEventLogger::new()));
        engine.bus().register_handler(metrics.clone());
        Self { engine, metrics }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn find_item(&self, id: QueueItemId) -> QueueResult<Option<QueueItem>> {
        self.engine.queue().find(id)
    }
}

/// Engine from `SHIPQ_*` settings, with no task types of its own.
pub async fn build_services_from_env() -> anyhow::Result<Arc<AppServices>> {
    let config = QueueConfig::from_env().context("invalid SHIPQ_* configuration")?;
    build_services(Engine::builder(config)).await
}

/// Finish `builder` with Postgres storage when `DATABASE_URL` is set,
/// in-memory otherwise.
pub async fn build_services(builder: EngineBuilder) -> anyhow::Result<Arc<AppServices>> {
    let storages = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let storage = PostgresStorage::connect(&url)
                .await
                .context("failed to connect to postgres")?;
            info!("using postgres storage");
            Storages::postgres(storage)
        }
        Err(_) => {
            info!("DATABASE_URL not set; using in-memory storage");
            Storages::in_memory()
        }
    };

    let engine = builder.with_storages(storages).build()?;
    Ok(Arc::new(AppServices::new(engine)))
}

/// Run engine work on the blocking pool.
///
/// Storage backends and the HTTP transport block, so engine calls never run
/// on a runtime worker thread.
pub async fn blocking<T, F>(services: Arc<AppServices>, work: F) -> anyhow::Result<T>
where
    F: FnOnce(&AppServices) -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || work(&services))
        .await
        .context("blocking task panicked")
}

/// Start the runner chain unless a live runner holds the lease.
pub async fn wakeup(services: Arc<AppServices>) {
    if let Err(err) = blocking(services, |s| s.engine().wakeup()).await {
        error!(error = %err, "wakeup failed");
    }
}

/// Execute a parked process in the background; the caller never waits.
pub fn spawn_process(services: Arc<AppServices>, guid: ProcessId) {
    tokio::task::spawn_blocking(move || {
        if let Err(err) = services.engine().run_process(guid) {
            error!(process = %guid, error = %err, "async process failed");
        }
    });
}
