//! Engine lifecycle
//!
//! Builds the store, registry, dispatch queue, worker pool, claim scheduler
//! and recovery sweeper from [`Settings`], runs them until a shutdown signal
//! and then drains in-flight work.

use std::future::Future;
use std::sync::Arc;

use tokio::signal;
use tokio::task::JoinHandle;

use crate::config::{Settings, StoreBackend};
use crate::db::{establish_async_connection_pool, run_pending_migrations};
use crate::error::{AppError, AppResult};
use crate::jobs::tasks::default_registry;
use crate::jobs::{
    ClaimScheduler, DispatchQueue, EngineContext, RecoverySweeper, TaskRegistry, WorkerPool,
};
use crate::repositories::{JobStore, MemoryJobStore, PgJobStore};

/// Open the job store selected by `store.backend`
pub async fn build_store(settings: &Settings) -> AppResult<Arc<dyn JobStore>> {
    match settings.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory job store; jobs are lost on exit");
            Ok(Arc::new(MemoryJobStore::new()))
        }
        StoreBackend::Postgres => {
            if settings.database.auto_migrate {
                let applied = run_pending_migrations(&settings.database.url).await?;
                tracing::info!(applied = applied.len(), "Database migrations applied");
            }

            tracing::info!(
                max_connections = settings.database.max_connections,
                min_connections = settings.database.min_connections,
                "Initializing database connection pool"
            );
            let pool = establish_async_connection_pool(&settings.database).await?;
            Ok(Arc::new(PgJobStore::new(pool)))
        }
    }
}

/// A started engine; dropping it does not stop the background tasks
pub struct RunningEngine {
    ctx: EngineContext,
    queue: Arc<DispatchQueue>,
    scheduler: Option<JoinHandle<()>>,
    sweeper: Option<JoinHandle<()>>,
    workers: JoinHandle<()>,
}

impl RunningEngine {
    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn queue(&self) -> &Arc<DispatchQueue> {
        &self.queue
    }

    /// Cancel all components and wait for in-flight jobs to finish.
    ///
    /// Jobs interrupted mid-attempt or waiting on a backoff are left
    /// `claimed` for the recovery sweep of the next start.
    pub async fn shutdown(self) -> AppResult<()> {
        self.ctx.shutdown.cancel();

        for handle in [self.scheduler, self.sweeper].into_iter().flatten() {
            join(handle).await?;
        }
        join(self.workers).await?;
        self.queue.drain().await;

        tracing::info!(tracked = self.queue.tracked_len(), "Engine stopped");
        Ok(())
    }
}

async fn join(handle: JoinHandle<()>) -> AppResult<()> {
    handle.await.map_err(|e| AppError::Internal {
        source: anyhow::Error::from(e),
    })
}

pub struct Engine {
    settings: Settings,
}

impl Engine {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Spawn every component over `store` with the given registry
    pub fn start(&self, store: Arc<dyn JobStore>, registry: TaskRegistry) -> AppResult<RunningEngine> {
        let settings = &self.settings;
        let ctx = EngineContext::new(store, registry);
        let (queue, receiver) = DispatchQueue::new(
            ctx.clone(),
            settings.dispatch.buffer_size,
            settings.dispatch.options()?,
        );

        let sweeper = settings
            .recovery
            .enabled
            .then(|| RecoverySweeper::new(ctx.clone(), queue.clone(), &settings.recovery))
            .transpose()?;

        let workers = WorkerPool::new(ctx.clone(), queue.clone(), &settings.worker);
        let workers = tokio::spawn(workers.run(receiver));

        let scheduler = settings.scheduler.enabled.then(|| {
            let scheduler = ClaimScheduler::new(ctx.clone(), queue.clone(), &settings.scheduler);
            tokio::spawn(scheduler.run())
        });
        if scheduler.is_none() {
            tracing::warn!("Claim scheduler disabled; only recovery will dispatch jobs");
        }

        let sweeper = sweeper.map(|sweeper| tokio::spawn(sweeper.run()));

        tracing::info!(
            kinds = ?ctx.registry.kinds(),
            concurrency = settings.worker.concurrency,
            max_attempts = settings.dispatch.max_attempts,
            "Engine started"
        );

        Ok(RunningEngine {
            ctx,
            queue,
            scheduler,
            sweeper,
            workers,
        })
    }

    /// Run until `shutdown` resolves, then drain
    pub async fn run_until<F>(self, shutdown: F) -> AppResult<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            app_name = %self.settings.application.name,
            app_version = %self.settings.application.version,
            backend = ?self.settings.store.backend,
            "Application starting"
        );

        let store = build_store(&self.settings).await?;
        let registry = default_registry(&self.settings.tasks)?;
        let running = self.start(store, registry)?;

        shutdown.await;
        running.shutdown().await
    }

    /// Run until Ctrl+C or SIGTERM
    pub async fn run(self) -> AppResult<()> {
        self.run_until(shutdown_signal()).await
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
///
/// A handler that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!(error = %error, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                tracing::error!(error = %error, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
