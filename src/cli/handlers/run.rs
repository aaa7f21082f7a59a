//! Run command handler
//!
//! Starts the engine, or validates configuration with `--dry-run`.

use crate::config::{Settings, StoreBackend};
use crate::engine::Engine;
use crate::error::AppResult;
use crate::jobs::tasks::default_registry;

/// Handler for the run command
pub struct RunCommandHandler {
    config: Settings,
}

impl RunCommandHandler {
    pub fn new(config: Settings) -> Self {
        Self { config }
    }

    /// Run the engine until shutdown, or only validate when `dry_run` is set
    pub async fn execute(&self, dry_run: bool) -> AppResult<()> {
        if dry_run {
            return self.validate_only();
        }
        Engine::new(self.config.clone()).run().await
    }

    /// Validate configuration and the task registry without starting anything
    pub fn validate_only(&self) -> AppResult<()> {
        self.config.validate()?;
        let registry = default_registry(&self.config.tasks)?;

        println!("✓ Configuration is valid");
        match self.config.store.backend {
            StoreBackend::Postgres => println!("✓ Job store: postgres"),
            StoreBackend::Memory => println!("✓ Job store: memory (jobs are not persisted)"),
        }
        println!(
            "✓ Workers: {} (max attempts {}, job timeout {}s)",
            self.config.worker.concurrency,
            self.config.dispatch.max_attempts,
            self.config.worker.job_timeout_secs
        );
        println!(
            "✓ Scheduler: {} every {}ms, batch {}",
            if self.config.scheduler.enabled { "enabled" } else { "disabled" },
            self.config.scheduler.tick_interval_ms,
            self.config.scheduler.batch_size
        );
        println!("✓ Task kinds: {}", registry.kinds().join(", "));

        println!("Dry run completed successfully");
        Ok(())
    }

    pub fn config(&self) -> &Settings {
        &self.config
    }
}
