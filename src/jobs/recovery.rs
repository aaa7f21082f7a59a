use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::time::MissedTickBehavior;

use crate::config::RecoveryConfig;
use crate::error::{AppError, AppResult};
use crate::jobs::context::EngineContext;
use crate::jobs::queue::DispatchQueue;

/// Re-dispatches jobs left in `claimed` by a failed handoff or a crashed
/// process.
pub struct RecoverySweeper {
    ctx: EngineContext,
    queue: Arc<DispatchQueue>,
    interval: Duration,
    stale_after: TimeDelta,
    batch_size: i64,
}

impl RecoverySweeper {
    pub fn new(
        ctx: EngineContext,
        queue: Arc<DispatchQueue>,
        config: &RecoveryConfig,
    ) -> AppResult<Self> {
        let stale_after = i64::try_from(config.stale_after_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .ok_or_else(|| AppError::Configuration {
                key: "recovery.stale_after_secs".to_string(),
                source: anyhow::anyhow!("{}s is out of range", config.stale_after_secs),
            })?;

        Ok(Self {
            ctx,
            queue,
            interval: Duration::from_secs(config.interval_secs.max(1)),
            stale_after,
            batch_size: i64::from(config.batch_size.max(1)),
        })
    }

    /// Re-enqueue stale claims not already in flight here.
    ///
    /// Returns the number of jobs handed back to the queue.
    pub async fn sweep(&self) -> AppResult<usize> {
        let cutoff = Utc::now()
            .checked_sub_signed(self.stale_after)
            .ok_or_else(|| AppError::Configuration {
                key: "recovery.stale_after_secs".to_string(),
                source: anyhow::anyhow!("claim cutoff is before the earliest representable time"),
            })?;
        let stale = self.ctx.store.stale_claimed(cutoff, self.batch_size).await?;
        let mut recovered = 0;

        for job in stale {
            let job_id = job.id;
            if self.queue.is_tracked(job_id) {
                continue;
            }

            match self.queue.enqueue(job, self.queue.default_options()).await {
                Ok(true) => {
                    recovered += 1;
                    tracing::info!(job_id, "Recovered stale claimed job");
                }
                Ok(false) => {}
                Err(error) => {
                    tracing::error!(
                        job_id,
                        error = %error,
                        "Stale claimed job could not be recovered; job is operationally failed"
                    );
                }
            }
        }

        Ok(recovered)
    }

    /// Sweep until shutdown
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            stale_after_secs = self.stale_after.num_seconds(),
            "Recovery sweeper started"
        );

        loop {
            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(error) = self.sweep().await {
                        tracing::warn!(error = %error, "Recovery sweep failed");
                    }
                }
            }
        }

        tracing::info!("Recovery sweeper stopped");
    }
}
