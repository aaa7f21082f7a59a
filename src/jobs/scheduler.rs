use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::AppResult;
use crate::jobs::context::EngineContext;
use crate::jobs::queue::DispatchQueue;

/// Periodically claims due jobs and hands them to the dispatch queue.
///
/// Several schedulers (in one process or many) may share a store; the
/// store's claim is exclusive, so each due job is dispatched once.
pub struct ClaimScheduler {
    ctx: EngineContext,
    queue: Arc<DispatchQueue>,
    tick_interval: Duration,
    batch_size: i64,
    instance_id: Uuid,
}

impl ClaimScheduler {
    pub fn new(ctx: EngineContext, queue: Arc<DispatchQueue>, config: &SchedulerConfig) -> Self {
        Self {
            ctx,
            queue,
            tick_interval: config.tick_interval(),
            batch_size: i64::from(config.batch_size.max(1)),
            instance_id: Uuid::new_v4(),
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Claim one batch and enqueue it in claim order.
    ///
    /// Returns the number of jobs claimed. A job that cannot be enqueued
    /// stays claimed for the recovery sweep.
    pub async fn tick(&self) -> AppResult<usize> {
        let claimed = self.ctx.store.claim_due(Utc::now(), self.batch_size).await?;
        let count = claimed.len();

        if count > 0 {
            tracing::debug!(scheduler = %self.instance_id, count, "Claimed due jobs");
        }

        for job in claimed {
            let job_id = job.id;
            if let Err(error) = self.queue.enqueue(job, self.queue.default_options()).await {
                tracing::error!(
                    scheduler = %self.instance_id,
                    job_id,
                    error = %error,
                    "Claimed job could not be dispatched"
                );
            }
        }

        Ok(count)
    }

    /// Tick until shutdown
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            scheduler = %self.instance_id,
            interval_ms = self.tick_interval.as_millis() as u64,
            batch_size = self.batch_size,
            "Claim scheduler started"
        );

        loop {
            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(error) = self.tick().await {
                        tracing::warn!(scheduler = %self.instance_id, error = %error, "Claim tick failed");
                    }
                }
            }
        }

        tracing::info!(scheduler = %self.instance_id, "Claim scheduler stopped");
    }
}
