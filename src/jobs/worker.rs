use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::Instrument;

use crate::config::WorkerConfig;
use crate::error::{AppError, AppResult};
use crate::jobs::context::EngineContext;
use crate::jobs::models::TransitionFields;
use crate::jobs::queue::{Delivery, DispatchQueue, DispatchReceiver};
use crate::jobs::types::{JobContext, JobStatus};

/// How a delivery ended, from the worker's side
enum Processed {
    /// Attempt ran and its status was recorded
    Ran(AppResult<()>),
    /// Job left `claimed` while queued
    Dropped,
    /// The store would not take a status write; the job stays where it was
    Unrecorded { status: JobStatus, error: AppError },
}

/// Executes deliveries with at most `concurrency` jobs in flight
#[derive(Clone)]
pub struct WorkerPool {
    ctx: EngineContext,
    queue: Arc<DispatchQueue>,
    concurrency: usize,
    job_timeout: Option<Duration>,
}

impl WorkerPool {
    pub fn new(ctx: EngineContext, queue: Arc<DispatchQueue>, config: &WorkerConfig) -> Self {
        Self {
            ctx,
            queue,
            concurrency: config.concurrency.max(1),
            job_timeout: config.job_timeout(),
        }
    }

    /// Pull deliveries until shutdown, then wait for in-flight jobs
    pub async fn run(self, mut receiver: DispatchReceiver) {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        tracing::info!(concurrency = self.concurrency, "Worker pool started");

        loop {
            let permit = tokio::select! {
                _ = self.ctx.shutdown.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let delivery = tokio::select! {
                _ = self.ctx.shutdown.cancelled() => break,
                delivery = receiver.recv() => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            let span = tracing::info_span!(
                "job",
                job_id = delivery.job.id,
                kind = %delivery.job.task_kind,
                attempt = delivery.attempt
            );
            let worker = self.clone();
            tokio::spawn(
                async move {
                    match worker.process(&delivery).await {
                        Processed::Ran(outcome) => worker.queue.report(delivery, outcome).await,
                        Processed::Dropped => worker.queue.release_delivery(&delivery),
                        Processed::Unrecorded { status, error } => {
                            worker.queue.release_delivery(&delivery);
                            tracing::error!(
                                job_id = delivery.job.id,
                                status = %status,
                                error = %error,
                                "Job status could not be recorded"
                            );
                        }
                    }
                    drop(permit);
                }
                .instrument(span),
            );
        }

        tracing::info!("Worker pool draining in-flight jobs");
        let _ = permits.acquire_many(self.concurrency as u32).await;
        tracing::info!("Worker pool stopped");
    }

    async fn process(&self, delivery: &Delivery) -> Processed {
        let job = &delivery.job;

        let running = match self
            .ctx
            .transition_durably(
                job.id,
                JobStatus::Claimed,
                JobStatus::Running,
                TransitionFields {
                    started_at: job.started_at.is_none().then(|| Some(Utc::now())),
                    attempt_count: Some(job.attempt_count + 1),
                    ..TransitionFields::default()
                },
            )
            .await
        {
            Ok(running) => running,
            Err(error @ AppError::Conflict { .. }) => {
                // Cancelled (or otherwise moved) while queued
                tracing::info!(job_id = job.id, error = %error, "Delivery dropped");
                return Processed::Dropped;
            }
            Err(error) => {
                return Processed::Unrecorded {
                    status: JobStatus::Claimed,
                    error,
                };
            }
        };

        tracing::info!("Executing job");

        let exec_ctx = JobContext {
            job_id: running.id,
            attempt: delivery.attempt,
            cancellation_token: self.ctx.shutdown.child_token(),
        };
        let started = Instant::now();
        let execution = self.ctx.registry.execute(running.task(), &exec_ctx);

        let result = match self.job_timeout {
            Some(limit) => match tokio::time::timeout(limit, execution).await {
                Ok(result) => result,
                Err(_) => Err(AppError::execution(
                    &running.task_kind,
                    format!("timed out after {}s", limit.as_secs()),
                )),
            },
            None => execution.await,
        };

        let duration_ms = started.elapsed().as_millis() as u64;

        let (next, fields) = match &result {
            Ok(()) => (
                JobStatus::Completed,
                TransitionFields {
                    completed_at: Some(Some(Utc::now())),
                    last_error: Some(None),
                    ..TransitionFields::default()
                },
            ),
            Err(error) => (
                JobStatus::Failed,
                TransitionFields {
                    last_error: Some(Some(error.to_string())),
                    ..TransitionFields::default()
                },
            ),
        };

        if let Err(error) = self
            .ctx
            .transition_durably(running.id, JobStatus::Running, next, fields)
            .await
        {
            return Processed::Unrecorded {
                status: JobStatus::Running,
                error,
            };
        }

        tracing::info!(job_id = running.id, status = %next, duration_ms, "Job attempt finished");

        Processed::Ran(result)
    }
}
