use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;

use crate::error::{AppError, AppResult};
use crate::jobs::backoff::BackoffPolicy;
use crate::jobs::context::EngineContext;
use crate::jobs::models::{Job, TransitionFields};
use crate::jobs::types::JobStatus;

/// Per-dispatch retry options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Total delivery attempts, including the first
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// One attempt at running a claimed job
#[derive(Debug, Clone)]
pub struct Delivery {
    pub job: Job,
    /// 1-based attempt number within this dispatch
    pub attempt: u32,
    pub options: DispatchOptions,
    /// Dispatch that owns this delivery's tracking slot
    generation: u64,
}

/// Receiving half of the dispatch buffer, owned by the worker pool
pub struct DispatchReceiver {
    inner: mpsc::Receiver<Delivery>,
}

impl DispatchReceiver {
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.inner.recv().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// Buffered or executing
    Queued,
    /// Failed, sleeping out its backoff before redelivery
    Waiting,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    generation: u64,
    state: SlotState,
}

/// In-process buffer between claiming and execution.
///
/// A job id is tracked from the moment it is enqueued until its dispatch
/// ends (success, terminal error or exhausted attempts). Enqueueing a job
/// that is queued or executing is a no-op; enqueueing one whose redelivery
/// timer is pending starts a fresh dispatch and the timer stands down.
pub struct DispatchQueue {
    ctx: EngineContext,
    sender: mpsc::Sender<Delivery>,
    tracked: DashMap<i64, Slot>,
    generations: AtomicU64,
    timers: TaskTracker,
    defaults: DispatchOptions,
}

impl DispatchQueue {
    pub fn new(
        ctx: EngineContext,
        buffer_size: usize,
        defaults: DispatchOptions,
    ) -> (Arc<Self>, DispatchReceiver) {
        let (sender, inner) = mpsc::channel(buffer_size.max(1));
        let queue = Arc::new(Self {
            ctx,
            sender,
            tracked: DashMap::new(),
            generations: AtomicU64::new(1),
            timers: TaskTracker::new(),
            defaults,
        });
        (queue, DispatchReceiver { inner })
    }

    pub fn default_options(&self) -> DispatchOptions {
        self.defaults
    }

    pub fn is_tracked(&self, job_id: i64) -> bool {
        self.tracked.contains_key(&job_id)
    }

    pub fn tracked_len(&self) -> usize {
        self.tracked.len()
    }

    /// Hand a claimed job to the workers.
    ///
    /// Returns `Ok(false)` if the job is already queued or executing here.
    pub async fn enqueue(&self, job: Job, options: DispatchOptions) -> AppResult<bool> {
        let job_id = job.id;
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let slot = Slot {
            generation,
            state: SlotState::Queued,
        };

        match self.tracked.entry(job_id) {
            Entry::Occupied(mut entry) if entry.get().state == SlotState::Waiting => {
                tracing::info!(job_id, "Job re-claimed during backoff, starting a fresh dispatch");
                entry.insert(slot);
            }
            Entry::Occupied(_) => {
                tracing::debug!(job_id, "Job already dispatched, skipping");
                return Ok(false);
            }
            Entry::Vacant(entry) => {
                entry.insert(slot);
            }
        }

        let delivery = Delivery {
            job,
            attempt: 1,
            options,
            generation,
        };

        if let Err(reason) = self.send(delivery).await {
            self.release(job_id, generation);
            return Err(AppError::ClaimHandoff {
                id: job_id,
                reason,
            });
        }

        tracing::debug!(job_id, "Job enqueued");
        Ok(true)
    }

    async fn send(&self, delivery: Delivery) -> Result<(), String> {
        if self.ctx.shutdown.is_cancelled() {
            return Err("dispatch queue is shutting down".to_string());
        }

        tokio::select! {
            _ = self.ctx.shutdown.cancelled() => Err("dispatch queue is shutting down".to_string()),
            sent = self.sender.send(delivery) => sent.map_err(|_| "dispatch queue is closed".to_string()),
        }
    }

    /// Drop the slot if `generation` still owns it
    fn release(&self, job_id: i64, generation: u64) {
        self.tracked
            .remove_if(&job_id, |_, slot| slot.generation == generation);
    }

    /// Move an owned slot to `state`; false if another dispatch took it over
    fn set_state(&self, job_id: i64, generation: u64, state: SlotState) -> bool {
        match self.tracked.get_mut(&job_id) {
            Some(mut slot) if slot.generation == generation => {
                slot.state = state;
                true
            }
            _ => false,
        }
    }

    /// End a delivery whose job no longer needs dispatching
    pub fn release_delivery(&self, delivery: &Delivery) {
        self.release(delivery.job.id, delivery.generation);
    }

    /// Record the outcome of a delivery and decide what happens next
    pub async fn report(self: &Arc<Self>, delivery: Delivery, outcome: AppResult<()>) {
        let job_id = delivery.job.id;
        let attempt = delivery.attempt;

        match outcome {
            Ok(()) => {
                self.release_delivery(&delivery);
                tracing::info!(job_id, attempt, "Job completed");
            }
            Err(error) if !error.is_retryable() => {
                self.release_delivery(&delivery);
                tracing::warn!(job_id, attempt, error = %error, "Job failed with a terminal error");
            }
            Err(error) if self.ctx.shutdown.is_cancelled() => {
                tracing::warn!(job_id, attempt, error = %error, "Job attempt failed during shutdown");
                self.park(&delivery).await;
            }
            Err(error) if attempt < delivery.options.max_attempts => {
                if !self.set_state(job_id, delivery.generation, SlotState::Waiting) {
                    return;
                }
                let delay = delivery.options.backoff.delay(attempt);
                tracing::warn!(
                    job_id,
                    attempt,
                    max_attempts = delivery.options.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Job attempt failed, scheduling redelivery"
                );

                let queue = Arc::clone(self);
                self.timers.spawn(async move {
                    queue.redeliver(delivery, delay).await;
                });
            }
            Err(error) => {
                self.release_delivery(&delivery);
                tracing::error!(
                    job_id,
                    attempts = attempt,
                    error = %error,
                    "Job failed after exhausting all attempts"
                );
            }
        }
    }

    async fn redeliver(self: Arc<Self>, delivery: Delivery, delay: Duration) {
        let job_id = delivery.job.id;

        tokio::select! {
            _ = self.ctx.shutdown.cancelled() => {
                self.park(&delivery).await;
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        if !self.set_state(job_id, delivery.generation, SlotState::Queued) {
            tracing::debug!(job_id, "Redelivery superseded by a fresh dispatch");
            return;
        }

        let reclaimed = TransitionFields {
            claimed_at: Some(Some(Utc::now())),
            ..TransitionFields::default()
        };
        let (job, attempt) = match self
            .ctx
            .transition_durably(job_id, JobStatus::Failed, JobStatus::Claimed, reclaimed)
            .await
        {
            Ok(job) => (job, delivery.attempt + 1),
            Err(error @ AppError::Conflict { .. }) => match self.ctx.store.get(job_id).await {
                // Manually retried and re-claimed while this dispatch held the slot
                Ok(current) if current.status == JobStatus::Claimed => {
                    tracing::info!(job_id, "Job re-claimed during backoff, dispatching it fresh");
                    (current, 1)
                }
                _ => {
                    self.release_delivery(&delivery);
                    tracing::info!(job_id, error = %error, "Redelivery abandoned");
                    return;
                }
            },
            Err(error) => {
                self.release_delivery(&delivery);
                tracing::error!(job_id, error = %error, "Redelivery could not be recorded; job left failed");
                return;
            }
        };

        let next = Delivery {
            job,
            attempt,
            options: delivery.options,
            generation: delivery.generation,
        };

        if let Err(reason) = self.send(next).await {
            self.release_delivery(&delivery);
            tracing::warn!(job_id, reason = %reason, "Redelivery not handed to workers; left claimed for recovery");
        }
    }

    /// Return a failed job to `claimed` so the recovery sweep picks it up
    /// after a restart.
    async fn park(&self, delivery: &Delivery) {
        let job_id = delivery.job.id;
        self.release_delivery(delivery);

        match self
            .ctx
            .transition_durably(
                job_id,
                JobStatus::Failed,
                JobStatus::Claimed,
                TransitionFields::default(),
            )
            .await
        {
            Ok(_) => tracing::info!(job_id, "Job parked as claimed for recovery"),
            Err(AppError::Conflict { .. }) => {}
            Err(error) => {
                tracing::error!(job_id, error = %error, "Job could not be parked; left failed");
            }
        }
    }

    /// Wait for pending redelivery timers; call after shutdown is signalled.
    pub async fn drain(&self) {
        self.timers.close();
        self.timers.wait().await;
    }
}
