use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{AppError, AppResult};
use crate::jobs::backoff::BackoffPolicy;
use crate::jobs::models::{Job, TransitionFields};
use crate::jobs::registry::TaskRegistry;
use crate::jobs::types::JobStatus;
use crate::repositories::JobStore;

/// Attempts for a status write the engine must not lose
const STORE_WRITE_ATTEMPTS: u32 = 5;
const STORE_WRITE_BACKOFF: BackoffPolicy = BackoffPolicy::Exponential {
    base: Duration::from_millis(50),
};

/// Handles shared by the scheduler, queue, workers and recovery sweep
#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<dyn JobStore>,
    pub registry: Arc<TaskRegistry>,
    pub shutdown: CancellationToken,
}

impl EngineContext {
    pub fn new(store: Arc<dyn JobStore>, registry: TaskRegistry) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
            shutdown: CancellationToken::new(),
        }
    }

    /// `store.transition`, retried on retryable store errors.
    ///
    /// A write that landed but whose reply was lost shows up as a `Conflict`
    /// on the retry; if the job already sits in `next` that counts as success.
    pub async fn transition_durably(
        &self,
        id: i64,
        expected: JobStatus,
        next: JobStatus,
        fields: TransitionFields,
    ) -> AppResult<Job> {
        let mut attempt = 1;
        loop {
            match self.store.transition(id, expected, next, fields.clone()).await {
                Ok(job) => return Ok(job),
                Err(error @ AppError::Conflict { .. }) if attempt > 1 => {
                    let current = self.store.get(id).await?;
                    if current.status == next {
                        return Ok(current);
                    }
                    return Err(error);
                }
                Err(error) if error.is_retryable() && attempt < STORE_WRITE_ATTEMPTS => {
                    let delay = STORE_WRITE_BACKOFF.delay(attempt);
                    tracing::warn!(
                        job_id = id,
                        from = %expected,
                        to = %next,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Status write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
