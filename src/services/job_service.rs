//! Job service for intake and operator actions.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::error::{AppError, AppResult};
use crate::jobs::models::{Job, JobFilter, Page, PageRequest, TransitionFields};
use crate::jobs::types::{JobStatus, Task};
use crate::repositories::JobStore;

/// Default offset from now for a duplicated job's schedule time
pub const DUPLICATE_DELAY_SECS: i64 = 60;

/// Job service for handling intake, cancel, retry and duplicate.
#[derive(Clone)]
pub struct JobService {
    store: Arc<dyn JobStore>,
}

impl JobService {
    /// Creates a new JobService over the given store.
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Submits a new pending job.
    ///
    /// A missing schedule time is rejected; the job never reaches the store.
    pub async fn submit(&self, task: Task, scheduled_at: Option<DateTime<Utc>>) -> AppResult<Job> {
        let scheduled_at = scheduled_at
            .ok_or_else(|| AppError::validation("scheduled_at", "Schedule time is required"))?;
        task.validate_shape()?;

        let job = self.store.insert(task, scheduled_at).await?;
        tracing::info!(job_id = job.id, kind = %job.task_kind, scheduled_at = %job.scheduled_at, "Job submitted");
        Ok(job)
    }

    /// Submits a job from a template's task.
    pub async fn use_template(&self, task: Task, scheduled_at: DateTime<Utc>) -> AppResult<Job> {
        self.submit(task, Some(scheduled_at)).await
    }

    /// Gets a job by ID.
    pub async fn get(&self, id: i64) -> AppResult<Job> {
        self.store.get(id).await
    }

    /// Lists jobs matching a filter, newest first.
    pub async fn list(&self, filter: &JobFilter, page: PageRequest) -> AppResult<Page<Job>> {
        self.store.list(filter, page).await
    }

    /// Cancels a pending or claimed job.
    pub async fn cancel(&self, id: i64) -> AppResult<Job> {
        let job = self.store.get(id).await?;
        if !JobStatus::CANCELLABLE.contains(&job.status) {
            return Err(AppError::Conflict {
                id,
                expected: "pending or claimed".to_string(),
                actual: job.status.to_string(),
            });
        }

        let cancelled = self
            .store
            .transition(id, job.status, JobStatus::Cancelled, TransitionFields::default())
            .await?;
        tracing::info!(job_id = id, from = %job.status, "Job cancelled");
        Ok(cancelled)
    }

    /// Cancels every cancellable job among `ids`; returns the ids cancelled.
    pub async fn bulk_cancel(&self, ids: &[i64]) -> AppResult<Vec<i64>> {
        let ids = distinct(ids, "ids")?;
        let cancelled = self.store.cancel_many(&ids).await?;
        tracing::info!(requested = ids.len(), cancelled = cancelled.len(), "Bulk cancel");
        Ok(cancelled)
    }

    /// Moves a failed or cancelled job back to pending.
    pub async fn retry(&self, id: i64) -> AppResult<Job> {
        let job = self.store.get(id).await?;
        if !JobStatus::RETRYABLE.contains(&job.status) {
            return Err(AppError::Conflict {
                id,
                expected: "failed or cancelled".to_string(),
                actual: job.status.to_string(),
            });
        }

        let retried = self
            .store
            .transition(id, job.status, JobStatus::Pending, TransitionFields::reset())
            .await?;
        tracing::info!(job_id = id, from = %job.status, "Job reset to pending");
        Ok(retried)
    }

    /// Retries every failed or cancelled job among `ids`; returns the ids retried.
    pub async fn bulk_retry(&self, ids: &[i64]) -> AppResult<Vec<i64>> {
        let ids = distinct(ids, "ids")?;
        let retried = self.store.retry_many(&ids).await?;
        tracing::info!(requested = ids.len(), retried = retried.len(), "Bulk retry");
        Ok(retried)
    }

    /// Copies a job's task into a new pending job.
    ///
    /// Defaults to one minute from now when no schedule time is given.
    pub async fn duplicate(&self, id: i64, scheduled_at: Option<DateTime<Utc>>) -> AppResult<Job> {
        let source = self.store.get(id).await?;
        let scheduled_at =
            scheduled_at.unwrap_or_else(|| Utc::now() + Duration::seconds(DUPLICATE_DELAY_SECS));

        let copy = self.store.insert(source.task(), scheduled_at).await?;
        tracing::info!(job_id = copy.id, source_id = id, "Job duplicated");
        Ok(copy)
    }
}

fn distinct(ids: &[i64], field: &str) -> AppResult<Vec<i64>> {
    if ids.is_empty() {
        return Err(AppError::validation(field, "At least one job id is required"));
    }
    Ok(ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect())
}
