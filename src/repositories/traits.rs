//! JobStore trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{AppError, AppResult};
use crate::jobs::models::{Job, JobFilter, Page, PageRequest, TransitionFields};
use crate::jobs::types::{JobStatus, Task};

/// Durable source of truth for job records.
///
/// Every status write is conditioned on the status the caller observed, so
/// two processes racing on the same job cannot both succeed.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new `pending` job.
    async fn insert(&self, task: Task, scheduled_at: DateTime<Utc>) -> AppResult<Job>;

    async fn get(&self, id: i64) -> AppResult<Job>;

    /// List jobs matching `filter`, newest id first.
    async fn list(&self, filter: &JobFilter, page: PageRequest) -> AppResult<Page<Job>>;

    /// Move a job from `expected` to `next`, writing `fields` in the same update.
    ///
    /// Fails with `Conflict` if the stored status is not `expected`, and
    /// with `InvalidTransition` if `expected -> next` is not a state machine edge.
    async fn transition(
        &self,
        id: i64,
        expected: JobStatus,
        next: JobStatus,
        fields: TransitionFields,
    ) -> AppResult<Job>;

    /// Atomically claim up to `limit` due pending jobs, oldest `scheduled_at` first.
    ///
    /// Rows held by a concurrent claimer are skipped, never waited on.
    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<Job>>;

    /// Cancel every listed job that is still `pending` or `claimed`. Returns the cancelled ids.
    async fn cancel_many(&self, ids: &[i64]) -> AppResult<Vec<i64>>;

    /// Reset every listed `failed` or `cancelled` job to `pending`. Returns the reset ids.
    async fn retry_many(&self, ids: &[i64]) -> AppResult<Vec<i64>>;

    /// Jobs still `claimed` whose `claimed_at` is older than `claimed_before`.
    async fn stale_claimed(&self, claimed_before: DateTime<Utc>, limit: i64) -> AppResult<Vec<Job>>;
}

/// Rejects a status change that is not an edge of the state machine.
pub(crate) fn ensure_edge(id: i64, expected: JobStatus, next: JobStatus) -> AppResult<()> {
    if expected.can_transition_to(next) {
        Ok(())
    } else {
        Err(AppError::InvalidTransition {
            id,
            from: expected.to_string(),
            to: next.to_string(),
        })
    }
}

pub(crate) fn not_found(id: i64) -> AppError {
    AppError::NotFound {
        entity: "Job".to_string(),
        field: "id".to_string(),
        value: id.to_string(),
    }
}
