//! Store doubles for engine tests.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{AppError, AppResult};
use crate::jobs::models::{Job, JobFilter, Page, PageRequest, TransitionFields};
use crate::jobs::types::{JobStatus, Task};
use crate::repositories::{JobStore, MemoryJobStore};

/// Memory store whose next few matching transitions fail with a retryable error
pub struct UnreliableStore {
    pub inner: MemoryJobStore,
    failures: AtomicU32,
    /// Only transitions into this status fail; `None` matches every transition
    target: Option<JobStatus>,
    /// Write the change before reporting the failure (a lost reply)
    apply_before_failing: bool,
}

impl UnreliableStore {
    pub fn new(failures: u32, target: Option<JobStatus>) -> Self {
        Self {
            inner: MemoryJobStore::new(),
            failures: AtomicU32::new(failures),
            target,
            apply_before_failing: false,
        }
    }

    pub fn losing_replies(mut self) -> Self {
        self.apply_before_failing = true;
        self
    }

    pub fn failures_left(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobStore for UnreliableStore {
    async fn insert(&self, task: Task, scheduled_at: DateTime<Utc>) -> AppResult<Job> {
        self.inner.insert(task, scheduled_at).await
    }

    async fn get(&self, id: i64) -> AppResult<Job> {
        self.inner.get(id).await
    }

    async fn list(&self, filter: &JobFilter, page: PageRequest) -> AppResult<Page<Job>> {
        self.inner.list(filter, page).await
    }

    async fn transition(
        &self,
        id: i64,
        expected: JobStatus,
        next: JobStatus,
        fields: TransitionFields,
    ) -> AppResult<Job> {
        let matches = self.target.is_none_or(|target| target == next);
        if matches
            && self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            if self.apply_before_failing {
                self.inner.transition(id, expected, next, fields).await?;
            }
            return Err(AppError::Internal {
                source: anyhow::anyhow!("connection reset by peer"),
            });
        }
        self.inner.transition(id, expected, next, fields).await
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<Job>> {
        self.inner.claim_due(now, limit).await
    }

    async fn cancel_many(&self, ids: &[i64]) -> AppResult<Vec<i64>> {
        self.inner.cancel_many(ids).await
    }

    async fn retry_many(&self, ids: &[i64]) -> AppResult<Vec<i64>> {
        self.inner.retry_many(ids).await
    }

    async fn stale_claimed(&self, claimed_before: DateTime<Utc>, limit: i64) -> AppResult<Vec<Job>> {
        self.inner.stale_claimed(claimed_before, limit).await
    }
}
