//! In-process job store.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{AppError, AppResult};
use crate::jobs::models::{Job, JobFilter, Page, PageRequest, TransitionFields};
use crate::jobs::types::{JobStatus, Task};
use crate::repositories::traits::{JobStore, ensure_edge, not_found};

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    jobs: BTreeMap<i64, Job>,
}

/// Job store backed by a single mutex-guarded map.
///
/// Every operation runs under the one lock, which makes the claim
/// select-and-mark atomic across any number of in-process schedulers.
#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<MemoryState>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, MemoryState>> {
        self.state.lock().map_err(|e| AppError::Internal {
            source: anyhow::anyhow!("job store lock poisoned: {}", e),
        })
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, task: Task, scheduled_at: DateTime<Utc>) -> AppResult<Job> {
        let mut state = self.lock()?;
        state.next_id += 1;
        let job = Job {
            id: state.next_id,
            task_kind: task.kind,
            payload: task.payload,
            status: JobStatus::Pending,
            scheduled_at,
            claimed_at: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
            attempt_count: 0,
            last_error: None,
        };
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: i64) -> AppResult<Job> {
        let state = self.lock()?;
        state.jobs.get(&id).cloned().ok_or_else(|| not_found(id))
    }

    async fn list(&self, filter: &JobFilter, page: PageRequest) -> AppResult<Page<Job>> {
        let state = self.lock()?;
        let matching: Vec<&Job> = state
            .jobs
            .values()
            .rev()
            .filter(|job| filter.matches(job))
            .collect();

        let items = matching
            .iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .map(|job| (*job).clone())
            .collect();

        Ok(Page {
            items,
            page: page.page,
            page_size: page.page_size,
            total: matching.len() as i64,
        })
    }

    async fn transition(
        &self,
        id: i64,
        expected: JobStatus,
        next: JobStatus,
        fields: TransitionFields,
    ) -> AppResult<Job> {
        ensure_edge(id, expected, next)?;

        let mut state = self.lock()?;
        let job = state.jobs.get_mut(&id).ok_or_else(|| not_found(id))?;
        if job.status != expected {
            return Err(AppError::Conflict {
                id,
                expected: expected.to_string(),
                actual: job.status.to_string(),
            });
        }

        job.status = next;
        fields.apply(job);
        Ok(job.clone())
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<Job>> {
        let mut state = self.lock()?;

        let mut due: Vec<(DateTime<Utc>, i64)> = state
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Pending && job.scheduled_at <= now)
            .map(|job| (job.scheduled_at, job.id))
            .collect();
        due.sort_unstable();
        due.truncate(limit.max(0) as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for (_, id) in due {
            if let Some(job) = state.jobs.get_mut(&id) {
                job.status = JobStatus::Claimed;
                job.claimed_at = Some(now);
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn cancel_many(&self, ids: &[i64]) -> AppResult<Vec<i64>> {
        let mut state = self.lock()?;
        let mut cancelled = Vec::new();
        for id in ids {
            if let Some(job) = state.jobs.get_mut(id)
                && JobStatus::CANCELLABLE.contains(&job.status)
            {
                job.status = JobStatus::Cancelled;
                cancelled.push(*id);
            }
        }
        cancelled.sort_unstable();
        cancelled.dedup();
        Ok(cancelled)
    }

    async fn retry_many(&self, ids: &[i64]) -> AppResult<Vec<i64>> {
        let mut state = self.lock()?;
        let reset = TransitionFields::reset();
        let mut retried = Vec::new();
        for id in ids {
            if let Some(job) = state.jobs.get_mut(id)
                && JobStatus::RETRYABLE.contains(&job.status)
            {
                job.status = JobStatus::Pending;
                reset.apply(job);
                retried.push(*id);
            }
        }
        retried.sort_unstable();
        retried.dedup();
        Ok(retried)
    }

    async fn stale_claimed(&self, claimed_before: DateTime<Utc>, limit: i64) -> AppResult<Vec<Job>> {
        let state = self.lock()?;
        let mut stale: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| {
                job.status == JobStatus::Claimed
                    && job.claimed_at.is_some_and(|claimed_at| claimed_at < claimed_before)
            })
            .cloned()
            .collect();
        stale.sort_by_key(|job| job.claimed_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }
}
