use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{AppError, AppResult};
use crate::jobs::types::{JobStatus, Task};
use crate::schema::jobs;

// ============================================================================
// Job Models
// ============================================================================

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize)]
#[diesel(table_name = jobs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Job {
    pub id: i64,
    pub task_kind: String,
    pub payload: JsonValue,
    pub status: JobStatus,
    pub scheduled_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub attempt_count: i32,
    pub last_error: Option<String>,
}

impl Job {
    pub fn task(&self) -> Task {
        Task::new(self.task_kind.clone(), self.payload.clone())
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub task_kind: String,
    pub payload: JsonValue,
    pub status: JobStatus,
    pub scheduled_at: DateTime<Utc>,
}

impl NewJob {
    pub fn new(task: Task, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            task_kind: task.kind,
            payload: task.payload,
            status: JobStatus::Pending,
            scheduled_at,
        }
    }
}

/// Column writes that accompany a status change.
///
/// `None` leaves a column untouched; `Some(None)` clears a nullable column.
#[derive(Debug, Default, Clone, PartialEq, AsChangeset)]
#[diesel(table_name = jobs)]
pub struct TransitionFields {
    pub claimed_at: Option<Option<DateTime<Utc>>>,
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
    pub attempt_count: Option<i32>,
    pub last_error: Option<Option<String>>,
}

impl TransitionFields {
    /// Fields for a manual retry: all run timestamps and the last error are cleared.
    pub fn reset() -> Self {
        Self {
            claimed_at: Some(None),
            started_at: Some(None),
            completed_at: Some(None),
            attempt_count: None,
            last_error: Some(None),
        }
    }

    /// Apply the writes to an in-memory job record.
    pub fn apply(&self, job: &mut Job) {
        if let Some(claimed_at) = self.claimed_at {
            job.claimed_at = claimed_at;
        }
        if let Some(started_at) = self.started_at {
            job.started_at = started_at;
        }
        if let Some(completed_at) = self.completed_at {
            job.completed_at = completed_at;
        }
        if let Some(attempt_count) = self.attempt_count {
            job.attempt_count = attempt_count;
        }
        if let Some(last_error) = &self.last_error {
            job.last_error = last_error.clone();
        }
    }
}

// ============================================================================
// Listing
// ============================================================================

/// Read-only filter for job listings. Every populated field narrows the result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub task_kind: Option<String>,
    /// Case-insensitive substring match over the serialized payload
    pub search: Option<String>,
    pub scheduled_from: Option<DateTime<Utc>>,
    pub scheduled_to: Option<DateTime<Utc>>,
}

impl JobFilter {
    /// Evaluates the filter against a job record.
    pub fn matches(&self, job: &Job) -> bool {
        if self.status.is_some_and(|status| status != job.status) {
            return false;
        }
        if self.task_kind.as_deref().is_some_and(|kind| kind != job.task_kind) {
            return false;
        }
        if let Some(search) = &self.search {
            let haystack = job.payload.to_string().to_lowercase();
            if !haystack.contains(&search.to_lowercase()) {
                return false;
            }
        }
        if self.scheduled_from.is_some_and(|from| job.scheduled_at < from) {
            return false;
        }
        if self.scheduled_to.is_some_and(|to| job.scheduled_at > to) {
            return false;
        }
        true
    }
}

/// Page request (1-based page number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub const MAX_PAGE_SIZE: u32 = 100;

    pub fn new(page: u32, page_size: u32) -> AppResult<Self> {
        if page == 0 {
            return Err(AppError::validation("page", "Page must be at least 1"));
        }
        if page_size == 0 || page_size > Self::MAX_PAGE_SIZE {
            return Err(AppError::validation(
                "page_size",
                "Page size must be between 1 and 100",
            ));
        }
        Ok(Self { page, page_size })
    }

    pub fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.page_size as i64
    }

    pub fn limit(&self) -> i64 {
        self.page_size as i64
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
        }
    }
}

/// One page of results plus the total match count.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: i64,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> i64 {
        if self.page_size == 0 {
            return 0;
        }
        (self.total + self.page_size as i64 - 1) / self.page_size as i64
    }
}
