use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::pg::Pg;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};

use crate::db::AsyncDbPool;
use crate::error::{AppError, AppResult};
use crate::jobs::models::{Job, JobFilter, NewJob, Page, PageRequest, TransitionFields};
use crate::jobs::types::{JobStatus, Task};
use crate::repositories::traits::{JobStore, ensure_edge, not_found};
use crate::schema::jobs;

/// PostgreSQL job store.
///
/// Claiming relies on `FOR UPDATE SKIP LOCKED`, so any number of scheduler
/// processes can share one table without coordinating with each other.
#[derive(Clone)]
pub struct PgJobStore {
    pool: AsyncDbPool,
}

impl PgJobStore {
    pub fn new(pool: AsyncDbPool) -> Self {
        Self { pool }
    }

    fn filtered(filter: &JobFilter) -> jobs::BoxedQuery<'static, Pg> {
        let mut query = jobs::table.into_boxed();

        if let Some(status) = filter.status {
            query = query.filter(jobs::status.eq(status));
        }
        if let Some(kind) = filter.task_kind.clone() {
            query = query.filter(jobs::task_kind.eq(kind));
        }
        if let Some(search) = &filter.search {
            let pattern = like_pattern(search);
            query = query.filter(
                diesel::dsl::sql::<diesel::sql_types::Bool>("payload::text ILIKE ")
                    .bind::<diesel::sql_types::Text, _>(pattern),
            );
        }
        if let Some(from) = filter.scheduled_from {
            query = query.filter(jobs::scheduled_at.ge(from));
        }
        if let Some(to) = filter.scheduled_to {
            query = query.filter(jobs::scheduled_at.le(to));
        }

        query
    }
}

/// `%search%` with LIKE wildcards in `search` matched literally.
///
/// Backslash is Postgres' default LIKE escape character.
fn like_pattern(search: &str) -> String {
    let mut pattern = String::with_capacity(search.len() + 2);
    pattern.push('%');
    for c in search.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, task: Task, scheduled_at: DateTime<Utc>) -> AppResult<Job> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::ConnectionPool {
                source: anyhow::Error::from(e),
            })?;

        diesel::insert_into(jobs::table)
            .values(&NewJob::new(task, scheduled_at))
            .returning(Job::as_returning())
            .get_result(&mut conn)
            .await
            .map_err(AppError::from)
    }

    async fn get(&self, id: i64) -> AppResult<Job> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::ConnectionPool {
                source: anyhow::Error::from(e),
            })?;

        jobs::table
            .find(id)
            .select(Job::as_select())
            .first(&mut conn)
            .await
            .map_err(|e| match e {
                diesel::result::Error::NotFound => not_found(id),
                _ => AppError::from(e),
            })
    }

    async fn list(&self, filter: &JobFilter, page: PageRequest) -> AppResult<Page<Job>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::ConnectionPool {
                source: anyhow::Error::from(e),
            })?;

        let total: i64 = Self::filtered(filter)
            .count()
            .get_result(&mut conn)
            .await
            .map_err(AppError::from)?;

        let items = Self::filtered(filter)
            .select(Job::as_select())
            .order(jobs::id.desc())
            .limit(page.limit())
            .offset(page.offset())
            .load(&mut conn)
            .await
            .map_err(AppError::from)?;

        Ok(Page {
            items,
            page: page.page,
            page_size: page.page_size,
            total,
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

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::ConnectionPool {
                source: anyhow::Error::from(e),
            })?;

        let updated = diesel::update(
            jobs::table
                .filter(jobs::id.eq(id))
                .filter(jobs::status.eq(expected)),
        )
        .set((jobs::status.eq(next), &fields))
        .returning(Job::as_returning())
        .get_result(&mut conn)
        .await
        .optional()
        .map_err(AppError::from)?;

        if let Some(job) = updated {
            return Ok(job);
        }

        // Nothing matched: either the job is gone or someone moved it first
        let actual: Option<JobStatus> = jobs::table
            .find(id)
            .select(jobs::status)
            .first(&mut conn)
            .await
            .optional()
            .map_err(AppError::from)?;

        match actual {
            Some(actual) => Err(AppError::Conflict {
                id,
                expected: expected.to_string(),
                actual: actual.to_string(),
            }),
            None => Err(not_found(id)),
        }
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<Job>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::ConnectionPool {
                source: anyhow::Error::from(e),
            })?;

        let mut claimed = conn
            .transaction::<Vec<Job>, AppError, _>(|conn| {
                async move {
                    let ids: Vec<i64> = jobs::table
                        .select(jobs::id)
                        .filter(jobs::status.eq(JobStatus::Pending))
                        .filter(jobs::scheduled_at.le(now))
                        .order(jobs::scheduled_at.asc())
                        .limit(limit)
                        .for_update()
                        .skip_locked()
                        .load(conn)
                        .await?;

                    if ids.is_empty() {
                        return Ok(Vec::new());
                    }

                    let jobs = diesel::update(jobs::table.filter(jobs::id.eq_any(&ids)))
                        .set((
                            jobs::status.eq(JobStatus::Claimed),
                            jobs::claimed_at.eq(Some(now)),
                        ))
                        .returning(Job::as_returning())
                        .get_results(conn)
                        .await?;

                    Ok(jobs)
                }
                .scope_boxed()
            })
            .await?;

        // RETURNING carries no ordering guarantee
        claimed.sort_by_key(|job| (job.scheduled_at, job.id));
        Ok(claimed)
    }

    async fn cancel_many(&self, ids: &[i64]) -> AppResult<Vec<i64>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::ConnectionPool {
                source: anyhow::Error::from(e),
            })?;

        let mut cancelled: Vec<i64> = diesel::update(
            jobs::table
                .filter(jobs::id.eq_any(ids))
                .filter(jobs::status.eq_any(JobStatus::CANCELLABLE)),
        )
        .set(jobs::status.eq(JobStatus::Cancelled))
        .returning(jobs::id)
        .get_results(&mut conn)
        .await
        .map_err(AppError::from)?;

        cancelled.sort_unstable();
        Ok(cancelled)
    }

    async fn retry_many(&self, ids: &[i64]) -> AppResult<Vec<i64>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::ConnectionPool {
                source: anyhow::Error::from(e),
            })?;

        let mut retried: Vec<i64> = diesel::update(
            jobs::table
                .filter(jobs::id.eq_any(ids))
                .filter(jobs::status.eq_any(JobStatus::RETRYABLE)),
        )
        .set((jobs::status.eq(JobStatus::Pending), &TransitionFields::reset()))
        .returning(jobs::id)
        .get_results(&mut conn)
        .await
        .map_err(AppError::from)?;

        retried.sort_unstable();
        Ok(retried)
    }

    async fn stale_claimed(&self, claimed_before: DateTime<Utc>, limit: i64) -> AppResult<Vec<Job>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::ConnectionPool {
                source: anyhow::Error::from(e),
            })?;

        jobs::table
            .filter(jobs::status.eq(JobStatus::Claimed))
            .filter(jobs::claimed_at.lt(claimed_before))
            .order(jobs::claimed_at.asc())
            .limit(limit)
            .select(Job::as_select())
            .load(&mut conn)
            .await
            .map_err(AppError::from)
    }
}
