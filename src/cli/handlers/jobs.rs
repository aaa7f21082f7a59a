//! Job store command handler
//!
//! Submit, inspect, cancel, retry and duplicate jobs through [`JobService`].

use std::io::Write;

use chrono::{Duration, Utc};

use crate::cli::parser::JobCommand;
use crate::config::Settings;
use crate::engine::build_store;
use crate::error::{AppError, AppResult};
use crate::jobs::{Job, JobFilter, PageRequest, Task};
use crate::services::JobService;

/// Handler for the job store subcommands
pub struct JobCommandHandler {
    service: JobService,
}

impl JobCommandHandler {
    pub fn new(service: JobService) -> Self {
        Self { service }
    }

    /// Open the configured store and wrap it in a service
    pub async fn connect(settings: &Settings) -> AppResult<Self> {
        let store = build_store(settings).await?;
        Ok(Self::new(JobService::new(store)))
    }

    pub async fn execute(&self, command: &JobCommand, out: &mut impl Write) -> AppResult<()> {
        match command {
            JobCommand::Submit {
                kind,
                payload,
                at,
                in_secs,
            } => {
                let scheduled_at = match (at, in_secs) {
                    (Some(at), _) => Some(*at),
                    (None, Some(secs)) => {
                        let secs = i64::try_from(*secs)
                            .map_err(|_| AppError::validation("in", "Delay is too large"))?;
                        Some(Utc::now() + Duration::seconds(secs))
                    }
                    (None, None) => None,
                };
                let job = self
                    .service
                    .submit(Task::new(kind.clone(), payload.clone()), scheduled_at)
                    .await?;
                write_line(out, format!("Submitted job {}", summary(&job)))
            }
            JobCommand::List {
                status,
                kind,
                search,
                page,
                page_size,
            } => {
                let filter = JobFilter {
                    status: *status,
                    task_kind: kind.clone(),
                    search: search.clone(),
                    ..JobFilter::default()
                };
                let page = self
                    .service
                    .list(&filter, PageRequest::new(*page, *page_size)?)
                    .await?;

                for job in &page.items {
                    write_line(out, summary(job))?;
                }
                write_line(
                    out,
                    format!(
                        "Page {}/{} ({} jobs)",
                        page.page,
                        page.total_pages().max(1),
                        page.total
                    ),
                )
            }
            JobCommand::Show { id } => {
                let job = self.service.get(*id).await?;
                let rendered = serde_json::to_string_pretty(&job).map_err(|e| AppError::Internal {
                    source: anyhow::Error::from(e),
                })?;
                write_line(out, rendered)
            }
            JobCommand::Cancel { ids } => match ids.as_slice() {
                [id] => {
                    let job = self.service.cancel(*id).await?;
                    write_line(out, format!("Cancelled job {}", summary(&job)))
                }
                ids => {
                    let cancelled = self.service.bulk_cancel(ids).await?;
                    write_line(out, format!("Cancelled {} job(s): {}", cancelled.len(), join_ids(&cancelled)))
                }
            },
            JobCommand::Retry { ids } => match ids.as_slice() {
                [id] => {
                    let job = self.service.retry(*id).await?;
                    write_line(out, format!("Retrying job {}", summary(&job)))
                }
                ids => {
                    let retried = self.service.bulk_retry(ids).await?;
                    write_line(out, format!("Retrying {} job(s): {}", retried.len(), join_ids(&retried)))
                }
            },
            JobCommand::Duplicate { id, at } => {
                let job = self.service.duplicate(*id, *at).await?;
                write_line(out, format!("Duplicated job {} as {}", id, summary(&job)))
            }
        }
    }
}

fn summary(job: &Job) -> String {
    let mut line = format!(
        "#{} {} {} scheduled {} attempts {}",
        job.id,
        job.status,
        job.task_kind,
        job.scheduled_at.to_rfc3339(),
        job.attempt_count
    );
    if let Some(error) = &job.last_error {
        line.push_str(&format!(" error: {}", error));
    }
    line
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter().map(i64::to_string).collect::<Vec<_>>().join(", ")
}

fn write_line(out: &mut impl Write, line: impl AsRef<str>) -> AppResult<()> {
    writeln!(out, "{}", line.as_ref()).map_err(|e| AppError::Internal {
        source: anyhow::Error::from(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobStatus, TransitionFields};
    use crate::repositories::{JobStore, MemoryJobStore};
    use serde_json::json;
    use std::sync::Arc;

    fn handler() -> (JobCommandHandler, Arc<MemoryJobStore>) {
        let store = Arc::new(MemoryJobStore::new());
        (JobCommandHandler::new(JobService::new(store.clone())), store)
    }

    fn submit(at_secs: Option<u64>) -> JobCommand {
        JobCommand::Submit {
            kind: "create_folder".to_string(),
            payload: json!({"path": "/tmp/reports"}),
            at: None,
            in_secs: at_secs,
        }
    }

    async fn run(handler: &JobCommandHandler, command: JobCommand) -> AppResult<String> {
        let mut out = Vec::new();
        handler.execute(&command, &mut out).await?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[tokio::test]
    async fn test_submit_relative_schedule() {
        let (handler, store) = handler();
        let before = Utc::now();

        let output = run(&handler, submit(Some(120))).await.unwrap();
        assert!(output.starts_with("Submitted job #1 pending create_folder"));

        let job = store.get(1).await.unwrap();
        assert!(job.scheduled_at >= before + Duration::seconds(120));
    }

    #[tokio::test]
    async fn test_submit_without_schedule_is_rejected() {
        let (handler, store) = handler();

        let err = run(&handler, submit(None)).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
        assert!(matches!(store.get(1).await, Err(AppError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_list_and_show() {
        let (handler, _store) = handler();
        run(&handler, submit(Some(0))).await.unwrap();
        run(&handler, submit(Some(0))).await.unwrap();

        let output = run(
            &handler,
            JobCommand::List {
                status: Some(JobStatus::Pending),
                kind: None,
                search: Some("REPORTS".to_string()),
                page: 1,
                page_size: 20,
            },
        )
        .await
        .unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert!(lines[0].starts_with("#2 "));
        assert!(lines[1].starts_with("#1 "));
        assert_eq!(lines[2], "Page 1/1 (2 jobs)");

        let shown = run(&handler, JobCommand::Show { id: 2 }).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&shown).unwrap();
        assert_eq!(value["task_kind"], "create_folder");
    }

    #[tokio::test]
    async fn test_cancel_single_and_bulk() {
        let (handler, _store) = handler();
        for _ in 0..3 {
            run(&handler, submit(Some(60))).await.unwrap();
        }

        let output = run(&handler, JobCommand::Cancel { ids: vec![1] }).await.unwrap();
        assert!(output.contains("#1 cancelled"));

        let err = run(&handler, JobCommand::Cancel { ids: vec![1] }).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));

        let output = run(&handler, JobCommand::Cancel { ids: vec![1, 2, 3] })
            .await
            .unwrap();
        assert_eq!(output.trim(), "Cancelled 2 job(s): 2, 3");
    }

    #[tokio::test]
    async fn test_retry_failed_job() {
        let (handler, store) = handler();
        run(&handler, submit(Some(0))).await.unwrap();
        store.claim_due(Utc::now(), 10).await.unwrap();
        store
            .transition(1, JobStatus::Claimed, JobStatus::Running, TransitionFields::default())
            .await
            .unwrap();
        store
            .transition(
                1,
                JobStatus::Running,
                JobStatus::Failed,
                TransitionFields {
                    last_error: Some(Some("boom".to_string())),
                    ..TransitionFields::default()
                },
            )
            .await
            .unwrap();

        let output = run(&handler, JobCommand::Retry { ids: vec![1] }).await.unwrap();
        assert!(output.starts_with("Retrying job #1 pending"));
        assert!(!output.contains("boom"));
    }

    #[tokio::test]
    async fn test_duplicate_copies_task() {
        let (handler, store) = handler();
        run(&handler, submit(Some(0))).await.unwrap();

        let output = run(&handler, JobCommand::Duplicate { id: 1, at: None })
            .await
            .unwrap();
        assert!(output.starts_with("Duplicated job 1 as #2 pending"));
        assert_eq!(store.get(2).await.unwrap().payload, json!({"path": "/tmp/reports"}));
    }
}
