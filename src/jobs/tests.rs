//! Pipeline tests: store, scheduler, queue and workers wired together over
//! the in-memory store.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use validator::Validate;

use crate::config::{SchedulerConfig, WorkerConfig};
use crate::error::{AppError, AppResult};
use crate::jobs::backoff::BackoffPolicy;
use crate::jobs::context::EngineContext;
use crate::jobs::models::Job;
use crate::jobs::queue::{DispatchOptions, DispatchQueue};
use crate::jobs::registry::TaskRegistry;
use crate::jobs::scheduler::ClaimScheduler;
use crate::jobs::tasks::{CreateFolderTask, RunScriptTask};
use crate::jobs::types::{JobContext, JobStatus, JobTask, Task};
use crate::jobs::worker::WorkerPool;
use crate::repositories::testing::UnreliableStore;
use crate::repositories::{JobStore, MemoryJobStore};
use crate::services::JobService;

#[derive(Debug, Deserialize, Validate)]
struct EmptyPayload {
    #[serde(default)]
    #[allow(dead_code)]
    label: Option<String>,
}

/// Fails a fixed number of times, then succeeds
struct FlakyTask {
    failures_left: AtomicU32,
}

#[async_trait]
impl JobTask for FlakyTask {
    type Payload = EmptyPayload;

    fn task_type() -> &'static str {
        "flaky"
    }

    async fn execute(&self, _payload: EmptyPayload, _ctx: &JobContext) -> AppResult<()> {
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(AppError::execution("flaky", "not yet"));
        }
        Ok(())
    }
}

/// Records the highest number of overlapping executions
#[derive(Default)]
struct GaugeTask {
    current: AtomicUsize,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl JobTask for GaugeTask {
    type Payload = EmptyPayload;

    fn task_type() -> &'static str {
        "gauge"
    }

    async fn execute(&self, _payload: EmptyPayload, _ctx: &JobContext) -> AppResult<()> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Always fails, recording when each attempt started
#[derive(Default)]
struct RecordingTask {
    started: Arc<Mutex<Vec<tokio::time::Instant>>>,
}

#[async_trait]
impl JobTask for RecordingTask {
    type Payload = EmptyPayload;

    fn task_type() -> &'static str {
        "recording"
    }

    async fn execute(&self, _payload: EmptyPayload, _ctx: &JobContext) -> AppResult<()> {
        self.started
            .lock()
            .unwrap()
            .push(tokio::time::Instant::now());
        Err(AppError::execution("recording", "always fails"))
    }
}

fn options(max_attempts: u32) -> DispatchOptions {
    DispatchOptions {
        max_attempts,
        backoff: BackoffPolicy::Exponential {
            base: Duration::from_millis(5),
        },
    }
}

fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        enabled: true,
        tick_interval_ms: 10,
        batch_size: 50,
    }
}

struct Harness {
    store: Arc<dyn JobStore>,
    ctx: EngineContext,
    queue: Arc<DispatchQueue>,
    scheduler: ClaimScheduler,
    workers: JoinHandle<()>,
}

impl Harness {
    fn start(registry: TaskRegistry, concurrency: usize, max_attempts: u32) -> Self {
        Self::start_with(
            Arc::new(MemoryJobStore::new()),
            registry,
            concurrency,
            options(max_attempts),
        )
    }

    fn start_with(
        store: Arc<dyn JobStore>,
        registry: TaskRegistry,
        concurrency: usize,
        options: DispatchOptions,
    ) -> Self {
        let ctx = EngineContext::new(store.clone(), registry);
        let (queue, receiver) = DispatchQueue::new(ctx.clone(), 64, options);
        let pool = WorkerPool::new(
            ctx.clone(),
            queue.clone(),
            &WorkerConfig {
                concurrency,
                job_timeout_secs: 30,
            },
        );
        let workers = tokio::spawn(pool.run(receiver));
        let scheduler = ClaimScheduler::new(ctx.clone(), queue.clone(), &scheduler_config());

        Self {
            store,
            ctx,
            queue,
            scheduler,
            workers,
        }
    }

    async fn submit(&self, kind: &str, payload: serde_json::Value) -> Job {
        self.store
            .insert(Task::new(kind, payload), Utc::now() - ChronoDuration::seconds(1))
            .await
            .unwrap()
    }

    async fn wait_for(&self, id: i64, status: JobStatus) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while self.store.get(id).await.unwrap().status != status {
            assert!(tokio::time::Instant::now() < deadline, "job {id} never reached {status}");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Polls until the job reaches `status` and its dispatch has ended.
    async fn settle(&self, id: i64, status: JobStatus) -> Job {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let job = self.store.get(id).await.unwrap();
            if job.status == status && !self.queue.is_tracked(id) {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {id} stuck in {} (wanted {status})",
                job.status
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn stop(self) {
        self.ctx.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.workers)
            .await
            .unwrap()
            .unwrap();
        self.queue.drain().await;
    }
}

#[tokio::test]
async fn test_due_folder_job_runs_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("x");
    let mut registry = TaskRegistry::new();
    registry.register(CreateFolderTask);
    let harness = Harness::start(registry, 2, 3);

    let job = harness
        .submit("create_folder", json!({"path": path.to_string_lossy()}))
        .await;
    assert_eq!(harness.scheduler.tick().await.unwrap(), 1);

    let done = harness.settle(job.id, JobStatus::Completed).await;
    assert!(done.claimed_at.is_some());
    assert!(done.started_at.is_some());
    assert!(done.completed_at.is_some());
    assert!(done.started_at <= done.completed_at);
    assert_eq!(done.attempt_count, 1);
    assert!(path.is_dir());

    harness.stop().await;
}

#[tokio::test]
async fn test_failing_script_ends_failed_after_max_attempts() {
    let mut registry = TaskRegistry::new();
    registry.register(RunScriptTask::default());
    let harness = Harness::start(registry, 2, 3);

    let job = harness
        .submit("run_script", json!({"command": "exit 7", "timeout_ms": 5000}))
        .await;
    harness.scheduler.tick().await.unwrap();

    let failed = harness.settle(job.id, JobStatus::Failed).await;
    assert_eq!(failed.attempt_count, 3);
    assert!(failed.last_error.unwrap().contains("exited with 7"));
    assert!(failed.completed_at.is_none());

    harness.stop().await;
}

#[tokio::test]
async fn test_flaky_job_succeeds_on_final_attempt() {
    let mut registry = TaskRegistry::new();
    registry.register(FlakyTask {
        failures_left: AtomicU32::new(2),
    });
    let harness = Harness::start(registry, 1, 3);

    let job = harness.submit("flaky", json!({})).await;
    harness.scheduler.tick().await.unwrap();

    let done = harness.settle(job.id, JobStatus::Completed).await;
    assert_eq!(done.attempt_count, 3);
    assert!(done.last_error.is_none());

    // started_at is kept from the first attempt; two backoffs (5ms + 10ms) separate it from completion
    let elapsed = done.completed_at.unwrap() - done.started_at.unwrap();
    assert!(elapsed >= ChronoDuration::milliseconds(15));

    harness.stop().await;
}

#[tokio::test]
async fn test_unknown_kind_is_not_retried() {
    let harness = Harness::start(TaskRegistry::new(), 1, 5);

    let job = harness.submit("teleport", json!({})).await;
    harness.scheduler.tick().await.unwrap();

    let failed = harness.settle(job.id, JobStatus::Failed).await;
    assert_eq!(failed.attempt_count, 1);
    assert!(failed.last_error.unwrap().contains("teleport"));

    harness.stop().await;
}

#[tokio::test]
async fn test_malformed_payload_is_not_retried() {
    let mut registry = TaskRegistry::new();
    registry.register(CreateFolderTask);
    let harness = Harness::start(registry, 1, 5);

    let job = harness.submit("create_folder", json!({"dir": "/tmp"})).await;
    harness.scheduler.tick().await.unwrap();

    let failed = harness.settle(job.id, JobStatus::Failed).await;
    assert_eq!(failed.attempt_count, 1);

    harness.stop().await;
}

#[tokio::test]
async fn test_worker_concurrency_is_bounded() {
    let peak = Arc::new(AtomicUsize::new(0));
    let mut registry = TaskRegistry::new();
    registry.register(GaugeTask {
        current: AtomicUsize::new(0),
        peak: peak.clone(),
    });
    let harness = Harness::start(registry, 2, 1);

    let mut ids = Vec::new();
    for _ in 0..6 {
        ids.push(harness.submit("gauge", json!({})).await.id);
    }
    assert_eq!(harness.scheduler.tick().await.unwrap(), 6);

    for id in ids {
        harness.settle(id, JobStatus::Completed).await;
    }
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert!(peak.load(Ordering::SeqCst) >= 1);

    harness.stop().await;
}

#[tokio::test]
async fn test_racing_schedulers_claim_each_job_once() {
    let store = Arc::new(MemoryJobStore::new());
    for _ in 0..30 {
        store
            .insert(Task::new("noop", json!({})), Utc::now())
            .await
            .unwrap();
    }

    let ctx = EngineContext::new(store.clone(), TaskRegistry::new());
    let (queue, mut receiver) = DispatchQueue::new(ctx.clone(), 64, options(1));
    let config = SchedulerConfig {
        batch_size: 4,
        ..scheduler_config()
    };

    let mut handles = Vec::new();
    for _ in 0..4 {
        let scheduler = ClaimScheduler::new(ctx.clone(), queue.clone(), &config);
        handles.push(tokio::spawn(async move {
            let mut claimed = 0;
            loop {
                let n = scheduler.tick().await.unwrap();
                if n == 0 {
                    break claimed;
                }
                claimed += n;
            }
        }));
    }

    let total: usize = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|claimed| claimed.unwrap())
        .sum();
    assert_eq!(total, 30);

    let mut seen = HashSet::new();
    for _ in 0..30 {
        let delivery = receiver.recv().await.unwrap();
        assert!(seen.insert(delivery.job.id), "job {} delivered twice", delivery.job.id);
    }
}

#[tokio::test]
async fn test_job_cancelled_while_queued_is_not_executed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("never");

    let store = Arc::new(MemoryJobStore::new());
    let mut registry = TaskRegistry::new();
    registry.register(CreateFolderTask);
    let ctx = EngineContext::new(store.clone(), registry);
    let (queue, receiver) = DispatchQueue::new(ctx.clone(), 8, options(3));
    let scheduler = ClaimScheduler::new(ctx.clone(), queue.clone(), &scheduler_config());
    let service = JobService::new(store.clone());

    let job = service
        .submit(
            Task::new("create_folder", json!({"path": path.to_string_lossy()})),
            Some(Utc::now()),
        )
        .await
        .unwrap();
    scheduler.tick().await.unwrap();
    assert_eq!(store.get(job.id).await.unwrap().status, JobStatus::Claimed);

    service.cancel(job.id).await.unwrap();

    let pool = WorkerPool::new(
        ctx.clone(),
        queue.clone(),
        &WorkerConfig {
            concurrency: 1,
            job_timeout_secs: 0,
        },
    );
    let workers = tokio::spawn(pool.run(receiver));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while queue.is_tracked(job.id) {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let job = store.get(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.attempt_count, 0);
    assert!(!path.exists());

    ctx.shutdown.cancel();
    workers.await.unwrap();
}

#[tokio::test]
async fn test_bulk_retry_only_touches_failed_jobs() {
    let mut registry = TaskRegistry::new();
    registry.register(RunScriptTask::default());
    let harness = Harness::start(registry, 2, 1);
    let service = JobService::new(harness.store.clone());

    let ok = harness
        .submit("run_script", json!({"command": "true", "timeout_ms": 5000}))
        .await;
    let bad = harness
        .submit("run_script", json!({"command": "false", "timeout_ms": 5000}))
        .await;
    harness.scheduler.tick().await.unwrap();

    let completed = harness.settle(ok.id, JobStatus::Completed).await;
    harness.settle(bad.id, JobStatus::Failed).await;

    let retried = service.bulk_retry(&[ok.id, bad.id]).await.unwrap();
    assert_eq!(retried, vec![bad.id]);

    let still_completed = harness.store.get(ok.id).await.unwrap();
    assert_eq!(still_completed, completed);

    let reset = harness.store.get(bad.id).await.unwrap();
    assert_eq!(reset.status, JobStatus::Pending);
    assert_eq!(reset.attempt_count, 1);
    assert!(reset.started_at.is_none());
    assert!(reset.last_error.is_none());

    harness.stop().await;
}

#[tokio::test]
async fn test_retried_job_runs_again() {
    let mut registry = TaskRegistry::new();
    registry.register(FlakyTask {
        failures_left: AtomicU32::new(1),
    });
    let harness = Harness::start(registry, 1, 1);
    let service = JobService::new(harness.store.clone());

    let job = harness.submit("flaky", json!({})).await;
    harness.scheduler.tick().await.unwrap();
    harness.settle(job.id, JobStatus::Failed).await;

    service.retry(job.id).await.unwrap();
    harness.scheduler.tick().await.unwrap();

    let done = harness.settle(job.id, JobStatus::Completed).await;
    assert_eq!(done.attempt_count, 2);

    harness.stop().await;
}

#[tokio::test]
async fn test_retry_during_backoff_is_not_stranded() {
    let mut registry = TaskRegistry::new();
    registry.register(FlakyTask {
        failures_left: AtomicU32::new(1),
    });
    let slow_backoff = DispatchOptions {
        max_attempts: 3,
        backoff: BackoffPolicy::Fixed {
            delay: Duration::from_millis(300),
        },
    };
    let harness = Harness::start_with(Arc::new(MemoryJobStore::new()), registry, 1, slow_backoff);
    let service = JobService::new(harness.store.clone());

    let job = harness.submit("flaky", json!({})).await;
    harness.scheduler.tick().await.unwrap();
    harness.wait_for(job.id, JobStatus::Failed).await;

    // Operator retry lands while the redelivery timer is still pending
    service.retry(job.id).await.unwrap();
    assert_eq!(harness.scheduler.tick().await.unwrap(), 1);

    let done = harness.settle(job.id, JobStatus::Completed).await;
    assert_eq!(done.attempt_count, 2);

    // Once the timer has fired the job is still done and nothing is tracked
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(harness.store.get(job.id).await.unwrap(), done);
    assert_eq!(harness.queue.tracked_len(), 0);

    harness.stop().await;
}

#[tokio::test]
async fn test_unacknowledged_failure_write_still_redelivers() {
    let store = Arc::new(UnreliableStore::new(1, Some(JobStatus::Failed)).losing_replies());
    let mut registry = TaskRegistry::new();
    registry.register(FlakyTask {
        failures_left: AtomicU32::new(1),
    });
    let harness = Harness::start_with(store.clone(), registry, 1, options(3));

    let job = harness.submit("flaky", json!({})).await;
    harness.scheduler.tick().await.unwrap();

    let done = harness.settle(job.id, JobStatus::Completed).await;
    assert_eq!(done.attempt_count, 2);
    assert_eq!(store.failures_left(), 0);

    harness.stop().await;
}

#[tokio::test]
async fn test_completion_write_survives_transient_store_errors() {
    let store = Arc::new(UnreliableStore::new(2, Some(JobStatus::Completed)));
    let mut registry = TaskRegistry::new();
    registry.register(FlakyTask {
        failures_left: AtomicU32::new(0),
    });
    let harness = Harness::start_with(store.clone(), registry, 1, options(3));

    let job = harness.submit("flaky", json!({})).await;
    harness.scheduler.tick().await.unwrap();

    let done = harness.settle(job.id, JobStatus::Completed).await;
    assert_eq!(done.attempt_count, 1);
    assert_eq!(store.failures_left(), 0);

    harness.stop().await;
}

#[tokio::test]
async fn test_redelivery_gaps_follow_backoff() {
    let started = Arc::new(Mutex::new(Vec::new()));
    let mut registry = TaskRegistry::new();
    registry.register(RecordingTask {
        started: started.clone(),
    });
    let policy = BackoffPolicy::Exponential {
        base: Duration::from_millis(20),
    };
    let harness = Harness::start_with(
        Arc::new(MemoryJobStore::new()),
        registry,
        1,
        DispatchOptions {
            max_attempts: 4,
            backoff: policy,
        },
    );

    let job = harness.submit("recording", json!({})).await;
    harness.scheduler.tick().await.unwrap();
    let failed = harness.settle(job.id, JobStatus::Failed).await;
    assert_eq!(failed.attempt_count, 4);

    let started = started.lock().unwrap().clone();
    assert_eq!(started.len(), 4);
    for (n, pair) in started.windows(2).enumerate() {
        let gap = pair[1] - pair[0];
        let attempt = n as u32 + 1;
        assert!(
            gap >= policy.delay(attempt),
            "gap after attempt {attempt} was {gap:?}"
        );
    }

    harness.stop().await;
}

#[tokio::test]
async fn test_shutdown_leaves_interrupted_job_recoverable() {
    let mut registry = TaskRegistry::new();
    registry.register(RunScriptTask::default());
    let harness = Harness::start(registry, 1, 3);
    let store = harness.store.clone();

    let job = harness
        .submit("run_script", json!({"command": "sleep 30", "timeout_ms": 60000}))
        .await;
    harness.scheduler.tick().await.unwrap();
    harness.wait_for(job.id, JobStatus::Running).await;

    harness.stop().await;

    let parked = store.get(job.id).await.unwrap();
    assert_eq!(parked.status, JobStatus::Claimed);
    assert!(parked.last_error.unwrap().contains("interrupted"));
    let stale = store.stale_claimed(Utc::now(), 10).await.unwrap();
    assert_eq!(stale.iter().map(|j| j.id).collect::<Vec<_>>(), vec![job.id]);
}

#[tokio::test]
async fn test_shutdown_during_backoff_leaves_job_claimed() {
    let mut registry = TaskRegistry::new();
    registry.register(FlakyTask {
        failures_left: AtomicU32::new(1),
    });
    let long_backoff = DispatchOptions {
        max_attempts: 3,
        backoff: BackoffPolicy::Fixed {
            delay: Duration::from_secs(60),
        },
    };
    let harness = Harness::start_with(Arc::new(MemoryJobStore::new()), registry, 1, long_backoff);
    let store = harness.store.clone();

    let job = harness.submit("flaky", json!({})).await;
    harness.scheduler.tick().await.unwrap();
    harness.wait_for(job.id, JobStatus::Failed).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    tokio::time::timeout(Duration::from_secs(5), harness.stop())
        .await
        .unwrap();

    assert_eq!(store.get(job.id).await.unwrap().status, JobStatus::Claimed);
}

