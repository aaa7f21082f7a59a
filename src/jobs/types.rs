use std::str::FromStr;

use async_trait::async_trait;
use diesel_derive_enum::DbEnum;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use validator::Validate;

use crate::error::{AppError, AppResult};

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::JobStatus")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Claimed,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Claimed,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    /// Statuses a job may be cancelled from.
    pub const CANCELLABLE: [JobStatus; 2] = [JobStatus::Pending, JobStatus::Claimed];

    /// Statuses a job may be manually retried from.
    pub const RETRYABLE: [JobStatus; 2] = [JobStatus::Failed, JobStatus::Cancelled];

    /// Whether `self -> next` is an edge of the job state machine.
    ///
    /// `Failed -> Claimed` is the dispatch redelivery edge. `Failed | Cancelled
    /// -> Pending` is the manual retry edge.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Claimed)
                | (Claimed, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Pending, Cancelled)
                | (Claimed, Cancelled)
                | (Failed, Pending)
                | (Cancelled, Pending)
                | (Failed, Claimed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Claimed => "claimed",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                AppError::validation("status", format!("Unknown job status '{}'", s))
            })
    }
}

/// The unit of work a job carries: a task kind plus its kind-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(alias = "type")]
    pub kind: String,
    #[serde(default = "empty_payload", alias = "data")]
    pub payload: JsonValue,
}

fn empty_payload() -> JsonValue {
    JsonValue::Object(Default::default())
}

impl Task {
    pub fn new(kind: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Checks the shape every task must have regardless of kind.
    pub fn validate_shape(&self) -> AppResult<()> {
        if self.kind.trim().is_empty() {
            return Err(AppError::validation("task.kind", "Task kind is required"));
        }
        if self.kind.len() > 100 {
            return Err(AppError::validation(
                "task.kind",
                "Task kind must be at most 100 characters",
            ));
        }
        if !self.payload.is_object() {
            return Err(AppError::validation(
                "task.payload",
                "Task payload must be a JSON object",
            ));
        }
        Ok(())
    }
}

/// Execution context handed to a task for one delivery attempt
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: i64,
    /// 1-based attempt number within the current dispatch
    pub attempt: u32,
    pub cancellation_token: CancellationToken,
}

/// Trait that every task kind implements
///
/// The registry deserializes and validates the stored payload into
/// `Payload` before calling `execute`, so implementations only see
/// well-formed input.
#[async_trait]
pub trait JobTask: Send + Sync + 'static {
    type Payload: DeserializeOwned + Validate + Send + Sync;

    /// Unique identifier for this task kind
    fn task_type() -> &'static str
    where
        Self: Sized;

    /// Perform the side effect
    async fn execute(&self, payload: Self::Payload, ctx: &JobContext) -> AppResult<()>;
}
