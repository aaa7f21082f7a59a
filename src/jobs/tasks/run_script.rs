use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::jobs::types::{JobContext, JobTask};

/// Longest stderr excerpt carried into the job's error message
const STDERR_EXCERPT: usize = 512;

fn default_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RunScriptPayload {
    #[validate(length(min = 1, message = "Command is required"))]
    pub command: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default = "default_timeout_ms")]
    #[validate(range(min = 1, message = "Timeout must be at least 1ms"))]
    pub timeout_ms: u64,
}

/// Runs a shell command; a non-zero exit fails the attempt
pub struct RunScriptTask {
    shell: String,
}

impl RunScriptTask {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for RunScriptTask {
    fn default() -> Self {
        Self::new("sh")
    }
}

#[async_trait]
impl JobTask for RunScriptTask {
    type Payload = RunScriptPayload;

    fn task_type() -> &'static str {
        "run_script"
    }

    async fn execute(&self, payload: RunScriptPayload, ctx: &JobContext) -> AppResult<()> {
        let fail = |message: String| AppError::execution(Self::task_type(), message);

        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(&payload.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &payload.cwd {
            command.current_dir(cwd);
        }

        let child = command
            .spawn()
            .map_err(|e| fail(format!("failed to spawn {}: {}", self.shell, e)))?;

        let limit = Duration::from_millis(payload.timeout_ms);
        // Dropping the wait future drops the child, which kills it
        let output = tokio::select! {
            _ = ctx.cancellation_token.cancelled() => {
                return Err(fail("interrupted by shutdown".to_string()));
            }
            waited = tokio::time::timeout(limit, child.wait_with_output()) => match waited {
                Ok(output) => output.map_err(|e| fail(e.to_string()))?,
                Err(_) => return Err(fail(format!("timed out after {}ms", payload.timeout_ms))),
            },
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let excerpt: String = stderr.trim().chars().take(STDERR_EXCERPT).collect();
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |code| code.to_string());
            return Err(fail(format!("exited with {}: {}", code, excerpt)));
        }

        tracing::info!(
            command = %payload.command,
            stdout_bytes = output.stdout.len(),
            "Script finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> JobContext {
        JobContext {
            job_id: 1,
            attempt: 1,
            cancellation_token: CancellationToken::new(),
        }
    }

    fn payload(command: &str, timeout_ms: u64) -> RunScriptPayload {
        RunScriptPayload {
            command: command.to_string(),
            cwd: None,
            timeout_ms,
        }
    }

    #[tokio::test]
    async fn test_zero_exit_succeeds() {
        let result = RunScriptTask::default()
            .execute(payload("true", 5_000), &ctx())
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails_with_stderr() {
        let err = RunScriptTask::default()
            .execute(payload("echo broken >&2; exit 3", 5_000), &ctx())
            .await
            .unwrap_err();

        match err {
            AppError::Execution { kind, message } => {
                assert_eq!(kind, "run_script");
                assert!(message.contains("exited with 3"));
                assert!(message.contains("broken"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_the_script() {
        let started = std::time::Instant::now();
        let err = RunScriptTask::default()
            .execute(payload("sleep 5", 100), &ctx())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_runs_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut payload = payload("touch marker", 5_000);
        payload.cwd = Some(dir.path().to_string_lossy().into_owned());

        RunScriptTask::default().execute(payload, &ctx()).await.unwrap();
        assert!(dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_the_script() {
        let token = CancellationToken::new();
        let ctx = JobContext {
            job_id: 1,
            attempt: 1,
            cancellation_token: token.clone(),
        };
        token.cancel();

        let err = RunScriptTask::default()
            .execute(payload("sleep 5", 10_000), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("shutdown"));
    }
}
