//! Built-in task kinds

mod create_folder;
mod http_request;
mod run_script;
mod send_email;
mod write_file;

use std::sync::Arc;
use std::time::Duration;

pub use create_folder::{CreateFolderPayload, CreateFolderTask};
pub use http_request::{HttpRequestPayload, HttpRequestTask};
pub use run_script::{RunScriptPayload, RunScriptTask};
pub use send_email::{HttpRelayMailer, Mailer, SendEmailPayload, SendEmailTask};
pub use write_file::{WriteFilePayload, WriteFileTask};

use crate::config::TasksConfig;
use crate::error::{AppError, AppResult};
use crate::jobs::registry::TaskRegistry;

/// Shared HTTP client for outbound task traffic
pub fn build_http_client(timeout: Duration) -> AppResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .gzip(true)
        .user_agent(format!("jobrunner/{}", crate::pkg_version()))
        .build()
        .map_err(|e| AppError::Internal {
            source: anyhow::Error::from(e),
        })
}

/// Registry with every built-in task kind
pub fn default_registry(config: &TasksConfig) -> AppResult<TaskRegistry> {
    let client = build_http_client(Duration::from_secs(config.http.timeout_secs))?;
    let mailer: Arc<dyn Mailer> = Arc::new(HttpRelayMailer::new(client.clone(), &config.email));

    let mut registry = TaskRegistry::new();
    registry
        .register(CreateFolderTask)
        .register(WriteFileTask)
        .register(SendEmailTask::new(mailer, config.email.from.clone()))
        .register(HttpRequestTask::new(client))
        .register(RunScriptTask::new(config.script.shell.clone()));

    Ok(registry)
}
