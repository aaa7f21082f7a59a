use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::jobs::types::{JobContext, JobTask};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WriteFilePayload {
    #[validate(length(min = 1, message = "Path is required"))]
    pub path: String,
    #[serde(default)]
    pub content: String,
}

/// Writes (or overwrites) a file, creating its parent directory
#[derive(Debug, Default)]
pub struct WriteFileTask;

#[async_trait]
impl JobTask for WriteFileTask {
    type Payload = WriteFilePayload;

    fn task_type() -> &'static str {
        "write_file"
    }

    async fn execute(&self, payload: WriteFilePayload, _ctx: &JobContext) -> AppResult<()> {
        let fail = |e: std::io::Error| {
            AppError::execution(Self::task_type(), format!("{}: {}", payload.path, e))
        };

        if let Some(parent) = Path::new(&payload.path).parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(fail)?;
        }

        tokio::fs::write(&payload.path, payload.content.as_bytes())
            .await
            .map_err(fail)?;

        tracing::info!(path = %payload.path, bytes = payload.content.len(), "File written");
        Ok(())
    }
}
