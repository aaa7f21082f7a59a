use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::jobs::types::{JobContext, JobTask};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateFolderPayload {
    #[validate(length(min = 1, message = "Path is required"))]
    pub path: String,
}

/// Creates a directory and any missing parents
#[derive(Debug, Default)]
pub struct CreateFolderTask;

#[async_trait]
impl JobTask for CreateFolderTask {
    type Payload = CreateFolderPayload;

    fn task_type() -> &'static str {
        "create_folder"
    }

    async fn execute(&self, payload: CreateFolderPayload, _ctx: &JobContext) -> AppResult<()> {
        tokio::fs::create_dir_all(&payload.path)
            .await
            .map_err(|e| AppError::execution(Self::task_type(), format!("{}: {}", payload.path, e)))?;

        tracing::info!(path = %payload.path, "Folder created");
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

    #[tokio::test]
    async fn test_creates_nested_folders() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c");

        CreateFolderTask
            .execute(
                CreateFolderPayload {
                    path: path.to_string_lossy().into_owned(),
                },
                &ctx(),
            )
            .await
            .unwrap();

        assert!(path.is_dir());
    }

    #[tokio::test]
    async fn test_existing_folder_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let payload = CreateFolderPayload {
            path: dir.path().to_string_lossy().into_owned(),
        };

        assert!(CreateFolderTask.execute(payload, &ctx()).await.is_ok());
    }

    #[tokio::test]
    async fn test_path_under_a_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, "x").unwrap();

        let err = CreateFolderTask
            .execute(
                CreateFolderPayload {
                    path: file.join("child").to_string_lossy().into_owned(),
                },
                &ctx(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Execution { .. }));
    }
}
