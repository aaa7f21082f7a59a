use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::Validate;

use crate::config::EmailTaskConfig;
use crate::error::{AppError, AppResult};
use crate::jobs::types::{JobContext, JobTask};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SendEmailPayload {
    #[validate(email(message = "Invalid email format"))]
    pub to: String,
    #[validate(length(min = 1, max = 255, message = "Subject must be 1-255 characters"))]
    pub subject: String,
    #[serde(default)]
    pub message: String,
}

/// Outbound mail transport
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, from: &str, email: &SendEmailPayload) -> AppResult<()>;

    /// Transport name for logging
    fn name(&self) -> &'static str;
}

/// Posts messages as JSON to an HTTP mail relay
pub struct HttpRelayMailer {
    client: reqwest::Client,
    relay_url: Option<String>,
    api_key: Option<String>,
}

impl HttpRelayMailer {
    pub fn new(client: reqwest::Client, config: &EmailTaskConfig) -> Self {
        Self {
            client,
            relay_url: config.relay_url.clone(),
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
impl Mailer for HttpRelayMailer {
    async fn send(&self, from: &str, email: &SendEmailPayload) -> AppResult<()> {
        let relay_url = self.relay_url.as_deref().ok_or_else(|| {
            AppError::execution(SendEmailTask::task_type(), "no mail relay configured")
        })?;

        let mut request = self.client.post(relay_url).json(&json!({
            "from": from,
            "to": email.to,
            "subject": email.subject,
            "text": email.message,
        }));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| {
            AppError::execution(SendEmailTask::task_type(), format!("relay request failed: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::execution(
                SendEmailTask::task_type(),
                format!("relay responded {}: {}", status.as_u16(), body),
            ));
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "http_relay"
    }
}

/// Sends an email through the configured [`Mailer`]
pub struct SendEmailTask {
    mailer: Arc<dyn Mailer>,
    from: String,
}

impl SendEmailTask {
    pub fn new(mailer: Arc<dyn Mailer>, from: impl Into<String>) -> Self {
        Self {
            mailer,
            from: from.into(),
        }
    }
}

#[async_trait]
impl JobTask for SendEmailTask {
    type Payload = SendEmailPayload;

    fn task_type() -> &'static str {
        "send_email"
    }

    async fn execute(&self, payload: SendEmailPayload, _ctx: &JobContext) -> AppResult<()> {
        self.mailer.send(&self.from, &payload).await?;

        tracing::info!(
            to = %payload.to,
            subject = %payload.subject,
            mailer = self.mailer.name(),
            "Email sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, from: &str, email: &SendEmailPayload) -> AppResult<()> {
            self.sent
                .lock()
                .unwrap()
                .push((from.to_string(), email.to.clone()));
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn ctx() -> JobContext {
        JobContext {
            job_id: 1,
            attempt: 1,
            cancellation_token: CancellationToken::new(),
        }
    }

    fn payload() -> SendEmailPayload {
        SendEmailPayload {
            to: "ops@example.com".to_string(),
            subject: "Nightly report".to_string(),
            message: "All green".to_string(),
        }
    }

    #[tokio::test]
    async fn test_sends_through_mailer() {
        let mailer = Arc::new(RecordingMailer::default());
        let task = SendEmailTask::new(mailer.clone(), "noreply@example.com");

        task.execute(payload(), &ctx()).await.unwrap();

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(
            *sent,
            vec![("noreply@example.com".to_string(), "ops@example.com".to_string())]
        );
    }

    #[tokio::test]
    async fn test_unconfigured_relay_fails() {
        let mailer = HttpRelayMailer::new(reqwest::Client::new(), &EmailTaskConfig::default());
        let err = mailer.send("a@example.com", &payload()).await.unwrap_err();
        assert!(matches!(err, AppError::Execution { .. }));
    }

    #[test]
    fn test_payload_validation() {
        assert!(payload().validate().is_ok());

        let mut invalid = payload();
        invalid.to = "not-an-address".to_string();
        assert!(invalid.validate().is_err());

        let mut invalid = payload();
        invalid.subject.clear();
        assert!(invalid.validate().is_err());
    }
}
