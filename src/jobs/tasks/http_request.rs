use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::jobs::types::{JobContext, JobTask};

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HttpRequestPayload {
    #[validate(url(message = "Invalid URL"))]
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// JSON request body
    #[serde(default)]
    pub body: Option<JsonValue>,
}

impl HttpRequestPayload {
    fn parse_method(&self) -> AppResult<Method> {
        self.method
            .to_uppercase()
            .parse()
            .map_err(|_| AppError::Validation {
                field: "method".to_string(),
                reason: format!("Invalid HTTP method: {}", self.method),
            })
    }
}

/// Issues one HTTP request; any non-2xx response fails the attempt
pub struct HttpRequestTask {
    client: reqwest::Client,
}

impl HttpRequestTask {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl JobTask for HttpRequestTask {
    type Payload = HttpRequestPayload;

    fn task_type() -> &'static str {
        "http_request"
    }

    async fn execute(&self, payload: HttpRequestPayload, _ctx: &JobContext) -> AppResult<()> {
        let method = payload.parse_method()?;
        let mut request = self.client.request(method.clone(), &payload.url);

        for (key, value) in &payload.headers {
            request = request.header(key, value);
        }
        if let Some(body) = &payload.body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            AppError::execution(Self::task_type(), format!("{} {}: {}", method, payload.url, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::execution(
                Self::task_type(),
                format!("{} {} responded {}", method, payload.url, status.as_u16()),
            ));
        }

        tracing::info!(method = %method, url = %payload.url, status = status.as_u16(), "HTTP request succeeded");
        Ok(())
    }
}
