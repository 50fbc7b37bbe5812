use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::language::Language;

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub query: String,
    pub language: Language,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    #[serde(default)]
    #[allow(dead_code)]
    pub context_chunks: Option<Value>,
    #[serde(default)]
    pub confidence_score: Option<f64>,
    pub metadata: ResponseMetadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMetadata {
    pub num_sources: u32,
    pub detected_language: Language,
}

/// Failure talking to the question-answering service.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The request never produced a response (refused, DNS, timeout).
    #[error("{0}")]
    Unreachable(String),

    #[error("HTTP error! status: {status}")]
    Http { status: u16, body: String },

    #[error("Invalid response from server: {0}")]
    Decode(String),

    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            BackendError::Unreachable(err.to_string())
        } else if let Some(status) = err.status() {
            BackendError::Http {
                status: status.as_u16(),
                body: String::new(),
            }
        } else if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Other(err.to_string())
        }
    }
}

/// The two operations the client needs from the service.
#[async_trait]
pub trait Backend: Send + Sync {
    /// `GET /health`; any 2xx counts as reachable.
    async fn health(&self) -> Result<(), BackendError>;

    /// `POST /chat`.
    async fn ask(&self, request: &ChatRequest) -> Result<ChatResponse, BackendError>;
}

pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpBackend {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Http {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl Backend for HttpBackend {
    async fn health(&self) -> Result<(), BackendError> {
        let response = self.client.get(self.endpoint("health")).send().await?;
        error_for_status(response).await?;
        Ok(())
    }

    async fn ask(&self, request: &ChatRequest) -> Result<ChatResponse, BackendError> {
        tracing::debug!(language = request.language.code(), "POST /chat");

        let response = self
            .client
            .post(self.endpoint("chat"))
            .json(request)
            .send()
            .await?;

        let response = error_for_status(response).await?;
        let chat_response: ChatResponse = response.json().await?;

        Ok(chat_response)
    }
}
