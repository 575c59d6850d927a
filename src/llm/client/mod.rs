//! VLM client for multimodal annotation requests.
//!
//! Requests go through a [`ChatBackend`] (Ollama in production). The
//! [`InferenceClient`] wraps a backend with the concurrency bound, the
//! per-request retry loop and one pool rebuild on connection failures.

mod config;
mod ollama;
pub mod prompts;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

pub use config::{
    ModelOptions, RequestProfile, RetryPolicy, VlmConfig, DEFAULT_CLASSIFY_MODEL,
    DEFAULT_DETAILED_MODEL,
};
pub use ollama::{ConnectionPool, OllamaBackend, PoolSettings};

use super::InferenceError;

/// One chat message. Images are raw base64 (no data-URI prefix).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Arc<str>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn with_images(mut self, images: Vec<Arc<str>>) -> Self {
        self.images = images;
        self
    }
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    pub options: ModelOptions,
    pub keep_alive: String,
    /// Overrides the pool's total timeout for this request.
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl ChatRequest {
    pub fn new(model: &str, profile: &RequestProfile, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.to_string(),
            messages,
            stream: false,
            format: profile.format.clone(),
            options: profile.options.clone(),
            keep_alive: profile.keep_alive.clone(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Number of images across all messages.
    pub fn image_count(&self) -> usize {
        self.messages.iter().map(|m| m.images.len()).sum()
    }
}

/// A chat-completion endpoint.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send one request and return the assistant message text.
    async fn chat(&self, request: &ChatRequest) -> Result<String, InferenceError>;

    /// Version of the shared connection state, bumped by each recycle.
    fn generation(&self) -> u64 {
        0
    }

    /// Tear down and recreate shared connection state, unless it has
    /// already been recycled since `seen` was read.
    async fn recycle(&self, _seen: u64) {}
}

/// Concurrency-bounded, retrying front end to a [`ChatBackend`].
#[derive(Clone)]
pub struct InferenceClient {
    backend: Arc<dyn ChatBackend>,
    retry: RetryPolicy,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
}

impl InferenceClient {
    pub fn new(backend: Arc<dyn ChatBackend>, retry: RetryPolicy, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            backend,
            retry,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Send a request under the concurrency bound.
    ///
    /// The permit is held for the whole call, backoff sleeps and pool rebuild
    /// included. If a full retry round ends on a connection-class error, the
    /// backend is recycled once and the round is repeated; any other failure,
    /// or a failure in the last round, is returned.
    pub async fn send(&self, request: &ChatRequest) -> Result<String, InferenceError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| InferenceError::Closed)?;

        let rounds = self.retry.session_attempts.max(1);
        let mut round = 0;
        loop {
            let seen = self.backend.generation();
            match self.send_with_retry(request).await {
                Ok(content) => return Ok(content),
                Err(e) if round + 1 < rounds && e.is_connection() => {
                    warn!("Connection pool unusable, rebuilding: {}", e);
                    self.backend.recycle(seen).await;
                    tokio::time::sleep(self.retry.recycle_pause()).await;
                    round += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Retry loop with linear backoff. Does not take a permit.
    pub async fn send_with_retry(&self, request: &ChatRequest) -> Result<String, InferenceError> {
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.backend.chat(request).await {
                Ok(content) => return Ok(content),
                Err(e) if attempt + 1 < attempts => {
                    let delay = self.retry.backoff(attempt);
                    debug!(
                        "Attempt {}/{} failed ({}), retrying in {:?}",
                        attempt + 1,
                        attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(InferenceError::Exhausted {
                        attempts,
                        source: Box::new(e),
                    })
                }
            }
        }
    }

    /// Single unretried request used to load the model into memory.
    pub async fn warm_up(&self, request: &ChatRequest) -> Result<(), InferenceError> {
        self.backend.chat(request).await.map(|_| ())
    }
}
