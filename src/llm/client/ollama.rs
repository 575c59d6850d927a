//! Ollama `/api/chat` backend and the shared HTTP connection pool.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ChatBackend, ChatRequest, VlmConfig};
use crate::llm::InferenceError;

/// HTTP client settings used every time the pool is (re)built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_idle_per_host: usize,
}

impl PoolSettings {
    /// Keep roughly two idle connections per concurrent task.
    pub fn for_config(config: &VlmConfig, max_concurrent: usize) -> Self {
        Self {
            timeout: config.timeout(),
            connect_timeout: config.connect_timeout(),
            max_idle_per_host: max_concurrent.max(1) * 2,
        }
    }
}

/// A pooled HTTP client shared by all in-flight requests.
///
/// Readers clone the current client (cheap, reference counted). A rebuild
/// swaps in a fresh client under an exclusive lock; requests already holding
/// the old client finish on it and then drop it.
pub struct ConnectionPool {
    settings: PoolSettings,
    client: RwLock<Client>,
    rebuild_lock: Mutex<()>,
    generation: AtomicU64,
}

impl ConnectionPool {
    pub fn new(settings: PoolSettings) -> Result<Self, InferenceError> {
        Ok(Self {
            client: RwLock::new(build_client(&settings)?),
            settings,
            rebuild_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        })
    }

    pub fn client(&self) -> Client {
        self.client
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// How many times the pool has been rebuilt.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Replace the client if it is still generation `seen`.
    ///
    /// Rebuilds are serialized. Callers that failed on the same dead client
    /// queue up here; the first one swaps it out and the rest find the
    /// generation moved on and return `Ok(false)`.
    pub async fn rebuild(&self, seen: u64) -> Result<bool, InferenceError> {
        let _guard = self.rebuild_lock.lock().await;
        if self.generation() != seen {
            debug!("Connection pool already rebuilt since generation {}", seen);
            return Ok(false);
        }
        let fresh = build_client(&self.settings)?;
        *self.client.write().unwrap_or_else(|e| e.into_inner()) = fresh;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Rebuilt HTTP connection pool (generation {})", generation);
        Ok(true)
    }
}

fn build_client(settings: &PoolSettings) -> Result<Client, InferenceError> {
    Client::builder()
        .timeout(settings.timeout)
        .connect_timeout(settings.connect_timeout)
        .pool_max_idle_per_host(settings.max_idle_per_host)
        .build()
        .map_err(|e| InferenceError::Connection(format!("Failed to create HTTP client: {}", e)))
}

/// Ollama chat API response format.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

/// [`ChatBackend`] talking to a local Ollama server.
pub struct OllamaBackend {
    endpoint: String,
    pool: ConnectionPool,
}

impl OllamaBackend {
    pub fn new(config: &VlmConfig, max_concurrent: usize) -> Result<Self, InferenceError> {
        let pool = ConnectionPool::new(PoolSettings::for_config(config, max_concurrent))?;
        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            pool,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Check if the server answers.
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.endpoint);
        match self.pool.client().get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// List installed models.
    pub async fn list_models(&self) -> Result<Vec<String>, InferenceError> {
        let url = format!("{}/api/tags", self.endpoint);
        let resp = self.pool.client().get(&url).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(InferenceError::Status { status, body });
        }

        #[derive(Deserialize)]
        struct TagsResponse {
            models: Vec<ModelInfo>,
        }

        #[derive(Deserialize)]
        struct ModelInfo {
            name: String,
        }

        let tags: TagsResponse = resp
            .json()
            .await
            .map_err(|e| InferenceError::Decode(e.to_string()))?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

#[async_trait]
impl ChatBackend for OllamaBackend {
    async fn chat(&self, request: &ChatRequest) -> Result<String, InferenceError> {
        let url = format!("{}/api/chat", self.endpoint);
        debug!(
            "POST {} ({} message(s), {} image(s))",
            url,
            request.messages.len(),
            request.image_count()
        );

        let mut builder = self.pool.client().post(&url).json(request);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        let resp = builder.send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(InferenceError::Status { status, body });
        }

        let body = resp.text().await?;
        let parsed: ChatResponse =
            serde_json::from_str(&body).map_err(|e| InferenceError::Decode(e.to_string()))?;
        Ok(parsed.message.map(|m| m.content).unwrap_or_default())
    }

    fn generation(&self) -> u64 {
        self.pool.generation()
    }

    async fn recycle(&self, seen: u64) {
        if let Err(e) = self.pool.rebuild(seen).await {
            warn!("Failed to rebuild connection pool: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{ChatMessage, InferenceClient, RequestProfile, RetryPolicy};
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend_for(server: &MockServer) -> OllamaBackend {
        let config = VlmConfig::for_model("qwen-test").with_endpoint(&server.uri());
        OllamaBackend::new(&config, 2).unwrap()
    }

    fn request() -> ChatRequest {
        ChatRequest::new(
            "qwen-test",
            &RequestProfile::classification(),
            vec![ChatMessage::user("Is this a flood?").with_images(vec!["AAAA".into()])],
        )
    }

    #[tokio::test]
    async fn test_chat_returns_message_content() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({
                "model": "qwen-test",
                "stream": false,
                "keep_alive": "2h",
                "options": {"num_ctx": 1536, "num_gpu": 999},
                "messages": [{"role": "user", "images": ["AAAA"]}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "qwen-test",
                "message": {"role": "assistant", "content": "{\"is_flood_related\": true}"},
                "done": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let content = backend_for(&server).chat(&request()).await.unwrap();
        assert_eq!(content, "{\"is_flood_related\": true}");
    }

    #[tokio::test]
    async fn test_missing_message_is_empty_content() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"done": true})))
            .mount(&server)
            .await;

        assert_eq!(backend_for(&server).chat(&request()).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("loading model"))
            .mount(&server)
            .await;

        let err = backend_for(&server).chat(&request()).await.unwrap_err();
        match err {
            InferenceError::Status { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "loading model");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_client_retries_server_errors() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": {"content": "recovered"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = InferenceClient::new(
            Arc::new(backend_for(&server)),
            RetryPolicy::immediate(5),
            1,
        );
        assert_eq!(client.send(&request()).await.unwrap(), "recovered");
    }

    #[tokio::test]
    async fn test_refused_connection_is_connection_class() {
        // Bind then drop a listener so the port is closed.
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let config = VlmConfig::for_model("qwen-test").with_endpoint(&format!("http://{}", addr));
        let backend = OllamaBackend::new(&config, 1).unwrap();

        let err = backend.chat(&request()).await.unwrap_err();
        assert!(err.is_connection(), "{err:?}");
        assert!(!backend.is_available().await);
    }

    #[tokio::test]
    async fn test_list_models() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [{"name": "qwen3-vl:32b-instruct"}, {"name": "llava:7b"}]
            })))
            .mount(&server)
            .await;

        let backend = backend_for(&server);
        assert!(backend.is_available().await);
        assert_eq!(
            backend.list_models().await.unwrap(),
            vec!["qwen3-vl:32b-instruct", "llava:7b"]
        );
    }

    #[tokio::test]
    async fn test_rebuild_bumps_generation() {
        let config = VlmConfig::for_model("qwen-test");
        let pool = ConnectionPool::new(PoolSettings::for_config(&config, 3)).unwrap();
        assert_eq!(pool.generation(), 0);
        assert!(pool.rebuild(0).await.unwrap());
        assert!(pool.rebuild(1).await.unwrap());
        assert_eq!(pool.generation(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_failures_rebuild_once() {
        let config = VlmConfig::for_model("qwen-test");
        let pool = Arc::new(ConnectionPool::new(PoolSettings::for_config(&config, 4)).unwrap());
        let seen = pool.generation();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..4 {
            let pool = pool.clone();
            tasks.spawn(async move { pool.rebuild(seen).await.unwrap() });
        }
        let mut rebuilt = 0;
        while let Some(joined) = tasks.join_next().await {
            rebuilt += usize::from(joined.unwrap());
        }

        assert_eq!(rebuilt, 1);
        assert_eq!(pool.generation(), seen + 1);
    }

    #[tokio::test]
    async fn test_backend_recycle_skips_stale_generation() {
        let server = MockServer::start().await;
        let backend = backend_for(&server);
        let seen = backend.generation();

        backend.recycle(seen).await;
        backend.recycle(seen).await;
        assert_eq!(backend.pool().generation(), seen + 1);
    }
}
