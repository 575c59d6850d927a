//! VLM client configuration.

use std::time::Duration;

use serde::Serialize;

/// Model used for the cheap flood-relevance check.
pub const DEFAULT_CLASSIFY_MODEL: &str = "qwen3-vl:30b-a3b-instruct-q4_K_M";

/// Model used for the heavy impact and damage schemas.
pub const DEFAULT_DETAILED_MODEL: &str = "qwen3-vl:32b-instruct";

/// Configuration for the VLM client.
#[derive(Debug, Clone, PartialEq)]
pub struct VlmConfig {
    /// Ollama API endpoint
    pub endpoint: String,
    /// Model tag sent with every request
    pub model: String,
    /// Total per-request timeout in seconds; local inference under load is slow
    pub timeout_secs: u64,
    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Total timeout for the warm-up request
    pub warm_up_timeout_secs: u64,
    pub retry: RetryPolicy,
}

fn default_endpoint() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_model() -> String {
    DEFAULT_CLASSIFY_MODEL.to_string()
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_warm_up_timeout_secs() -> u64 {
    120
}

impl Default for VlmConfig {
    fn default() -> Self {
        Self::base_default().with_env_overrides()
    }
}

impl VlmConfig {
    fn base_default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            warm_up_timeout_secs: default_warm_up_timeout_secs(),
            retry: RetryPolicy::default(),
        }
    }

    /// Defaults for a given model, then environment overrides.
    pub fn for_model(model: &str) -> Self {
        Self::base_default().with_model(model).with_env_overrides()
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `VLM_ENDPOINT`: API endpoint
    /// - `VLM_MODEL`: Model name
    /// - `VLM_TIMEOUT_SECS`: Total request timeout
    /// - `VLM_CONNECT_TIMEOUT_SECS`: Connect timeout
    /// - `VLM_MAX_ATTEMPTS`: Attempts per request before giving up
    /// - `VLM_BACKOFF_SECS`: Backoff unit between attempts
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("VLM_ENDPOINT") {
            self.endpoint = val;
        }
        if let Ok(val) = std::env::var("VLM_MODEL") {
            self.model = val;
        }
        if let Some(n) = env_parse("VLM_TIMEOUT_SECS") {
            self.timeout_secs = n;
        }
        if let Some(n) = env_parse("VLM_CONNECT_TIMEOUT_SECS") {
            self.connect_timeout_secs = n;
        }
        if let Some(n) = env_parse("VLM_MAX_ATTEMPTS") {
            self.retry.max_attempts = n;
        }
        if let Some(n) = env_parse("VLM_BACKOFF_SECS") {
            self.retry.backoff_secs = n;
        }
        self
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn warm_up_timeout(&self) -> Duration {
        Duration::from_secs(self.warm_up_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Retry and pool-recycling knobs for a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per request (including the first)
    pub max_attempts: u32,
    /// Sleep `(attempt + 1) * backoff_secs` between attempts
    pub backoff_secs: u64,
    /// Full retry rounds per request; the pool is rebuilt between rounds
    pub session_attempts: u32,
    /// Pause after rebuilding the pool, in milliseconds
    pub recycle_pause_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_secs() -> u64 {
    3
}

fn default_session_attempts() -> u32 {
    2
}

fn default_recycle_pause_ms() -> u64 {
    1000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
            session_attempts: default_session_attempts(),
            recycle_pause_ms: default_recycle_pause_ms(),
        }
    }
}

impl RetryPolicy {
    /// No sleeping between attempts. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_secs: 0,
            session_attempts: default_session_attempts(),
            recycle_pause_ms: 0,
        }
    }

    /// Delay after the failed attempt `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs(u64::from(attempt + 1) * self.backoff_secs)
    }

    pub fn recycle_pause(&self) -> Duration {
        Duration::from_millis(self.recycle_pause_ms)
    }
}

/// Server-side tuning knobs. Opaque to the client; sent as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_gpu: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_batch: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kv_cache_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_mmap: Option<bool>,
}

/// Static request settings for one task kind.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestProfile {
    pub options: ModelOptions,
    /// Structured-output mode (`"json"`), if any
    pub format: Option<String>,
    /// How long the server keeps the model loaded after a request
    pub keep_alive: String,
}

impl RequestProfile {
    /// Small context, large batches, quantized KV cache.
    pub fn classification() -> Self {
        Self {
            options: ModelOptions {
                num_gpu: Some(999),
                num_ctx: Some(1536),
                num_batch: Some(1024),
                kv_cache_type: Some("q8_0".to_string()),
                use_mmap: Some(true),
                ..Default::default()
            },
            format: None,
            keep_alive: "2h".to_string(),
        }
    }

    /// JSON mode, low temperature, model pinned for a long batch.
    pub fn detailed() -> Self {
        Self {
            options: ModelOptions {
                num_gpu: Some(999),
                num_ctx: Some(2048),
                num_batch: Some(128),
                temperature: Some(0.1),
                use_mmap: Some(false),
                ..Default::default()
            },
            format: Some("json".to_string()),
            keep_alive: "4h".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_defaults() {
        let config = VlmConfig::base_default();
        assert_eq!(config.endpoint, "http://127.0.0.1:11434");
        assert_eq!(config.timeout(), Duration::from_secs(600));
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_backoff_grows_linearly() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.backoff(0), Duration::from_secs(3));
        assert_eq!(retry.backoff(3), Duration::from_secs(12));
        assert_eq!(RetryPolicy::immediate(5).backoff(4), Duration::ZERO);
    }

    #[test]
    fn test_endpoint_trailing_slash() {
        let config = VlmConfig::base_default().with_endpoint("http://gpu-box:11434/");
        assert_eq!(config.endpoint, "http://gpu-box:11434");
    }

    #[test]
    fn test_options_skip_unset_fields() {
        let json = serde_json::to_value(RequestProfile::classification().options).unwrap();
        assert_eq!(json["num_ctx"], 1536);
        assert_eq!(json["kv_cache_type"], "q8_0");
        assert!(json.get("temperature").is_none());
    }
}
