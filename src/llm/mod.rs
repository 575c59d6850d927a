//! VLM integration.
//!
//! Talks to a local multimodal model (via Ollama) to annotate posts from
//! their text and key frames.

mod client;
mod error;

pub use client::prompts;
pub use client::{
    ChatBackend, ChatMessage, ChatRequest, ConnectionPool, InferenceClient, ModelOptions,
    OllamaBackend, PoolSettings, RequestProfile, RetryPolicy, VlmConfig, DEFAULT_CLASSIFY_MODEL,
    DEFAULT_DETAILED_MODEL,
};
pub use error::InferenceError;
