pub mod groq;
pub mod perplexity;

pub use groq::GroqClient;
pub use perplexity::PerplexityClient;

use crate::error::{PulseError, PulseResult};
use crate::state::Source;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use reqwest::StatusCode;
use serde::Serialize;
use std::pin::Pin;

/// Raw response body of a streamed completion, chunked as it arrives.
pub type ByteStream = Pin<Box<dyn Stream<Item = PulseResult<Bytes>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Chat-completion provider. Implementations never retry.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Open a streamed completion and hand back the raw SSE body.
    async fn stream_chat(&self, request: &ChatRequest) -> PulseResult<ByteStream>;

    /// Run a non-streamed completion and return the message content.
    async fn complete(&self, request: &ChatRequest) -> PulseResult<String>;
}

/// Web search used to back inline citations with real links.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &str) -> PulseResult<Vec<Source>>;
}

/// Map a non-2xx provider response onto the error taxonomy.
pub(crate) fn upstream_error(provider: &str, status: StatusCode, body: &str) -> PulseError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return PulseError::UpstreamAuth(format!(
            "Authentication failed: Please check your {} API key is valid and properly configured.",
            provider
        ));
    }

    let message = error_message_from_body(body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string()
    });

    if status == StatusCode::TOO_MANY_REQUESTS {
        PulseError::UpstreamRateLimit(format!("{} API error: {}", provider, message))
    } else {
        PulseError::UpstreamUnavailable(format!("{} API error ({}): {}", provider, status.as_u16(), message))
    }
}

fn error_message_from_body(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    if let Some(error) = json.get("error") {
        if let Some(message) = error.get("message").and_then(|m| m.as_str()) {
            return Some(message.to_string());
        }
        if let Some(message) = error.as_str() {
            return Some(message.to_string());
        }
    }
    json.get("message")
        .and_then(|m| m.as_str())
        .map(|m| m.to_string())
}
