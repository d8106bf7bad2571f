//! Error taxonomy for a Pulse turn.
//!
//! Only turn-fatal conditions are represented here. Malformed SSE lines,
//! missing citations and failed follow-up suggestions are recovered where
//! they happen and never become a `PulseError`.

use thiserror::Error;

pub type PulseResult<T> = Result<T, PulseError>;

const BUSY_MESSAGE: &str = "Our servers are currently busy. Please try again in a moment.";

#[derive(Debug, Error)]
pub enum PulseError {
    /// Missing or rejected provider credential.
    #[error("{0}")]
    UpstreamAuth(String),

    #[error("Rate limited by upstream provider: {0}")]
    UpstreamRateLimit(String),

    #[error("Upstream provider unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Network error: {0}")]
    Transport(String),

    #[error("The assistant returned an empty response")]
    EmptyResponse,

    #[error("Turn cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PulseError {
    /// Text shown to the user when this error ends a turn.
    pub fn user_message(&self) -> String {
        match self {
            PulseError::UpstreamAuth(msg) => msg.clone(),
            PulseError::UpstreamRateLimit(_)
            | PulseError::UpstreamUnavailable(_)
            | PulseError::Transport(_) => BUSY_MESSAGE.to_string(),
            PulseError::EmptyResponse => {
                "No response was received. Please try rephrasing your question.".to_string()
            }
            PulseError::Cancelled => "The request was cancelled.".to_string(),
            PulseError::Config(msg) => format!("Configuration problem: {}", msg),
            PulseError::Io(_) | PulseError::Json(_) => {
                "An unexpected error occurred. Please try again.".to_string()
            }
        }
    }

    /// Short machine-readable code, mirrored in CLI output and logs.
    pub fn code(&self) -> &'static str {
        match self {
            PulseError::UpstreamAuth(_) => "AUTH_ERROR",
            PulseError::UpstreamRateLimit(_) => "RATE_LIMITED",
            PulseError::UpstreamUnavailable(_) => "SERVER_ERROR",
            PulseError::Transport(_) => "NETWORK_ERROR",
            PulseError::EmptyResponse => "STREAM_ERROR",
            PulseError::Cancelled => "CANCELLED",
            PulseError::Config(_) => "CONFIG_ERROR",
            PulseError::Io(_) | PulseError::Json(_) => "CLIENT_ERROR",
        }
    }

    /// Transient failures are worth resubmitting; this layer never retries them itself.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PulseError::UpstreamRateLimit(_)
                | PulseError::UpstreamUnavailable(_)
                | PulseError::Transport(_)
        )
    }
}

impl From<reqwest::Error> for PulseError {
    fn from(err: reqwest::Error) -> Self {
        PulseError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_message_is_verbatim() {
        let err = PulseError::UpstreamAuth("Groq API key is not configured.".to_string());
        assert_eq!(err.user_message(), "Groq API key is not configured.");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_errors_share_busy_message() {
        for err in [
            PulseError::UpstreamRateLimit("slow down".to_string()),
            PulseError::UpstreamUnavailable("502".to_string()),
            PulseError::Transport("connection reset".to_string()),
        ] {
            assert!(err.is_transient());
            assert_eq!(err.user_message(), BUSY_MESSAGE);
        }
    }

    #[test]
    fn test_codes() {
        assert_eq!(PulseError::EmptyResponse.code(), "STREAM_ERROR");
        assert_eq!(PulseError::Cancelled.code(), "CANCELLED");
    }
}
