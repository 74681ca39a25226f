//! Error types for the chat streaming client.
//!
//! Each variant carries a stable error code (SCREAMING_SNAKE_CASE) that is
//! included in the Display output and accessible via [`ChatError::code()`].
//! [`ChatError::user_message()`] gives the text a UI should show.
//!
//! Cancellation is deliberately absent: a cancelled stream resolves to
//! [`StreamOutcome::Cancelled`](super::client::StreamOutcome::Cancelled).

/// Stable error codes for programmatic error handling.
pub mod error_codes {
    /// The endpoint rejected the request with HTTP 429.
    pub const RATE_LIMITED: &str = "RATE_LIMITED";

    /// The endpoint rejected the request with HTTP 402.
    pub const QUOTA_EXHAUSTED: &str = "QUOTA_EXHAUSTED";

    /// Any other non-2xx response.
    pub const UPSTREAM_FAILED: &str = "UPSTREAM_FAILED";

    /// Network unreachable, body read failure or malformed response.
    pub const TRANSPORT_FAILED: &str = "TRANSPORT_FAILED";

    /// Invalid client configuration (endpoint, headers).
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";
}

/// Errors produced while streaming a chat completion.
///
/// The Display impl formats as `[CODE] message`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// HTTP 429 from the completion endpoint.
    #[error("[{}] {}", error_codes::RATE_LIMITED, .0)]
    RateLimited(String),

    /// HTTP 402 from the completion endpoint.
    #[error("[{}] {}", error_codes::QUOTA_EXHAUSTED, .0)]
    QuotaExhausted(String),

    /// Any other non-success status.
    #[error("[{}] HTTP {status}: {message}", error_codes::UPSTREAM_FAILED)]
    Upstream {
        /// HTTP status code returned by the endpoint.
        status: u16,
        /// Message extracted from the error body.
        message: String,
    },

    /// The request could not be sent or the body could not be read.
    #[error("[{}] {}", error_codes::TRANSPORT_FAILED, .0)]
    Transport(String),

    /// The client could not be built from its configuration.
    #[error("[{}] {}", error_codes::CONFIG_INVALID, .0)]
    Config(String),
}

impl ChatError {
    /// Classify a non-success HTTP response.
    ///
    /// `body` is the raw response text; the message is pulled from an
    /// `{"error": "..."}` or `{"error": {"message": "..."}}` payload when
    /// present, else the body itself is used.
    pub fn from_http_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = extract_error_message(body);
        match status.as_u16() {
            429 => Self::RateLimited(message),
            402 => Self::QuotaExhausted(message),
            code => Self::Upstream {
                status: code,
                message,
            },
        }
    }

    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited(_) => error_codes::RATE_LIMITED,
            Self::QuotaExhausted(_) => error_codes::QUOTA_EXHAUSTED,
            Self::Upstream { .. } => error_codes::UPSTREAM_FAILED,
            Self::Transport(_) => error_codes::TRANSPORT_FAILED,
            Self::Config(_) => error_codes::CONFIG_INVALID,
        }
    }

    /// Returns the inner message without the code prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::RateLimited(m)
            | Self::QuotaExhausted(m)
            | Self::Transport(m)
            | Self::Config(m) => m,
            Self::Upstream { message, .. } => message,
        }
    }

    /// Human-readable text suitable for a failure toast.
    pub fn user_message(&self) -> String {
        match self {
            Self::RateLimited(_) => {
                "Too many requests right now. Please wait a moment and try again.".to_owned()
            }
            Self::QuotaExhausted(_) => {
                "The assistant has run out of usage credits. Please try again later.".to_owned()
            }
            Self::Upstream { status, .. } => {
                format!("The assistant service failed to respond (HTTP {status}).")
            }
            Self::Transport(_) => {
                "Could not reach the assistant service. Check your connection and try again."
                    .to_owned()
            }
            Self::Config(m) => format!("The assistant is not configured correctly: {m}"),
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Extract an error message from an error response body.
fn extract_error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let from_json = parsed.as_ref().and_then(|v| {
        let error = v.get("error")?;
        error
            .as_str()
            .or_else(|| error.get("message").and_then(|m| m.as_str()))
            .map(str::to_owned)
    });
    match from_json {
        Some(message) => message,
        None if body.trim().is_empty() => "no error details".to_owned(),
        None => body.trim().to_owned(),
    }
}
