//! Error types for the assistant core.

use crate::chat::ChatError;
use crate::voice::VoiceError;

/// Top-level error type for the assistant.
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Chat streaming error.
    #[error("chat error: {0}")]
    Chat(#[from] ChatError),

    /// Voice capture error.
    #[error("voice error: {0}")]
    Voice(#[from] VoiceError),

    /// The conversation actor is gone or failed to answer.
    #[error("conversation error: {0}")]
    Conversation(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AssistantError>;
