//! Streaming chat completion: wire decoding, the HTTP client, and the
//! conversation message model they share.

pub mod client;
pub mod decoder;
pub mod error;

pub use client::{CallbackSink, ChatBackend, ChatStreamClient, DeltaSink, StreamOutcome};
pub use decoder::{DeltaDecoder, Frame, decode_frame, delta_stream};
pub use error::ChatError;

use serde::{Deserialize, Serialize};

/// Who authored a message.
///
/// There is no system role: the system turn is injected by the completion
/// service itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// The wire name of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One turn of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}
