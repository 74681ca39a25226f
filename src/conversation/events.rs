//! Events broadcast by the conversation actor.

use uuid::Uuid;

use crate::voice::VoiceError;

/// Error code for a session that ended without reporting an outcome.
pub const SESSION_CRASHED: &str = "SESSION_CRASHED";

/// Something the UI may want to render.
///
/// Every `Assistant*` and `Stream*` event carries the id of the session it
/// belongs to; a session is one assistant reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEvent {
    /// A user message was appended.
    UserMessage { text: String },
    /// An empty assistant message was opened for a new session.
    AssistantStarted { session: Uuid },
    /// Text was appended to the session's assistant message.
    AssistantDelta { session: Uuid, delta: String },
    /// The session completed with this final text.
    AssistantCompleted { session: Uuid, text: String },
    /// The session was cancelled. Partial text, if any, is kept.
    StreamCancelled { session: Uuid },
    /// The session failed. `message` is fit to show the user.
    StreamFailed {
        session: Uuid,
        code: String,
        message: String,
    },
    /// Voice capture produced a transcript, which is sent next.
    TranscriptReceived { text: String },
    /// Voice capture failed.
    VoiceCaptureFailed(VoiceError),
    /// All messages were discarded.
    Cleared,
}

impl ConversationEvent {
    /// Session this event belongs to, if any.
    pub fn session(&self) -> Option<Uuid> {
        match self {
            Self::AssistantStarted { session }
            | Self::AssistantDelta { session, .. }
            | Self::AssistantCompleted { session, .. }
            | Self::StreamCancelled { session }
            | Self::StreamFailed { session, .. } => Some(*session),
            Self::UserMessage { .. }
            | Self::TranscriptReceived { .. }
            | Self::VoiceCaptureFailed(_)
            | Self::Cleared => None,
        }
    }
}
