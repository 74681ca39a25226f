//! Sahayak: streaming conversational assistant core.
//!
//! This crate holds the platform-independent half of a voice-enabled
//! assistant for government scheme questions:
//! user text or speech → completion service → streamed reply → optional speech
//!
//! # Architecture
//!
//! - **Chat**: [`chat::ChatStreamClient`] posts the history to an
//!   OpenAI-compatible endpoint and decodes its server-sent event stream
//!   into text deltas, with cancellation and classified failures
//! - **Voice capture**: [`voice::VoiceCapture`] runs a platform recognizer
//!   through a small state machine with a no-speech timeout
//! - **Voice playback**: [`voice::VoicePlayback`] speaks sanitized replies
//!   one utterance at a time, with mute and per-language voice selection
//! - **Conversation**: [`conversation::Conversation`] is an actor that ties
//!   them together and broadcasts [`ConversationEvent`]s for a UI
//!
//! Speech engines are injected through the [`voice::SpeechRecognizer`] and
//! [`voice::SpeechSynthesizer`] traits, the completion service through
//! [`chat::ChatBackend`].

pub mod chat;
pub mod config;
pub mod conversation;
pub mod error;
pub mod voice;

pub use chat::{ChatBackend, ChatError, ChatStreamClient, Message, Role, StreamOutcome};
pub use config::{AssistantConfig, ChatConfig, SpeechLanguage, VoiceConfig};
pub use conversation::{Conversation, ConversationEvent, ConversationHandle};
pub use error::{AssistantError, Result};
pub use voice::{VoiceCapture, VoiceError, VoiceErrorKind, VoicePlayback, VoiceState};
