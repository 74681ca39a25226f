//! Voice input and output controllers.
//!
//! Both controllers wrap a platform capability behind a trait so the host
//! (browser bridge, desktop engine, test double) can be injected:
//!
//! - [`capture::VoiceCapture`] drives a [`capture::SpeechRecognizer`] through
//!   the `idle → listening → processing → idle` state machine and resolves
//!   each invocation to exactly one transcript or one classified
//!   [`VoiceError`].
//! - [`playback::VoicePlayback`] drives a [`playback::SpeechSynthesizer`]
//!   with single-utterance discipline, a mute flag and voice selection.
//!
//! Each speech engine is a process-wide resource: create one controller of
//! each kind and share it.

pub mod capture;
pub mod playback;
pub mod sanitize;

pub use capture::{CaptureStatus, RecognitionEvent, SpeechRecognizer, VoiceCapture};
pub use playback::{
    SpeakOutcome, SpeechSynthesizer, Utterance, UtteranceEvent, Voice, VoicePlayback,
    select_voice,
};
pub use sanitize::sanitize_for_speech;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// State of the capture controller.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceState {
    #[default]
    Idle,
    Listening,
    Processing,
    Error,
}

impl VoiceState {
    /// Whether a capture is in flight.
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Listening | Self::Processing)
    }
}

/// Classification of a capture failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VoiceErrorKind {
    PermissionDenied,
    NoSpeech,
    Network,
    NoMicrophone,
    Cancelled,
    Unsupported,
    /// A capture was requested while another one was still running.
    Busy,
    Other,
}

impl VoiceErrorKind {
    /// Map a platform recognition error code to a kind.
    ///
    /// The codes are those of the Web Speech API, which other engines
    /// bridged into this crate are expected to reuse.
    pub fn from_platform_code(code: &str) -> Self {
        match code.trim() {
            "not-allowed" | "service-not-allowed" => Self::PermissionDenied,
            "no-speech" => Self::NoSpeech,
            "network" => Self::Network,
            "audio-capture" => Self::NoMicrophone,
            "aborted" => Self::Cancelled,
            _ => Self::Other,
        }
    }

    /// Stable kebab-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission-denied",
            Self::NoSpeech => "no-speech",
            Self::Network => "network",
            Self::NoMicrophone => "no-microphone",
            Self::Cancelled => "cancelled",
            Self::Unsupported => "unsupported",
            Self::Busy => "busy",
            Self::Other => "other",
        }
    }

    /// Whether simply trying again can succeed.
    ///
    /// Permission, hardware and platform-support failures need the user to
    /// change something first.
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            Self::PermissionDenied | Self::NoMicrophone | Self::Unsupported
        )
    }

    fn default_message(self) -> &'static str {
        match self {
            Self::PermissionDenied => {
                "Microphone access was denied. Allow microphone access and try again."
            }
            Self::NoSpeech => "No speech detected. Please try again.",
            Self::Network => "Speech recognition needs a network connection.",
            Self::NoMicrophone => "No microphone was found.",
            Self::Cancelled => "Listening was cancelled.",
            Self::Unsupported => "Voice input is not supported on this device.",
            Self::Busy => "Already listening.",
            Self::Other => "Speech recognition failed.",
        }
    }
}

impl std::fmt::Display for VoiceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified capture failure with a message for the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct VoiceError {
    pub kind: VoiceErrorKind,
    pub message: String,
}

impl VoiceError {
    pub fn new(kind: VoiceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Error with the stock message for `kind`.
    pub fn from_kind(kind: VoiceErrorKind) -> Self {
        Self::new(kind, kind.default_message())
    }

    /// Classify a platform error code.
    pub fn from_platform_code(code: &str) -> Self {
        let kind = VoiceErrorKind::from_platform_code(code);
        match kind {
            VoiceErrorKind::Other => Self::new(kind, format!("Speech recognition failed: {code}")),
            _ => Self::from_kind(kind),
        }
    }
}

/// Recognizer for hosts with no speech input (plain terminals, tests).
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedRecognizer;

impl SpeechRecognizer for UnsupportedRecognizer {
    fn is_available(&self) -> bool {
        false
    }

    fn start(
        &self,
        _language: &str,
        _events: mpsc::UnboundedSender<RecognitionEvent>,
    ) -> Result<(), String> {
        Err("not-supported".to_owned())
    }

    fn stop(&self) {}

    fn abort(&self) {}
}

/// Synthesizer for hosts with no speech output.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedSynthesizer;

#[async_trait]
impl SpeechSynthesizer for UnsupportedSynthesizer {
    fn is_available(&self) -> bool {
        false
    }

    fn voices(&self) -> Vec<Voice> {
        Vec::new()
    }

    async fn voices_changed(&self) {
        std::future::pending::<()>().await;
    }

    fn speak(&self, _utterance: Utterance, _events: mpsc::UnboundedSender<UtteranceEvent>) {}

    fn cancel(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_codes_classify() {
        let cases = [
            ("not-allowed", VoiceErrorKind::PermissionDenied),
            ("service-not-allowed", VoiceErrorKind::PermissionDenied),
            ("no-speech", VoiceErrorKind::NoSpeech),
            ("network", VoiceErrorKind::Network),
            ("audio-capture", VoiceErrorKind::NoMicrophone),
            ("aborted", VoiceErrorKind::Cancelled),
            ("language-not-supported", VoiceErrorKind::Other),
        ];
        for (code, kind) in cases {
            assert_eq!(VoiceErrorKind::from_platform_code(code), kind, "{code}");
        }
    }

    #[test]
    fn unknown_code_keeps_code_in_message() {
        let err = VoiceError::from_platform_code("bad-grammar");
        assert_eq!(err.kind, VoiceErrorKind::Other);
        assert!(err.message.contains("bad-grammar"));
    }

    #[test]
    fn terminal_kinds_are_not_retryable() {
        assert!(!VoiceErrorKind::PermissionDenied.is_retryable());
        assert!(!VoiceErrorKind::NoMicrophone.is_retryable());
        assert!(!VoiceErrorKind::Unsupported.is_retryable());
        assert!(VoiceErrorKind::NoSpeech.is_retryable());
        assert!(VoiceErrorKind::Network.is_retryable());
    }

    #[test]
    fn kind_names_are_kebab_case() {
        assert_eq!(VoiceErrorKind::NoMicrophone.to_string(), "no-microphone");
        let json = serde_json::to_string(&VoiceErrorKind::PermissionDenied).unwrap_or_default();
        assert_eq!(json, "\"permission-denied\"");
    }

    #[test]
    fn busy_states() {
        assert!(VoiceState::Listening.is_busy());
        assert!(VoiceState::Processing.is_busy());
        assert!(!VoiceState::Idle.is_busy());
        assert!(!VoiceState::Error.is_busy());
    }
}
