//! Speech-to-text capture state machine.
//!
//! ```text
//!            start (available)            transcript              grace elapsed
//!   idle ─────────────────────▶ listening ──────────▶ processing ─────────────▶ idle
//!    │                          │   │   │
//!    │ start (unavailable)      │   │   └─ ended silently / timeout ──────────▶ idle
//!    ▼                          │   └─ capture failure
//!  error ◀──────────────────────┘
//!    │ clear_error
//!    ▼
//!   idle
//! ```
//!
//! [`VoiceCapture::start_listening`] resolves exactly once per call: with the
//! transcript, with `None` for a silent end, or with a classified
//! [`VoiceError`]. The recognizer reports through a channel, so late or
//! duplicate platform callbacks after resolution are dropped.
//!
//! Hosts that only allow microphone access from a user gesture (browsers)
//! require `start_listening` to be invoked from a direct user action. This
//! is a precondition on callers and is not checked here.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::{VoiceError, VoiceErrorKind, VoiceState};
use crate::config::{SpeechLanguage, VoiceConfig};

/// Callback from the recognition engine for the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// A final recognized transcript.
    Transcript(String),
    /// A failure, as a platform error code (`not-allowed`, `no-speech`, ...).
    Error(String),
    /// The engine stopped listening.
    End,
}

/// A platform speech recognition engine.
pub trait SpeechRecognizer: Send + Sync {
    /// Whether this host can capture speech at all.
    fn is_available(&self) -> bool;

    /// Begin one recognition session in `language`, reporting on `events`.
    ///
    /// Returns a platform error code if the session cannot be started.
    fn start(
        &self,
        language: &str,
        events: mpsc::UnboundedSender<RecognitionEvent>,
    ) -> Result<(), String>;

    /// Stop listening and deliver whatever was heard.
    fn stop(&self);

    /// Stop listening and discard the session.
    fn abort(&self);
}

/// Observable snapshot of the capture controller.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CaptureStatus {
    pub state: VoiceState,
    /// Last failure, kept until acknowledged or until a capture succeeds.
    pub error: Option<VoiceError>,
}

/// Owns the speech recognizer and its state machine.
pub struct VoiceCapture {
    recognizer: Arc<dyn SpeechRecognizer>,
    status: watch::Sender<CaptureStatus>,
    language: watch::Sender<SpeechLanguage>,
    timeout: Duration,
    grace: Duration,
}

impl std::fmt::Debug for VoiceCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceCapture")
            .field("status", &*self.status.borrow())
            .field("language", &*self.language.borrow())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl VoiceCapture {
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>, config: &VoiceConfig) -> Self {
        Self {
            recognizer,
            status: watch::Sender::new(CaptureStatus::default()),
            language: watch::Sender::new(config.language),
            timeout: config.capture_timeout(),
            grace: config.processing_grace(),
        }
    }

    /// Current state.
    pub fn state(&self) -> VoiceState {
        self.status.borrow().state
    }

    /// Current state and last error.
    pub fn status(&self) -> CaptureStatus {
        self.status.borrow().clone()
    }

    /// Watch state changes (for UI indicators).
    pub fn subscribe(&self) -> watch::Receiver<CaptureStatus> {
        self.status.subscribe()
    }

    /// Recognition language for subsequent captures.
    pub fn set_language(&self, language: SpeechLanguage) {
        self.language.send_replace(language);
    }

    pub fn language(&self) -> SpeechLanguage {
        *self.language.borrow()
    }

    /// Capture one utterance.
    ///
    /// Resolves to `Ok(Some(transcript))` on success and `Ok(None)` when the
    /// engine ends without hearing anything and without an error.
    ///
    /// # Errors
    ///
    /// - [`VoiceErrorKind::Busy`] if a capture is already running; the
    ///   running capture and the state are left untouched.
    /// - The recorded error, unchanged, while the state is `error`; call
    ///   [`clear_error`](Self::clear_error) first.
    /// - [`VoiceErrorKind::Unsupported`] if the host cannot capture speech.
    /// - [`VoiceErrorKind::NoSpeech`] if nothing arrives before the timeout;
    ///   the state returns to `idle`.
    /// - Any classified engine failure; the state becomes `error` until
    ///   [`clear_error`](Self::clear_error).
    pub async fn start_listening(&self) -> Result<Option<String>, VoiceError> {
        if !self.recognizer.is_available() {
            let err = VoiceError::from_kind(VoiceErrorKind::Unsupported);
            self.fail(&err);
            return Err(err);
        }

        let mut refused = None;
        self.status.send_if_modified(|status| match status.state {
            VoiceState::Error => {
                refused = Some(
                    status
                        .error
                        .clone()
                        .unwrap_or_else(|| VoiceError::from_kind(VoiceErrorKind::Other)),
                );
                false
            }
            state if state.is_busy() => {
                refused = Some(VoiceError::from_kind(VoiceErrorKind::Busy));
                false
            }
            _ => {
                status.state = VoiceState::Listening;
                true
            }
        });
        if let Some(err) = refused {
            debug!(kind = %err.kind, "capture refused");
            return Err(err);
        }

        let mut session = ListeningSession {
            capture: self,
            resolved: false,
        };
        let result = self.listen().await;
        session.resolved = true;
        result
    }

    async fn listen(&self) -> Result<Option<String>, VoiceError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let language = self.language();
        info!(language = %language, "listening");

        if let Err(code) = self.recognizer.start(language.tag(), tx) {
            let err = VoiceError::from_platform_code(&code);
            warn!(code = %code, "recognizer failed to start");
            self.fail(&err);
            return Err(err);
        }

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(RecognitionEvent::Transcript(text)) => {
                        let text = text.trim();
                        if text.is_empty() {
                            continue;
                        }
                        let transcript = text.to_owned();
                        self.recognizer.stop();
                        self.set_state(VoiceState::Processing);
                        info!(chars = transcript.chars().count(), "transcript received");
                        tokio::time::sleep(self.grace).await;
                        self.status.send_modify(|status| {
                            status.state = VoiceState::Idle;
                            status.error = None;
                        });
                        return Ok(Some(transcript));
                    }
                    Some(RecognitionEvent::Error(code)) => {
                        let err = VoiceError::from_platform_code(&code);
                        warn!(code = %code, kind = %err.kind, "capture failed");
                        self.fail(&err);
                        return Err(err);
                    }
                    Some(RecognitionEvent::End) | None => {
                        debug!("recognizer ended without a transcript");
                        self.set_state(VoiceState::Idle);
                        return Ok(None);
                    }
                },
                _ = &mut deadline => {
                    info!(timeout_ms = self.timeout.as_millis() as u64, "capture timed out");
                    self.recognizer.abort();
                    self.set_state(VoiceState::Idle);
                    return Err(VoiceError::new(VoiceErrorKind::NoSpeech, "No speech detected."));
                }
            }
        }
    }

    /// Ask the engine to stop; the pending capture then resolves normally.
    pub fn stop_listening(&self) {
        if self.state() == VoiceState::Listening {
            debug!("stop listening requested");
            self.recognizer.stop();
        }
    }

    /// Acknowledge the last failure, returning `error` to `idle`.
    pub fn clear_error(&self) {
        self.status.send_if_modified(|status| {
            let had_error = status.error.take().is_some();
            if status.state == VoiceState::Error {
                status.state = VoiceState::Idle;
                return true;
            }
            had_error
        });
    }

    fn set_state(&self, state: VoiceState) {
        self.status.send_if_modified(|status| {
            let changed = status.state != state;
            status.state = state;
            changed
        });
    }

    fn fail(&self, err: &VoiceError) {
        self.status.send_modify(|status| {
            status.state = VoiceState::Error;
            status.error = Some(err.clone());
        });
    }
}

/// Returns the controller to `idle` if a capture future is dropped before
/// it resolves.
struct ListeningSession<'a> {
    capture: &'a VoiceCapture,
    resolved: bool,
}

impl Drop for ListeningSession<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            debug!("capture abandoned; aborting recognizer");
            self.capture.recognizer.abort();
            self.capture.set_state(VoiceState::Idle);
        }
    }
}
