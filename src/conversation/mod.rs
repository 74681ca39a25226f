//! Conversation orchestrator.
//!
//! A single actor task owns the message list and the active stream session.
//! Callers talk to it through a cloneable [`ConversationHandle`] and observe
//! it through [`ConversationEvent`]s.
//!
//! ```text
//!   ConversationHandle ──commands──▶ actor ──history──▶ ChatBackend task
//!          ▲                          │  ▲                   │
//!          └──────── events ──────────┘  └── tagged deltas ──┘
//! ```
//!
//! Every session gets a fresh id. Deltas and outcomes are tagged with it, so
//! anything arriving from a session that has since been cancelled or
//! superseded is discarded. A new message always cancels the previous
//! session before starting its own.

pub mod events;

pub use events::{ConversationEvent, SESSION_CRASHED};

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chat::{CallbackSink, ChatBackend, ChatError, Message, Role, StreamOutcome};
use crate::config::{SpeechLanguage, VoiceConfig};
use crate::error::{AssistantError, Result};
use crate::voice::{VoiceCapture, VoiceError, VoicePlayback};

const COMMAND_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;

enum Command {
    SendMessage(String),
    CancelStream,
    StartVoiceCapture,
    Speak(String),
    StopSpeaking,
    ToggleMute(oneshot::Sender<bool>),
    ClearVoiceError,
    Clear,
    SetLanguage(SpeechLanguage),
    SetAutoSpeak(bool),
    Messages(oneshot::Sender<Vec<Message>>),
    Shutdown,
}

/// How a session task ended.
enum SessionEnd {
    Outcome(StreamOutcome),
    Failed(ChatError),
    /// The task panicked before reporting an outcome.
    Crashed(String),
}

/// Reports from tasks spawned by the actor.
enum Internal {
    Delta { session: Uuid, delta: String },
    Finished { session: Uuid, end: SessionEnd },
    Captured(std::result::Result<Option<String>, VoiceError>),
}

struct ActiveSession {
    id: Uuid,
    cancel: CancellationToken,
}

/// Cloneable front door to a running conversation.
#[derive(Clone)]
pub struct ConversationHandle {
    command_tx: mpsc::Sender<Command>,
    event_tx: broadcast::Sender<ConversationEvent>,
}

impl ConversationHandle {
    /// Send a user message and stream the reply. Blank text is ignored.
    pub async fn send_message(&self, text: impl Into<String>) -> Result<()> {
        self.command(Command::SendMessage(text.into())).await
    }

    /// Cancel the reply being streamed, keeping any partial text.
    pub async fn cancel_active_stream(&self) -> Result<()> {
        self.command(Command::CancelStream).await
    }

    /// Capture one spoken utterance and send it as a user message.
    ///
    /// Returns once the capture has started; the outcome arrives as
    /// [`ConversationEvent::TranscriptReceived`] or
    /// [`ConversationEvent::VoiceCaptureFailed`].
    pub async fn start_voice_capture(&self) -> Result<()> {
        self.command(Command::StartVoiceCapture).await
    }

    /// Read `text` aloud.
    pub async fn speak(&self, text: impl Into<String>) -> Result<()> {
        self.command(Command::Speak(text.into())).await
    }

    pub async fn stop_speaking(&self) -> Result<()> {
        self.command(Command::StopSpeaking).await
    }

    /// Flip the mute flag, returning the new value.
    pub async fn toggle_mute(&self) -> Result<bool> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command(Command::ToggleMute(reply_tx)).await?;
        reply_rx
            .await
            .map_err(|e| AssistantError::Conversation(format!("mute reply dropped: {e}")))
    }

    /// Acknowledge the last voice capture failure.
    pub async fn clear_voice_error(&self) -> Result<()> {
        self.command(Command::ClearVoiceError).await
    }

    /// Discard all messages, stop playback and cancel any stream.
    pub async fn clear(&self) -> Result<()> {
        self.command(Command::Clear).await
    }

    /// Language for both capture and playback.
    pub async fn set_language(&self, language: SpeechLanguage) -> Result<()> {
        self.command(Command::SetLanguage(language)).await
    }

    /// Speak each completed reply.
    pub async fn set_auto_speak(&self, enabled: bool) -> Result<()> {
        self.command(Command::SetAutoSpeak(enabled)).await
    }

    /// Snapshot of the message list, including any reply still streaming.
    pub async fn messages(&self) -> Result<Vec<Message>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command(Command::Messages(reply_tx)).await?;
        reply_rx
            .await
            .map_err(|e| AssistantError::Conversation(format!("messages reply dropped: {e}")))
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.event_tx.subscribe()
    }

    /// Stop the actor, cancelling any stream. Later calls fail.
    pub async fn shutdown(&self) -> Result<()> {
        self.command(Command::Shutdown).await
    }

    async fn command(&self, command: Command) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| AssistantError::Conversation("conversation has stopped".to_owned()))
    }
}

/// The conversation actor.
pub struct Conversation {
    backend: Arc<dyn ChatBackend>,
    capture: Arc<VoiceCapture>,
    playback: VoicePlayback,
    messages: Vec<Message>,
    active: Option<ActiveSession>,
    auto_speak: bool,
    event_tx: broadcast::Sender<ConversationEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
}

impl Conversation {
    /// Start a conversation actor on the current Tokio runtime.
    ///
    /// The actor stops on [`ConversationHandle::shutdown`] or when every
    /// handle has been dropped.
    pub fn spawn(
        backend: Arc<dyn ChatBackend>,
        capture: Arc<VoiceCapture>,
        playback: VoicePlayback,
        config: &VoiceConfig,
    ) -> ConversationHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (event_tx, _event_rx) = broadcast::channel(EVENT_CAPACITY);

        let actor = Self {
            backend,
            capture,
            playback,
            messages: Vec::new(),
            active: None,
            auto_speak: config.auto_speak,
            event_tx: event_tx.clone(),
            internal_tx,
        };
        tokio::spawn(actor.run(command_rx, internal_rx));

        ConversationHandle {
            command_tx,
            event_tx,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        info!(auto_speak = self.auto_speak, "conversation started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(report) = internal.recv() => self.handle_internal(report),
            }
        }

        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
        self.playback.stop();
        info!(messages = self.messages.len(), "conversation stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::SendMessage(text) => self.send_message(&text),
            Command::CancelStream => self.cancel_active(),
            Command::StartVoiceCapture => self.start_voice_capture(),
            Command::Speak(text) => {
                let outcome = self.playback.speak(&text);
                debug!(?outcome, "speak requested");
            }
            Command::StopSpeaking => self.playback.stop(),
            Command::ToggleMute(reply) => {
                let _ = reply.send(self.playback.toggle_mute());
            }
            Command::ClearVoiceError => self.capture.clear_error(),
            Command::Clear => self.clear(),
            Command::SetLanguage(language) => {
                info!(%language, "language changed");
                self.capture.set_language(language);
                self.playback.set_language(language);
            }
            Command::SetAutoSpeak(enabled) => self.auto_speak = enabled,
            Command::Messages(reply) => {
                let _ = reply.send(self.messages.clone());
            }
            // Handled by the run loop.
            Command::Shutdown => {}
        }
    }

    fn handle_internal(&mut self, report: Internal) {
        match report {
            Internal::Delta { session, delta } => self.apply_delta(session, delta),
            Internal::Finished { session, end } => self.finish(session, end),
            Internal::Captured(Ok(Some(text))) => {
                self.emit(ConversationEvent::TranscriptReceived { text: text.clone() });
                self.send_message(&text);
            }
            Internal::Captured(Ok(None)) => debug!("voice capture ended without speech"),
            Internal::Captured(Err(err)) => {
                debug!(kind = %err.kind, "voice capture failed");
                self.emit(ConversationEvent::VoiceCaptureFailed(err));
            }
        }
    }

    fn send_message(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            debug!("ignoring blank message");
            return;
        }
        self.cancel_active();

        self.messages.push(Message::user(text));
        self.emit(ConversationEvent::UserMessage {
            text: text.to_owned(),
        });

        let history = self.messages.clone();
        self.messages.push(Message::assistant(""));

        let session = Uuid::new_v4();
        let cancel = CancellationToken::new();
        self.active = Some(ActiveSession {
            id: session,
            cancel: cancel.clone(),
        });
        self.emit(ConversationEvent::AssistantStarted { session });
        info!(%session, turns = history.len(), "session started");

        spawn_session(
            Arc::clone(&self.backend),
            history,
            session,
            cancel,
            self.internal_tx.clone(),
        );
    }

    fn apply_delta(&mut self, session: Uuid, delta: String) {
        if !self.is_active(session) {
            debug!(%session, "discarding delta from stale session");
            return;
        }
        let Some(slot) = self
            .messages
            .last_mut()
            .filter(|m| m.role == Role::Assistant)
        else {
            warn!(%session, "active session has no assistant message");
            return;
        };
        slot.content.push_str(&delta);
        self.emit(ConversationEvent::AssistantDelta { session, delta });
    }

    fn finish(&mut self, session: Uuid, end: SessionEnd) {
        if !self.is_active(session) {
            debug!(%session, "ignoring outcome of stale session");
            return;
        }
        self.active = None;

        match end {
            SessionEnd::Outcome(StreamOutcome::Completed) => {
                // A completed turn keeps its reply even when it is empty.
                let text = self.slot_text();
                info!(%session, chars = text.chars().count(), "session completed");
                if self.auto_speak && !text.is_empty() {
                    let outcome = self.playback.speak(&text);
                    debug!(?outcome, "auto-speak");
                }
                self.emit(ConversationEvent::AssistantCompleted { session, text });
            }
            SessionEnd::Outcome(StreamOutcome::Cancelled) => {
                self.close_slot();
                info!(%session, "session cancelled by backend");
                self.emit(ConversationEvent::StreamCancelled { session });
            }
            SessionEnd::Failed(err) => {
                self.close_slot();
                warn!(%session, code = err.code(), error = %err, "session failed");
                self.emit(ConversationEvent::StreamFailed {
                    session,
                    code: err.code().to_owned(),
                    message: err.user_message(),
                });
            }
            SessionEnd::Crashed(reason) => {
                self.close_slot();
                warn!(%session, reason = %reason, "session crashed");
                self.emit(ConversationEvent::StreamFailed {
                    session,
                    code: SESSION_CRASHED.to_owned(),
                    message: "Something went wrong. Please try again.".to_owned(),
                });
            }
        }
    }

    fn cancel_active(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.cancel.cancel();
        self.close_slot();
        info!(session = %active.id, "session cancelled");
        self.emit(ConversationEvent::StreamCancelled { session: active.id });
    }

    fn clear(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
        self.messages.clear();
        self.playback.stop();
        info!("conversation cleared");
        self.emit(ConversationEvent::Cleared);
    }

    fn start_voice_capture(&self) {
        let capture = Arc::clone(&self.capture);
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = capture.start_listening().await;
            let _ = internal_tx.send(Internal::Captured(result));
        });
    }

    fn slot_text(&self) -> String {
        match self.messages.last() {
            Some(last) if last.role == Role::Assistant => last.content.clone(),
            _ => String::new(),
        }
    }

    /// Close the trailing assistant message of an interrupted turn,
    /// dropping it if it is empty.
    fn close_slot(&mut self) {
        if self
            .messages
            .last()
            .is_some_and(|m| m.role == Role::Assistant && m.content.is_empty())
        {
            self.messages.pop();
        }
    }

    fn is_active(&self, session: Uuid) -> bool {
        self.active.as_ref().is_some_and(|a| a.id == session)
    }

    fn emit(&self, event: ConversationEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}

/// Run one backend call on its own task, forwarding tagged deltas and the
/// outcome to the actor.
fn spawn_session(
    backend: Arc<dyn ChatBackend>,
    history: Vec<Message>,
    session: Uuid,
    cancel: CancellationToken,
    internal_tx: mpsc::UnboundedSender<Internal>,
) {
    let delta_tx = internal_tx.clone();
    let worker = tokio::spawn(async move {
        let mut sink = CallbackSink::new(
            move |delta: &str| {
                let _ = delta_tx.send(Internal::Delta {
                    session,
                    delta: delta.to_owned(),
                });
            },
            || {},
        );
        backend.stream_chat(&history, &mut sink, &cancel).await
    });

    tokio::spawn(async move {
        let end = match worker.await {
            Ok(Ok(outcome)) => SessionEnd::Outcome(outcome),
            Ok(Err(err)) => SessionEnd::Failed(err),
            Err(join_err) => SessionEnd::Crashed(join_err.to_string()),
        };
        let _ = internal_tx.send(Internal::Finished { session, end });
    });
}
