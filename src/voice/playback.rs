//! Text-to-speech playback controller.
//!
//! At most one utterance is audible at a time: every [`VoicePlayback::speak`]
//! cancels whatever is playing before issuing the next utterance. Each call
//! takes a new generation number; an utterance only plays, and its events
//! only move the `speaking` flag, while its generation is current.
//!
//! Synthesis engines often load their voice catalog lazily. When the
//! catalog is empty at call time the controller waits for the engine's
//! catalog notification or for a bounded timer, whichever comes first, and
//! then speaks once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::sanitize::sanitize_for_speech;
use crate::config::{SpeechLanguage, VoiceConfig};

/// A synthesis voice offered by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub name: String,
    /// BCP 47 tag, e.g. `hi-IN`. Some engines report `hi_IN`.
    pub lang: String,
    /// The engine's own default voice.
    #[serde(default)]
    pub is_default: bool,
}

impl Voice {
    pub fn new(name: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lang: lang.into(),
            is_default: false,
        }
    }
}

/// One request to the synthesis engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub text: String,
    pub lang: String,
    /// `None` lets the engine choose.
    pub voice: Option<Voice>,
}

/// Lifecycle callback for an issued utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtteranceEvent {
    Started,
    Ended,
    Failed(String),
}

/// A platform speech synthesis engine.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Whether this host can synthesize speech at all.
    fn is_available(&self) -> bool;

    /// Current voice catalog. May be empty until the engine has loaded it.
    fn voices(&self) -> Vec<Voice>;

    /// Resolves when the voice catalog changes.
    async fn voices_changed(&self);

    /// Start speaking, reporting lifecycle events on `events`.
    fn speak(&self, utterance: Utterance, events: mpsc::UnboundedSender<UtteranceEvent>);

    /// Silence and discard every queued or playing utterance.
    fn cancel(&self);
}

/// What a [`VoicePlayback::speak`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakOutcome {
    Muted,
    Unavailable,
    /// Nothing speakable remained after sanitizing.
    Empty,
    Started,
    /// Queued until the voice catalog loads or the wait expires.
    AwaitingVoices,
}

#[derive(Debug)]
struct PlaybackState {
    generation: u64,
    /// Last generation handed to the engine.
    issued: u64,
    language: SpeechLanguage,
}

struct PlaybackInner {
    synth: Arc<dyn SpeechSynthesizer>,
    muted: AtomicBool,
    speaking: watch::Sender<bool>,
    state: Mutex<PlaybackState>,
    fallback_language: String,
    catalog_wait: Duration,
}

/// Owns the speech synthesizer. Cheap to clone; clones share one engine.
#[derive(Clone)]
pub struct VoicePlayback {
    inner: Arc<PlaybackInner>,
}

impl std::fmt::Debug for VoicePlayback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoicePlayback")
            .field("muted", &self.is_muted())
            .field("speaking", &self.is_speaking())
            .finish()
    }
}

impl VoicePlayback {
    pub fn new(synth: Arc<dyn SpeechSynthesizer>, config: &VoiceConfig) -> Self {
        Self {
            inner: Arc::new(PlaybackInner {
                synth,
                muted: AtomicBool::new(config.muted),
                speaking: watch::Sender::new(false),
                state: Mutex::new(PlaybackState {
                    generation: 0,
                    issued: 0,
                    language: config.language,
                }),
                fallback_language: config.fallback_language.clone(),
                catalog_wait: config.voice_catalog_wait(),
            }),
        }
    }

    /// Speak `text` after flattening its Markdown, replacing anything
    /// currently playing.
    ///
    /// Must be called within a Tokio runtime.
    pub fn speak(&self, text: &str) -> SpeakOutcome {
        if self.is_muted() {
            debug!("speak skipped: muted");
            return SpeakOutcome::Muted;
        }
        if !self.inner.synth.is_available() {
            debug!("speak skipped: synthesis unavailable");
            return SpeakOutcome::Unavailable;
        }

        let generation = self.inner.interrupt();
        let spoken = sanitize_for_speech(text);
        if spoken.is_empty() {
            debug!("speak skipped: nothing speakable");
            return SpeakOutcome::Empty;
        }

        if !self.inner.synth.voices().is_empty() {
            self.inner.issue(generation, spoken);
            return SpeakOutcome::Started;
        }

        debug!(generation, "voice catalog empty; waiting");
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                _ = inner.synth.voices_changed() => debug!("voice catalog ready"),
                _ = tokio::time::sleep(inner.catalog_wait) => debug!("voice catalog wait expired"),
            }
            inner.issue(generation, spoken);
        });
        SpeakOutcome::AwaitingVoices
    }

    /// Silence playback and drop any utterance still waiting for voices.
    pub fn stop(&self) {
        self.inner.interrupt();
    }

    /// Flip the mute flag, returning the new value. Muting stops playback;
    /// unmuting does not resume it.
    pub fn toggle_mute(&self) -> bool {
        let muted = !self.inner.muted.fetch_xor(true, Ordering::SeqCst);
        info!(muted, "mute toggled");
        if muted {
            self.stop();
        }
        muted
    }

    pub fn set_muted(&self, muted: bool) {
        let was = self.inner.muted.swap(muted, Ordering::SeqCst);
        if muted && !was {
            self.stop();
        }
    }

    pub fn is_muted(&self) -> bool {
        self.inner.muted.load(Ordering::SeqCst)
    }

    /// Whether an utterance is audible. For UI indicators only.
    pub fn is_speaking(&self) -> bool {
        *self.inner.speaking.borrow()
    }

    pub fn subscribe_speaking(&self) -> watch::Receiver<bool> {
        self.inner.speaking.subscribe()
    }

    /// Synthesis language for subsequent utterances.
    pub fn set_language(&self, language: SpeechLanguage) {
        self.inner.lock_state().language = language;
    }

    pub fn language(&self) -> SpeechLanguage {
        self.inner.lock_state().language
    }
}

impl PlaybackInner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, PlaybackState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Invalidate the current generation and silence the engine.
    fn interrupt(&self) -> u64 {
        let mut state = self.lock_state();
        state.generation += 1;
        self.synth.cancel();
        self.speaking.send_replace(false);
        state.generation
    }

    /// Hand `text` to the engine if `generation` is still current and has
    /// not been issued yet.
    fn issue(self: &Arc<Self>, generation: u64, text: String) -> bool {
        let mut state = self.lock_state();
        if state.generation != generation || state.issued == generation {
            debug!(generation, current = state.generation, "utterance superseded");
            return false;
        }
        if self.muted.load(Ordering::SeqCst) {
            debug!(generation, "utterance dropped: muted while waiting");
            return false;
        }
        state.issued = generation;

        let lang = state.language.tag();
        let voices = self.synth.voices();
        let voice = select_voice(&voices, lang, &self.fallback_language).cloned();
        debug!(
            generation,
            lang,
            voice = voice.as_ref().map(|v| v.name.as_str()),
            chars = text.chars().count(),
            "speaking"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        self.synth.speak(
            Utterance {
                text,
                lang: lang.to_owned(),
                voice,
            },
            tx,
        );
        drop(state);

        tokio::spawn(Arc::clone(self).track(generation, rx));
        true
    }

    /// Mirror utterance events into the `speaking` flag while `generation`
    /// is current.
    async fn track(
        self: Arc<Self>,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<UtteranceEvent>,
    ) {
        while let Some(event) = events.recv().await {
            let state = self.lock_state();
            if state.generation != generation {
                return;
            }
            match event {
                UtteranceEvent::Started => {
                    self.speaking.send_replace(true);
                }
                UtteranceEvent::Ended => {
                    self.speaking.send_replace(false);
                    return;
                }
                UtteranceEvent::Failed(reason) => {
                    warn!(generation, reason = %reason, "utterance failed");
                    self.speaking.send_replace(false);
                    return;
                }
            }
        }

        // Engine dropped the utterance without reporting an end.
        let state = self.lock_state();
        if state.generation == generation {
            self.speaking.send_replace(false);
        }
    }
}

/// Pick the voice for `lang`.
///
/// Priority: exact tag match (case-insensitive, `_` and `-` equivalent),
/// then same primary language, then a voice of `fallback_language`
/// preferring the engine default, then `None`.
pub fn select_voice<'a>(
    voices: &'a [Voice],
    lang: &str,
    fallback_language: &str,
) -> Option<&'a Voice> {
    let wanted = normalize_tag(lang);
    let primary = primary_subtag(&wanted);
    let fallback = normalize_tag(fallback_language);
    let fallback = primary_subtag(&fallback);

    let voice_primary = |voice: &Voice| primary_subtag(&normalize_tag(&voice.lang)).to_owned();

    voices
        .iter()
        .find(|v| normalize_tag(&v.lang) == wanted)
        .or_else(|| voices.iter().find(|v| voice_primary(v) == primary))
        .or_else(|| {
            voices
                .iter()
                .find(|v| v.is_default && voice_primary(v) == fallback)
                .or_else(|| voices.iter().find(|v| voice_primary(v) == fallback))
        })
}

fn normalize_tag(tag: &str) -> String {
    tag.trim().replace('_', "-").to_ascii_lowercase()
}

fn primary_subtag(tag: &str) -> &str {
    tag.split('-').next().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeSynth {
        unavailable: bool,
        catalog: Mutex<Vec<Voice>>,
        catalog_ready: Notify,
        spoken: Mutex<Vec<Utterance>>,
        senders: Mutex<Vec<mpsc::UnboundedSender<UtteranceEvent>>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
        cancels: AtomicUsize,
    }

    impl FakeSynth {
        fn with_voices(voices: Vec<Voice>) -> Arc<Self> {
            let synth = Self::default();
            *synth.catalog.lock().unwrap() = voices;
            Arc::new(synth)
        }

        fn spoken(&self) -> Vec<Utterance> {
            self.spoken.lock().unwrap().clone()
        }

        fn emit(&self, index: usize, event: UtteranceEvent) {
            let senders = self.senders.lock().unwrap();
            let _ = senders[index].send(event);
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for FakeSynth {
        fn is_available(&self) -> bool {
            !self.unavailable
        }

        fn voices(&self) -> Vec<Voice> {
            self.catalog.lock().unwrap().clone()
        }

        async fn voices_changed(&self) {
            self.catalog_ready.notified().await;
        }

        fn speak(&self, utterance: Utterance, events: mpsc::UnboundedSender<UtteranceEvent>) {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            self.spoken.lock().unwrap().push(utterance);
            self.senders.lock().unwrap().push(events);
        }

        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            self.active.store(0, Ordering::SeqCst);
        }
    }

    fn english() -> Vec<Voice> {
        vec![Voice::new("Rishi", "en-IN")]
    }

    fn playback(synth: &Arc<FakeSynth>) -> VoicePlayback {
        VoicePlayback::new(Arc::clone(synth) as Arc<dyn SpeechSynthesizer>, &VoiceConfig::default())
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // ── Single utterance ──────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn second_speak_replaces_first() {
        let synth = FakeSynth::with_voices(english());
        let playback = playback(&synth);

        assert_eq!(playback.speak("A"), SpeakOutcome::Started);
        assert_eq!(playback.speak("B"), SpeakOutcome::Started);

        let spoken = synth.spoken();
        assert_eq!(spoken.len(), 2);
        assert_eq!(spoken[1].text, "B");
        assert_eq!(synth.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(synth.active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn utterance_is_sanitized_and_uses_language() {
        let synth = FakeSynth::with_voices(vec![
            Voice::new("Rishi", "en-IN"),
            Voice::new("Lekha", "hi_IN"),
        ]);
        let playback = playback(&synth);
        playback.set_language(SpeechLanguage::Hindi);

        playback.speak("**नमस्ते** [PM-KISAN](https://pmkisan.gov.in)");
        let utterance = &synth.spoken()[0];
        assert_eq!(utterance.text, "नमस्ते PM-KISAN");
        assert_eq!(utterance.lang, "hi-IN");
        assert_eq!(utterance.voice.as_ref().map(|v| v.name.as_str()), Some("Lekha"));
    }

    #[tokio::test]
    async fn unavailable_and_empty_are_no_ops() {
        let synth = Arc::new(FakeSynth {
            unavailable: true,
            ..Default::default()
        });
        assert_eq!(playback(&synth).speak("hello"), SpeakOutcome::Unavailable);
        assert!(synth.spoken().is_empty());

        let synth = FakeSynth::with_voices(english());
        assert_eq!(playback(&synth).speak("**  **"), SpeakOutcome::Empty);
        assert!(synth.spoken().is_empty());
    }

    // ── Speaking flag ─────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn speaking_follows_utterance_events() {
        let synth = FakeSynth::with_voices(english());
        let playback = playback(&synth);
        playback.speak("hello");
        assert!(!playback.is_speaking());

        synth.emit(0, UtteranceEvent::Started);
        settle().await;
        assert!(playback.is_speaking());

        synth.emit(0, UtteranceEvent::Ended);
        settle().await;
        assert!(!playback.is_speaking());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_clears_speaking() {
        let synth = FakeSynth::with_voices(english());
        let playback = playback(&synth);
        playback.speak("hello");
        synth.emit(0, UtteranceEvent::Started);
        settle().await;
        synth.emit(0, UtteranceEvent::Failed("synthesis-failed".into()));
        settle().await;
        assert!(!playback.is_speaking());
    }

    #[tokio::test(start_paused = true)]
    async fn events_from_replaced_utterance_are_ignored() {
        let synth = FakeSynth::with_voices(english());
        let playback = playback(&synth);
        playback.speak("first");
        playback.speak("second");

        synth.emit(0, UtteranceEvent::Started);
        settle().await;
        assert!(!playback.is_speaking());

        synth.emit(1, UtteranceEvent::Started);
        settle().await;
        assert!(playback.is_speaking());

        synth.emit(0, UtteranceEvent::Ended);
        settle().await;
        assert!(playback.is_speaking());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let synth = FakeSynth::with_voices(english());
        let playback = playback(&synth);
        playback.speak("hello");
        synth.emit(0, UtteranceEvent::Started);
        settle().await;

        playback.stop();
        playback.stop();
        assert!(!playback.is_speaking());
        assert_eq!(synth.active.load(Ordering::SeqCst), 0);
    }

    // ── Mute ──────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn mute_stops_and_unmute_does_not_resume() {
        let synth = FakeSynth::with_voices(english());
        let playback = playback(&synth);
        playback.speak("hello");
        synth.emit(0, UtteranceEvent::Started);
        settle().await;
        assert!(playback.is_speaking());

        assert!(playback.toggle_mute());
        assert!(!playback.is_speaking());
        assert_eq!(synth.active.load(Ordering::SeqCst), 0);

        assert_eq!(playback.speak("ignored"), SpeakOutcome::Muted);

        assert!(!playback.toggle_mute());
        settle().await;
        assert_eq!(synth.spoken().len(), 1);
        assert!(!playback.is_speaking());
    }

    #[tokio::test]
    async fn starts_muted_from_config() {
        let synth = FakeSynth::with_voices(english());
        let config = VoiceConfig {
            muted: true,
            ..VoiceConfig::default()
        };
        let playback = VoicePlayback::new(synth.clone() as Arc<dyn SpeechSynthesizer>, &config);
        assert!(playback.is_muted());
        assert_eq!(playback.speak("hello"), SpeakOutcome::Muted);
        playback.set_muted(false);
        assert_eq!(playback.speak("hello"), SpeakOutcome::Started);
    }

    // ── Voice catalog race ────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn empty_catalog_speaks_after_wait() {
        let synth = Arc::new(FakeSynth::default());
        let playback = playback(&synth);

        assert_eq!(playback.speak("hello"), SpeakOutcome::AwaitingVoices);
        tokio::time::sleep(Duration::from_millis(499)).await;
        assert!(synth.spoken().is_empty());

        tokio::time::sleep(Duration::from_millis(2)).await;
        let spoken = synth.spoken();
        assert_eq!(spoken.len(), 1);
        assert_eq!(spoken[0].voice, None);
    }

    #[tokio::test(start_paused = true)]
    async fn catalog_notification_speaks_once() {
        let synth = Arc::new(FakeSynth::default());
        let playback = playback(&synth);

        assert_eq!(playback.speak("hello"), SpeakOutcome::AwaitingVoices);
        settle().await;
        *synth.catalog.lock().unwrap() = english();
        synth.catalog_ready.notify_one();
        settle().await;
        assert_eq!(synth.spoken().len(), 1);
        assert_eq!(
            synth.spoken()[0].voice.as_ref().map(|v| v.name.as_str()),
            Some("Rishi")
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(synth.spoken().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn generation_is_issued_at_most_once() {
        let synth = FakeSynth::with_voices(english());
        let playback = playback(&synth);
        let generation = playback.inner.interrupt();
        assert!(playback.inner.issue(generation, "one".into()));
        assert!(!playback.inner.issue(generation, "one".into()));
        assert_eq!(synth.spoken().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_catalog_wait() {
        let synth = Arc::new(FakeSynth::default());
        let playback = playback(&synth);
        playback.speak("hello");
        playback.stop();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(synth.spoken().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn newer_speak_supersedes_pending_one() {
        let synth = Arc::new(FakeSynth::default());
        let playback = playback(&synth);
        playback.speak("old");
        playback.speak("new");
        tokio::time::sleep(Duration::from_secs(1)).await;
        let spoken = synth.spoken();
        assert_eq!(spoken.len(), 1);
        assert_eq!(spoken[0].text, "new");
    }

    // ── Voice selection ───────────────────────────────────────

    #[test]
    fn exact_match_wins() {
        let voices = vec![
            Voice::new("Generic Hindi", "hi"),
            Voice::new("Lekha", "HI_in"),
        ];
        assert_eq!(select_voice(&voices, "hi-IN", "en").unwrap().name, "Lekha");
    }

    #[test]
    fn primary_subtag_match() {
        let voices = vec![Voice::new("Samantha", "en-US"), Voice::new("Vani", "ta-LK")];
        assert_eq!(select_voice(&voices, "ta-IN", "en").unwrap().name, "Vani");
    }

    #[test]
    fn falls_back_to_operating_language() {
        let mut default = Voice::new("Daniel", "en-GB");
        default.is_default = true;
        let voices = vec![
            Voice::new("Amelie", "fr-FR"),
            Voice::new("Samantha", "en-US"),
            default,
        ];
        assert_eq!(select_voice(&voices, "mr-IN", "en").unwrap().name, "Daniel");
    }

    #[test]
    fn no_match_means_engine_default() {
        let voices = vec![Voice::new("Amelie", "fr-FR")];
        assert!(select_voice(&voices, "te-IN", "en").is_none());
        assert!(select_voice(&[], "te-IN", "en").is_none());
    }
}
