//! Fake speech engines and helpers shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sahayak::ConversationEvent;
use sahayak::voice::{
    RecognitionEvent, SpeechRecognizer, SpeechSynthesizer, Utterance, UtteranceEvent, Voice,
};
use tokio::sync::{broadcast, mpsc};

/// What a [`ScriptedRecognizer`] reports when started.
#[derive(Debug, Clone)]
pub enum Heard {
    Transcript(&'static str),
    Error(&'static str),
    /// Never calls back.
    Nothing,
}

pub struct ScriptedRecognizer {
    heard: Heard,
    languages: Mutex<Vec<String>>,
    /// Keeps the session channel open for [`Heard::Nothing`].
    session: Mutex<Option<mpsc::UnboundedSender<RecognitionEvent>>>,
}

impl ScriptedRecognizer {
    pub fn new(heard: Heard) -> Self {
        Self {
            heard,
            languages: Mutex::default(),
            session: Mutex::default(),
        }
    }

    pub fn languages(&self) -> Vec<String> {
        self.languages.lock().unwrap().clone()
    }
}

impl SpeechRecognizer for ScriptedRecognizer {
    fn is_available(&self) -> bool {
        true
    }

    fn start(
        &self,
        language: &str,
        events: mpsc::UnboundedSender<RecognitionEvent>,
    ) -> Result<(), String> {
        self.languages.lock().unwrap().push(language.to_owned());
        match self.heard {
            Heard::Transcript(text) => {
                let _ = events.send(RecognitionEvent::Transcript(text.to_owned()));
            }
            Heard::Error(code) => {
                let _ = events.send(RecognitionEvent::Error(code.to_owned()));
            }
            Heard::Nothing => {}
        }
        *self.session.lock().unwrap() = Some(events);
        Ok(())
    }

    fn stop(&self) {}

    fn abort(&self) {
        self.session.lock().unwrap().take();
    }
}

/// Synthesizer that records what it was asked to say.
#[derive(Default)]
pub struct RecordingSynth {
    pub utterances: Mutex<Vec<Utterance>>,
}

impl RecordingSynth {
    pub fn texts(&self) -> Vec<String> {
        self.utterances
            .lock()
            .unwrap()
            .iter()
            .map(|u| u.text.clone())
            .collect()
    }
}

#[async_trait]
impl SpeechSynthesizer for RecordingSynth {
    fn is_available(&self) -> bool {
        true
    }

    fn voices(&self) -> Vec<Voice> {
        vec![Voice::new("Rishi", "en-IN"), Voice::new("Lekha", "hi-IN")]
    }

    async fn voices_changed(&self) {}

    fn speak(&self, utterance: Utterance, events: mpsc::UnboundedSender<UtteranceEvent>) {
        self.utterances.lock().unwrap().push(utterance);
        let _ = events.send(UtteranceEvent::Started);
        let _ = events.send(UtteranceEvent::Ended);
    }

    fn cancel(&self) {}
}

/// Wait for the first event matching `matches`, failing after five seconds.
pub async fn wait_for(
    events: &mut broadcast::Receiver<ConversationEvent>,
    matches: impl Fn(&ConversationEvent) -> bool,
) -> ConversationEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event channel open");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event within timeout")
}

pub fn is_completed(event: &ConversationEvent) -> bool {
    matches!(event, ConversationEvent::AssistantCompleted { .. })
}
