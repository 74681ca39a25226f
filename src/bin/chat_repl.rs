//! Terminal chat front end for the assistant core.
//!
//! Reads user messages line by line from stdin and prints the streamed reply
//! as it arrives. Lines starting with `/` are commands:
//!
//! - `/cancel` stop the reply being streamed
//! - `/clear` forget the conversation
//! - `/mute` toggle speech output
//! - `/autospeak` toggle reading replies aloud
//! - `/voice` capture a spoken message
//! - `/dismiss` acknowledge a voice capture error
//! - `/lang <tag>` switch language, e.g. `/lang hi-IN`
//! - `/quit` exit
//!
//! A plain terminal has no speech engines, so the voice commands report
//! that voice is unsupported. Tracing output goes to stderr.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use sahayak::voice::{UnsupportedRecognizer, UnsupportedSynthesizer};
use sahayak::{
    AssistantConfig, ChatStreamClient, Conversation, ConversationEvent, ConversationHandle,
    SpeechLanguage, VoiceCapture, VoicePlayback,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sahayak=info")),
        )
        .init();

    let config = load_config()?;
    tracing::info!(endpoint = %config.chat.endpoint, model = %config.chat.model, "sahayak-chat starting");

    let client = ChatStreamClient::new(config.chat.clone()).context("building chat client")?;
    let capture = Arc::new(VoiceCapture::new(
        Arc::new(UnsupportedRecognizer),
        &config.voice,
    ));
    let playback = VoicePlayback::new(Arc::new(UnsupportedSynthesizer), &config.voice);
    let conversation = Conversation::spawn(Arc::new(client), capture, playback, &config.voice);

    let printer = tokio::spawn(print_events(conversation.subscribe()));
    let result = read_input(&conversation, config.voice.auto_speak).await;

    conversation.shutdown().await.ok();
    printer.abort();
    tracing::info!("sahayak-chat shut down");
    result
}

fn load_config() -> anyhow::Result<AssistantConfig> {
    let path = std::env::var_os("SAHAYAK_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(AssistantConfig::default_config_path);
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file; using defaults");
        return Ok(AssistantConfig::default());
    }
    AssistantConfig::from_file(&path)
        .with_context(|| format!("loading config from {}", path.display()))
}

async fn read_input(conversation: &ConversationHandle, mut auto_speak: bool) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        let line = line.trim();
        let (command, argument) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "/quit" | "/exit" => break,
            "/cancel" => conversation.cancel_active_stream().await?,
            "/clear" => conversation.clear().await?,
            "/mute" => {
                let muted = conversation.toggle_mute().await?;
                eprintln!("[speech {}]", if muted { "muted" } else { "unmuted" });
            }
            "/autospeak" => {
                auto_speak = !auto_speak;
                conversation.set_auto_speak(auto_speak).await?;
                eprintln!("[auto-speak {}]", if auto_speak { "on" } else { "off" });
            }
            "/voice" => conversation.start_voice_capture().await?,
            "/dismiss" => conversation.clear_voice_error().await?,
            "/lang" => match SpeechLanguage::parse(argument) {
                Some(language) => {
                    conversation.set_language(language).await?;
                    eprintln!("[language {} ({})]", language, language.display_name());
                }
                None => eprintln!("[unknown language {argument:?}]"),
            },
            _ if command.starts_with('/') => eprintln!("[unknown command {command}]"),
            _ => conversation.send_message(line).await?,
        }
    }
    Ok(())
}

async fn print_events(mut events: broadcast::Receiver<ConversationEvent>) {
    let mut stdout = std::io::stdout();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "display fell behind");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };
        match event {
            ConversationEvent::AssistantDelta { delta, .. } => {
                let _ = write!(stdout, "{delta}");
                let _ = stdout.flush();
            }
            ConversationEvent::AssistantCompleted { .. } => {
                let _ = writeln!(stdout);
            }
            ConversationEvent::StreamCancelled { .. } => {
                let _ = writeln!(stdout);
                eprintln!("[cancelled]");
            }
            ConversationEvent::StreamFailed { message, .. } => {
                let _ = writeln!(stdout);
                eprintln!("[error] {message}");
            }
            ConversationEvent::TranscriptReceived { text } => eprintln!("[heard] {text}"),
            ConversationEvent::VoiceCaptureFailed(err) => eprintln!("[voice] {err}"),
            ConversationEvent::Cleared => eprintln!("[cleared]"),
            ConversationEvent::UserMessage { .. } | ConversationEvent::AssistantStarted { .. } => {}
        }
    }
}
