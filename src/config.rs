//! Configuration types for the assistant core.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AssistantError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Completion endpoint settings.
    pub chat: ChatConfig,
    /// Speech capture and playback settings.
    pub voice: VoiceConfig,
}

/// Completion endpoint configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Full URL of the streaming chat completion endpoint.
    pub endpoint: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// Bearer key for the endpoint, if it requires one.
    pub api_key: Option<String>,
    /// TCP connect timeout in seconds. The body itself has no deadline.
    pub connect_timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/v1/chat/completions".to_owned(),
            model: "llama3.2".to_owned(),
            api_key: None,
            connect_timeout_secs: 10,
        }
    }
}

impl ChatConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Spoken languages offered to the user.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpeechLanguage {
    #[default]
    #[serde(rename = "en-IN")]
    EnglishIndia,
    #[serde(rename = "hi-IN")]
    Hindi,
    #[serde(rename = "ta-IN")]
    Tamil,
    #[serde(rename = "te-IN")]
    Telugu,
    #[serde(rename = "mr-IN")]
    Marathi,
}

impl SpeechLanguage {
    /// Every selectable language, in menu order.
    pub const ALL: [Self; 5] = [
        Self::EnglishIndia,
        Self::Hindi,
        Self::Tamil,
        Self::Telugu,
        Self::Marathi,
    ];

    /// BCP 47 tag passed to the speech capabilities.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::EnglishIndia => "en-IN",
            Self::Hindi => "hi-IN",
            Self::Tamil => "ta-IN",
            Self::Telugu => "te-IN",
            Self::Marathi => "mr-IN",
        }
    }

    /// Name shown in a language picker.
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::EnglishIndia => "English",
            Self::Hindi => "हिन्दी",
            Self::Tamil => "தமிழ்",
            Self::Telugu => "తెలుగు",
            Self::Marathi => "मराठी",
        }
    }

    /// Parse a locale tag or a bare language code.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().replace('_', "-").to_ascii_lowercase();
        let primary = normalized.split('-').next().unwrap_or_default();
        Self::ALL.into_iter().find(|lang| {
            let tag = lang.tag().to_ascii_lowercase();
            tag == normalized || tag.split('-').next() == Some(primary)
        })
    }
}

impl std::fmt::Display for SpeechLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Speech capture and playback configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Language used for both recognition and synthesis.
    pub language: SpeechLanguage,
    /// Primary language subtag of voices to fall back to when no voice
    /// matches `language`.
    pub fallback_language: String,
    /// Start with playback muted.
    pub muted: bool,
    /// Speak each completed assistant reply.
    pub auto_speak: bool,
    /// Give up on a capture that has produced nothing after this long.
    pub capture_timeout_ms: u64,
    /// How long the `processing` state is held after a transcript arrives.
    pub processing_grace_ms: u64,
    /// Upper bound on waiting for the synthesis voice catalog to load.
    pub voice_catalog_wait_ms: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            language: SpeechLanguage::default(),
            fallback_language: "en".to_owned(),
            muted: false,
            auto_speak: false,
            capture_timeout_ms: 10_000,
            processing_grace_ms: 300,
            voice_catalog_wait_ms: 500,
        }
    }
}

impl VoiceConfig {
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn processing_grace(&self) -> Duration {
        Duration::from_millis(self.processing_grace_ms)
    }

    pub fn voice_catalog_wait(&self) -> Duration {
        Duration::from_millis(self.voice_catalog_wait_ms)
    }
}

impl AssistantConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or fails validation.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| AssistantError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AssistantError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path, e.g. `~/.config/sahayak/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("sahayak")
            .join("config.toml")
    }

    /// Check values that serde cannot.
    ///
    /// # Errors
    ///
    /// Returns [`AssistantError::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        let endpoint = url::Url::parse(&self.chat.endpoint).map_err(|e| {
            AssistantError::Config(format!("chat.endpoint {:?}: {e}", self.chat.endpoint))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(AssistantError::Config(format!(
                "chat.endpoint must be http or https, got {}",
                endpoint.scheme()
            )));
        }
        if self.chat.model.trim().is_empty() {
            return Err(AssistantError::Config("chat.model is empty".to_owned()));
        }
        if self.voice.capture_timeout_ms == 0 {
            return Err(AssistantError::Config(
                "voice.capture_timeout_ms must be positive".to_owned(),
            ));
        }
        if self.voice.fallback_language.trim().is_empty() {
            return Err(AssistantError::Config(
                "voice.fallback_language is empty".to_owned(),
            ));
        }
        Ok(())
    }
}
