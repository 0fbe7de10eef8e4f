//! Configuration management for the voice pipeline

pub mod file;

use std::fmt;
use std::path::PathBuf;

use crate::chat::DEFAULT_ENDPOINT;
use crate::voice::DEFAULT_BLOCK_SIZE;
use crate::{Error, Result};

use file::SaplingConfigFile;

/// Live API WebSocket endpoint
pub const DEFAULT_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Native-audio live model
pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";

/// Prebuilt voice of the companion
pub const DEFAULT_VOICE: &str = "Kore";

/// Text chat model
pub const DEFAULT_CHAT_MODEL: &str = "gemini-3-pro-preview";

/// Outbound chunks held before the capture side starts dropping
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Voice pipeline configuration
#[derive(Clone)]
pub struct Config {
    /// Live session settings
    pub live: LiveConfig,

    /// Audio pipeline settings
    pub audio: AudioConfig,

    /// Text chat settings
    pub chat: ChatConfig,

    /// Replacement persona instructions
    pub instructions_path: Option<PathBuf>,

    /// API key for the live and chat services
    pub api_key: Option<String>,
}

/// Live session configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveConfig {
    /// WebSocket endpoint
    pub url: String,

    /// Model identifier
    pub model: String,

    /// Prebuilt voice name
    pub voice: String,
}

/// Audio pipeline configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConfig {
    /// Native-rate samples per capture frame
    pub block_size: usize,

    /// Outbound queue capacity in chunks
    pub queue_capacity: usize,
}

/// Text chat configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Completion model identifier
    pub model: String,

    /// API base URL
    pub endpoint: String,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("live", &self.live)
            .field("audio", &self.audio)
            .field("chat", &self.chat)
            .field("instructions_path", &self.instructions_path)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Config {
    /// Load configuration from the environment and config file
    ///
    /// # Errors
    ///
    /// Returns error if a numeric setting is zero
    pub fn load() -> Result<Self> {
        // env > toml > default
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file with an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a numeric setting is zero
    pub fn from_sources(fc: SaplingConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let live = LiveConfig {
            url: env("SAPLING_LIVE_URL")
                .or(fc.live.url)
                .unwrap_or_else(|| DEFAULT_LIVE_URL.to_string()),
            model: env("SAPLING_LIVE_MODEL")
                .or(fc.live.model)
                .unwrap_or_else(|| DEFAULT_LIVE_MODEL.to_string()),
            voice: env("SAPLING_VOICE")
                .or(fc.live.voice)
                .unwrap_or_else(|| DEFAULT_VOICE.to_string()),
        };

        let audio = AudioConfig {
            block_size: env("SAPLING_BLOCK_SIZE")
                .and_then(|s| s.parse().ok())
                .or(fc.audio.block_size)
                .unwrap_or(DEFAULT_BLOCK_SIZE),
            queue_capacity: env("SAPLING_QUEUE_CAPACITY")
                .and_then(|s| s.parse().ok())
                .or(fc.audio.queue_capacity)
                .unwrap_or(DEFAULT_QUEUE_CAPACITY),
        };

        let chat = ChatConfig {
            model: env("SAPLING_CHAT_MODEL")
                .or(fc.chat.model)
                .unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            endpoint: fc
                .chat
                .endpoint
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
        };

        let instructions_path = env("SAPLING_INSTRUCTIONS")
            .or(fc.context.instructions_path)
            .map(PathBuf::from);

        let api_key = env("GEMINI_API_KEY")
            .or_else(|| env("API_KEY"))
            .filter(|k| !k.is_empty());

        let config = Self {
            live,
            audio,
            chat,
            instructions_path,
            api_key,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns error if the block size or queue capacity is zero
    pub fn validate(&self) -> Result<()> {
        if self.audio.block_size == 0 {
            return Err(Error::Config("audio.block_size must be greater than 0".to_string()));
        }
        if self.audio.queue_capacity == 0 {
            return Err(Error::Config(
                "audio.queue_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
