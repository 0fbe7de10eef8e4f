//! TOML configuration file loading
//!
//! Supports `~/.config/sapling/voice.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct SaplingConfigFile {
    /// Live voice session
    #[serde(default)]
    pub live: LiveFileConfig,

    /// Capture and outbound queue tuning
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Text chat
    #[serde(default)]
    pub chat: ChatFileConfig,

    /// Persona context
    #[serde(default)]
    pub context: ContextFileConfig,
}

/// Live session configuration
#[derive(Debug, Default, Deserialize)]
pub struct LiveFileConfig {
    /// WebSocket endpoint of the live service
    pub url: Option<String>,

    /// Live model identifier
    pub model: Option<String>,

    /// Prebuilt voice name (e.g. "Kore")
    pub voice: Option<String>,
}

/// Audio pipeline configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Native-rate samples per capture frame
    pub block_size: Option<usize>,

    /// Outbound chunks held before dropping
    pub queue_capacity: Option<usize>,
}

/// Text chat configuration
#[derive(Debug, Default, Deserialize)]
pub struct ChatFileConfig {
    /// Completion model identifier
    pub model: Option<String>,

    /// API base URL
    pub endpoint: Option<String>,
}

/// Persona context configuration
#[derive(Debug, Default, Deserialize)]
pub struct ContextFileConfig {
    /// File replacing the built-in persona instructions
    pub instructions_path: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `SaplingConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> SaplingConfigFile {
    config_file_path().map_or_else(SaplingConfigFile::default, |path| load_config_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_config_from(path: &Path) -> SaplingConfigFile {
    if !path.exists() {
        return SaplingConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                SaplingConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            SaplingConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/sapling/voice.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("sapling").join("voice.toml"))
}
