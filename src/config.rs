//! Application configuration
//!
//! Loaded from `config.toml` in the platform config directory. Every field
//! has a default, so a missing file or a partial file is fine.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub connection: ConnectionConfig,
    pub audio: AudioConfig,
}

/// Session link settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// WebSocket endpoint of the session server
    pub url: String,
    /// Constant delay between reconnect attempts
    pub reconnect_delay_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SERVER_URL.to_string(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
        }
    }
}

/// How a pitch change is realised on the listening device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PitchMode {
    /// Time-domain pitch shift; playback duration unchanged
    #[default]
    PreserveDuration,
    /// Change the source's playback rate; pitch and duration both change
    PlaybackRate,
}

/// Local audio pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub enabled: bool,
    pub sample_rate: u32,
    /// Frames per engine block
    pub block_size: usize,
    /// Capture device id (`input:<name>`); default input when unset
    pub input_device: Option<String>,
    /// Playback device id (`output:<name>`); default output when unset
    pub output_device: Option<String>,
    pub pitch_mode: PitchMode,
    /// Largest accepted shift in either direction, in semitones
    pub max_semitones: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            input_device: None,
            output_device: None,
            pitch_mode: PitchMode::default(),
            max_semitones: DEFAULT_MAX_SEMITONES,
        }
    }
}

impl AppConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "yoke").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.audio.block_size == 0 || self.audio.block_size > MAX_BLOCK_SIZE {
            return Err(Error::Config(format!(
                "audio.block_size must be between 1 and {}",
                MAX_BLOCK_SIZE
            )));
        }
        if self.audio.sample_rate < 8_000 {
            return Err(Error::Config("audio.sample_rate is too low".into()));
        }
        if !(self.audio.max_semitones > 0.0 && self.audio.max_semitones <= 24.0) {
            return Err(Error::Config(
                "audio.max_semitones must be in (0, 24]".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[connection]\nurl = \"wss://party.example/ws\"\n\n[audio]\npitch_mode = \"playback_rate\"\n",
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.connection.url, "wss://party.example/ws");
        assert_eq!(config.connection.reconnect_delay_ms, 2000);
        assert_eq!(config.audio.pitch_mode, PitchMode::PlaybackRate);
        assert_eq!(config.audio.block_size, DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.audio.block_size = 512;
        config.audio.output_device = Some("output:Speakers".into());
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.audio.block_size, 512);
        assert_eq!(loaded.audio.output_device.as_deref(), Some("output:Speakers"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        std::fs::write(&path, "[audio]\nblock_size = 0\n").unwrap();
        assert!(matches!(AppConfig::load_from(&path), Err(Error::Config(_))));

        std::fs::write(&path, "[audio\n").unwrap();
        assert!(matches!(AppConfig::load_from(&path), Err(Error::Config(_))));
    }
}
