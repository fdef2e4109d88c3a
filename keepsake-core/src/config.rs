//! Configuration for save managers
//!
//! `SaveSettings` is the serializable settings document a host loads at
//! startup. It is normalized before use: out-of-range values are clamped
//! rather than rejected, so a hand-edited settings file never prevents saving.
//! `StreamingConfig` and `AutosaveConfig` are the runtime views handed to the
//! manager and the autosave task.

use crate::options::SaveOptions;
use crate::{KeepsakeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// Default streaming chunk size (256 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 256 * KIB as usize;

/// Default large-payload threshold (32 MiB).
pub const DEFAULT_STREAM_THRESHOLD: u64 = 32 * MIB;

/// Only supported encryption scheme.
pub const AES_GCM_SCHEME: &str = "aes-gcm";

/// Serializable save settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveSettings {
    pub default_profile_name: String,
    /// Storage root; every profile is a directory below it
    pub root_folder: PathBuf,
    pub streaming_chunk_size_bytes: u64,
    pub compression_streaming_threshold_bytes: u64,
    pub enable_compression: bool,
    pub enable_encryption: bool,
    pub encryption_scheme_id: String,
    pub enable_autosave: bool,
    pub autosave_interval_seconds: f64,
    pub autosave_max_rolling_backups: u32,
    pub autosave_on_context_change: bool,
    pub context_change_debounce_seconds: f64,
}

impl Default for SaveSettings {
    fn default() -> Self {
        Self {
            default_profile_name: "Player1".to_string(),
            root_folder: PathBuf::from("saves"),
            streaming_chunk_size_bytes: DEFAULT_CHUNK_SIZE as u64,
            compression_streaming_threshold_bytes: DEFAULT_STREAM_THRESHOLD,
            enable_compression: true,
            enable_encryption: false,
            encryption_scheme_id: AES_GCM_SCHEME.to_string(),
            enable_autosave: true,
            autosave_interval_seconds: 60.0,
            autosave_max_rolling_backups: 3,
            autosave_on_context_change: true,
            context_change_debounce_seconds: 3.0,
        }
    }
}

fn clamp_seconds(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

impl SaveSettings {
    /// Load settings from a JSON file and normalize them
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let mut settings: SaveSettings = serde_json::from_str(&text)?;
        settings.validate_and_normalize();
        Ok(settings)
    }

    /// Clamp every value into its supported range, in place
    pub fn validate_and_normalize(&mut self) {
        let defaults = Self::default();

        if self.default_profile_name.trim().is_empty() {
            self.default_profile_name = defaults.default_profile_name;
        }

        // Round to a 4 KiB multiple, then clamp to [64 KiB, 4 MiB]
        let rounded = self.streaming_chunk_size_bytes.saturating_add(2 * KIB) / (4 * KIB) * (4 * KIB);
        self.streaming_chunk_size_bytes = rounded.clamp(64 * KIB, 4 * MIB);

        self.compression_streaming_threshold_bytes = self
            .compression_streaming_threshold_bytes
            .clamp(MIB, 1024 * MIB);

        if self.encryption_scheme_id.trim().is_empty() {
            self.encryption_scheme_id = defaults.encryption_scheme_id;
        }

        self.autosave_interval_seconds = clamp_seconds(
            self.autosave_interval_seconds,
            5.0,
            3600.0,
            defaults.autosave_interval_seconds,
        );
        self.autosave_max_rolling_backups = self.autosave_max_rolling_backups.clamp(1, 20);
        self.context_change_debounce_seconds = clamp_seconds(
            self.context_change_debounce_seconds,
            0.0,
            30.0,
            defaults.context_change_debounce_seconds,
        );
    }

    /// Normalized copy
    pub fn effective(&self) -> Self {
        let mut settings = self.clone();
        settings.validate_and_normalize();
        settings
    }

    /// Check settings that cannot be fixed by clamping
    pub fn validate(&self) -> Result<()> {
        if self.enable_encryption && self.encryption_scheme_id != AES_GCM_SCHEME {
            return Err(KeepsakeError::validation(format!(
                "unsupported encryption scheme '{}'",
                self.encryption_scheme_id
            )));
        }
        crate::storage::validate_profile_name(&self.default_profile_name)
    }

    pub fn streaming(&self) -> StreamingConfig {
        let settings = self.effective();
        StreamingConfig {
            chunk_size: settings.streaming_chunk_size_bytes as usize,
            stream_threshold: settings.compression_streaming_threshold_bytes,
        }
    }

    pub fn autosave(&self) -> AutosaveConfig {
        let settings = self.effective();
        AutosaveConfig {
            enabled: settings.enable_autosave,
            interval: Duration::from_secs_f64(settings.autosave_interval_seconds),
            max_backups: settings.autosave_max_rolling_backups,
            on_context_change: settings.autosave_on_context_change,
            debounce: Duration::from_secs_f64(settings.context_change_debounce_seconds),
        }
    }

    /// Save options for the default profile with the configured transforms
    pub fn save_options(&self) -> SaveOptions {
        let settings = self.effective();
        SaveOptions::new()
            .with_profile(settings.default_profile_name)
            .with_compression(settings.enable_compression)
            .with_encryption(settings.enable_encryption)
    }
}

/// Chunking used by the save and load pipelines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingConfig {
    pub chunk_size: usize,
    /// Bodies at least this large report fractional progress
    pub stream_threshold: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            stream_threshold: DEFAULT_STREAM_THRESHOLD,
        }
    }
}

impl StreamingConfig {
    pub fn is_large(&self, len: u64) -> bool {
        len >= self.stream_threshold
    }
}

/// Autosave scheduling
#[derive(Debug, Clone, PartialEq)]
pub struct AutosaveConfig {
    pub enabled: bool,
    pub interval: Duration,
    /// Size of the rolling backup ring
    pub max_backups: u32,
    pub on_context_change: bool,
    pub debounce: Duration,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        SaveSettings::default().autosave()
    }
}

impl AutosaveConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = SaveSettings::default();
        assert_eq!(settings.default_profile_name, "Player1");
        assert_eq!(settings.streaming_chunk_size_bytes, 256 * 1024);
        assert_eq!(settings.compression_streaming_threshold_bytes, 32 * 1024 * 1024);
        assert_eq!(settings.encryption_scheme_id, "aes-gcm");
        assert_eq!(settings.effective(), settings);
    }

    #[test]
    fn test_normalization_clamps() {
        let mut settings = SaveSettings {
            default_profile_name: "  ".to_string(),
            streaming_chunk_size_bytes: 1,
            compression_streaming_threshold_bytes: u64::MAX / 2,
            autosave_interval_seconds: 1.0,
            autosave_max_rolling_backups: 0,
            context_change_debounce_seconds: f64::NAN,
            ..Default::default()
        };
        settings.validate_and_normalize();
        assert_eq!(settings.default_profile_name, "Player1");
        assert_eq!(settings.streaming_chunk_size_bytes, 64 * 1024);
        assert_eq!(settings.compression_streaming_threshold_bytes, 1024 * 1024 * 1024);
        assert_eq!(settings.autosave_interval_seconds, 5.0);
        assert_eq!(settings.autosave_max_rolling_backups, 1);
        assert_eq!(settings.context_change_debounce_seconds, 3.0);
    }

    #[test]
    fn test_chunk_size_rounds_to_4k() {
        let settings = SaveSettings {
            streaming_chunk_size_bytes: 100_000,
            ..Default::default()
        };
        // 100_000 / 4096 = 24.4 -> 24 * 4096
        assert_eq!(settings.streaming().chunk_size, 98_304);

        let settings = SaveSettings {
            streaming_chunk_size_bytes: 64 * 1024 * 1024,
            ..Default::default()
        };
        assert_eq!(settings.streaming().chunk_size, 4 * 1024 * 1024);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: SaveSettings =
            serde_json::from_str(r#"{"enable_encryption":true,"autosave_max_rolling_backups":50}"#)
                .unwrap();
        assert!(settings.enable_encryption);
        assert!(settings.enable_compression);
        assert_eq!(settings.autosave().max_backups, 20);
    }

    #[test]
    fn test_validate_scheme() {
        let mut settings = SaveSettings {
            enable_encryption: true,
            ..Default::default()
        };
        assert!(settings.validate().is_ok());
        settings.encryption_scheme_id = "rot13".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_runtime_views() {
        let settings = SaveSettings::default();
        let autosave = settings.autosave();
        assert_eq!(autosave.interval, Duration::from_secs(60));
        assert_eq!(autosave.debounce, Duration::from_secs(3));
        assert_eq!(autosave.max_backups, 3);

        let options = settings.save_options();
        assert_eq!(options.profile, "Player1");
        assert!(options.use_compression);
        assert!(!options.use_encryption);

        assert!(StreamingConfig::default().is_large(32 * 1024 * 1024));
        assert!(!StreamingConfig::default().is_large(1024));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"autosave_interval_seconds":1.5}"#).unwrap();
        let settings = SaveSettings::from_json_file(&path).unwrap();
        assert_eq!(settings.autosave_interval_seconds, 5.0);
    }
}
