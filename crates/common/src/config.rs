//! Application configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Export pipeline parameters.
    pub export: ExportSettings,

    /// Style file applied when no style is given explicitly.
    pub style_path: Option<PathBuf>,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Parameters of the burn-in export pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Output frame rate.
    pub fps: u32,

    /// A keyframe is forced every this many frames.
    pub keyframe_interval: u64,

    /// Encoder queue depth above which the pipeline drains before submitting.
    pub backpressure_threshold: usize,

    /// Progress is reported every this many frames.
    pub progress_interval: u64,

    /// Number of status lines kept in the rolling export log.
    pub log_capacity: usize,

    /// Audio sample rate (Hz).
    pub audio_sample_rate: u32,

    /// Audio channel count.
    pub audio_channels: u16,

    /// Audio bitrate (bits per second).
    pub audio_bitrate: u32,

    /// Deadline for source metadata to become available.
    pub metadata_timeout_secs: u64,

    /// Deadline for a single frame seek.
    pub seek_timeout_secs: u64,

    /// Permit a software H.264 encoder when no hardware encoder is found.
    pub allow_software_encoder: bool,

    /// Encoder name to try first (for example `h264_vaapi`).
    pub preferred_encoder: Option<String>,

    /// ffmpeg executable.
    pub ffmpeg_path: PathBuf,

    /// ffprobe executable.
    pub ffprobe_path: PathBuf,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "subgenius=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            fps: 30,
            keyframe_interval: 60,
            backpressure_threshold: 2,
            progress_interval: 15,
            log_capacity: 11,
            audio_sample_rate: 44_100,
            audio_channels: 2,
            audio_bitrate: 128_000,
            metadata_timeout_secs: 30,
            seek_timeout_secs: 10,
            allow_software_encoder: false,
            preferred_encoder: None,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
        }
    }
}

impl ExportSettings {
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs.max(1))
    }

    pub fn seek_timeout(&self) -> Duration {
        Duration::from_secs(self.seek_timeout_secs.max(1))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("subgenius").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_defaults_match_pipeline_contract() {
        let settings = ExportSettings::default();
        assert_eq!(settings.fps, 30);
        assert_eq!(settings.keyframe_interval, 60);
        assert_eq!(settings.backpressure_threshold, 2);
        assert_eq!(settings.progress_interval, 15);
        assert_eq!(settings.log_capacity, 11);
        assert_eq!(settings.audio_sample_rate, 44_100);
        assert_eq!(settings.audio_channels, 2);
        assert!(!settings.allow_software_encoder);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"export": {"seek_timeout_secs": 3}}"#).unwrap();
        assert_eq!(config.export.seek_timeout(), Duration::from_secs(3));
        assert_eq!(config.export.fps, 30);
        assert_eq!(config.logging.level, "info");
        assert!(config.style_path.is_none());
    }

    #[test]
    fn test_zero_timeouts_are_clamped() {
        let settings = ExportSettings {
            metadata_timeout_secs: 0,
            ..ExportSettings::default()
        };
        assert_eq!(settings.metadata_timeout(), Duration::from_secs(1));
    }
}
