//! Error types shared across SubGenius crates.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for SubGenius operations.
#[derive(Debug, thiserror::Error)]
pub enum SubgeniusError {
    /// A required encoding feature (or the tool providing it) is missing.
    #[error("Capability error: {message}")]
    Capability { message: String },

    /// A suspension point did not complete before its deadline.
    #[error("Timed out after {}s waiting for {stage}", .after.as_secs_f64())]
    Timeout { stage: String, after: Duration },

    #[error("Encode error: {message}")]
    Encode { message: String },

    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Render error: {message}")]
    Render { message: String },

    /// An export is already running on this pipeline.
    #[error("An export is already in progress")]
    Busy,

    #[error("Export aborted")]
    Aborted,

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using SubgeniusError.
pub type SubgeniusResult<T> = Result<T, SubgeniusError>;

impl SubgeniusError {
    pub fn capability(msg: impl Into<String>) -> Self {
        Self::Capability {
            message: msg.into(),
        }
    }

    pub fn timeout(stage: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            stage: stage.into(),
            after,
        }
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode {
            message: msg.into(),
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_names_stage() {
        let err = SubgeniusError::timeout("video metadata", Duration::from_secs(30));
        assert_eq!(err.to_string(), "Timed out after 30s waiting for video metadata");
    }

    #[test]
    fn test_encoder_message_is_preserved() {
        let err = SubgeniusError::encode("h264_nvenc exited with status 1");
        assert_eq!(err.to_string(), "Encode error: h264_nvenc exited with status 1");
    }
}
