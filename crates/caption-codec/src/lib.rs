//! SubGenius Caption Exchange
//!
//! Converts the caption model to and from external formats:
//! - **ASS:** Advanced SubStation Alpha subtitle tracks carrying the style
//! - **SRT:** Plain SubRip subtitle tracks
//! - **JSON:** The transport schema used to paste captions produced elsewhere

pub mod ass;
pub mod json;
pub mod srt;

pub use ass::*;
pub use json::*;
pub use srt::*;

use std::path::Path;

use subgenius_caption_model::{CaptionRecord, StyleConfig};
use subgenius_common::error::SubgeniusError;

/// Errors raised while reading or writing caption files.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Malformed caption JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Caption JSON must be an array of caption objects")]
    NotAnArray,

    #[error("Malformed ASS at line {line}: {message}")]
    InvalidAss { line: usize, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<CodecError> for SubgeniusError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(e) => SubgeniusError::Io(e),
            other => SubgeniusError::validation(other.to_string()),
        }
    }
}

/// Save captions as a subtitle file, picking the format from the extension
/// (`.srt`, anything else is written as ASS).
pub fn save_subtitles(
    captions: &[CaptionRecord],
    style: &StyleConfig,
    video_width: u32,
    video_height: u32,
    path: &Path,
) -> Result<(), CodecError> {
    let content = match path.extension().and_then(|e| e.to_str()) {
        Some("srt") => generate_srt(captions),
        _ => generate_ass(captions, style, video_width, video_height),
    };
    std::fs::write(path, content)?;
    tracing::debug!(path = %path.display(), captions = captions.len(), "Wrote subtitle file");
    Ok(())
}
