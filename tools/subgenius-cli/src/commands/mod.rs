pub mod ass;
pub mod check;
pub mod export;
pub mod import;
pub mod lint;
pub mod preview;

use std::path::{Path, PathBuf};

use anyhow::Context;
use subgenius_caption_codec::{import_json, parse_ass};
use subgenius_caption_model::{CaptionList, StyleConfig};
use subgenius_common::config::AppConfig;

/// Load captions from a `.ass` file or a JSON caption file, sorted by
/// start time.
pub fn load_captions(path: &Path) -> anyhow::Result<CaptionList> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read captions from {}", path.display()))?;
    let is_ass = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("ass"));
    let records = if is_ass {
        parse_ass(&content)
    } else {
        import_json(&content)
    }
    .with_context(|| format!("Failed to parse captions in {}", path.display()))?;
    tracing::debug!(path = %path.display(), count = records.len(), "Loaded captions");
    Ok(CaptionList::from_records(records))
}

/// The explicit style file, else the configured one, else the default style.
pub fn load_style(config: &AppConfig, explicit: Option<PathBuf>) -> anyhow::Result<StyleConfig> {
    match explicit.or_else(|| config.style_path.clone()) {
        Some(path) => StyleConfig::load(&path)
            .with_context(|| format!("Failed to load style from {}", path.display())),
        None => Ok(StyleConfig::default()),
    }
}
