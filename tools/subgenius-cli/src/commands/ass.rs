//! Write captions as a subtitle file.

use std::path::PathBuf;

use subgenius_caption_codec::save_subtitles;
use subgenius_common::config::AppConfig;

use super::{load_captions, load_style};

pub fn run(
    config: &AppConfig,
    captions: PathBuf,
    style: Option<PathBuf>,
    width: u32,
    height: u32,
    output: PathBuf,
) -> anyhow::Result<()> {
    let captions = load_captions(&captions)?;
    let style = load_style(config, style)?;

    save_subtitles(captions.records(), &style, width, height, &output)
        .map_err(|e| anyhow::anyhow!("Failed to write {}: {e}", output.display()))?;

    println!(
        "Wrote {} caption(s) to {} ({width}x{height})",
        captions.len(),
        output.display()
    );
    Ok(())
}
