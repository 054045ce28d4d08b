//! Render one captioned frame to a PNG.

use std::path::PathBuf;

use subgenius_caption_model::time::parse_clock;
use subgenius_common::clock::FrameClock;
use subgenius_common::config::AppConfig;
use subgenius_render_engine::backend::FfmpegBackend;
use subgenius_render_engine::font::FontResolver;
use subgenius_render_engine::preview::{render_still, StillRequest};

use super::{load_captions, load_style};

pub async fn run(
    config: &AppConfig,
    video: PathBuf,
    captions: PathBuf,
    style: Option<PathBuf>,
    at: &str,
    output: PathBuf,
) -> anyhow::Result<()> {
    let time_secs = parse_clock(at)?;
    let captions = load_captions(&captions)?;
    let style = load_style(config, style)?;

    let backend = FfmpegBackend::new(&config.export);
    let face = FontResolver::system().resolve(&style.font_family);
    if face.is_fallback() {
        println!("[WARN] Font '{}' not found, drawing placeholder glyphs", style.font_family);
    }

    let request = StillRequest {
        source: &video,
        captions: captions.records(),
        style: &style,
        time_secs,
    };
    let pixmap = render_still(
        &backend,
        request,
        &face,
        FrameClock::new(config.export.fps),
        config.export.seek_timeout(),
    )
    .await?;

    pixmap
        .save_png(&output)
        .map_err(|e| anyhow::anyhow!("Failed to write {}: {e}", output.display()))?;

    let active = captions
        .records()
        .iter()
        .filter(|c| c.is_active_at(time_secs))
        .count();
    println!(
        "Wrote {} ({}x{}, {active} active caption(s))",
        output.display(),
        pixmap.width(),
        pixmap.height()
    );
    Ok(())
}
