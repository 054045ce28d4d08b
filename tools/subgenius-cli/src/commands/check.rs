//! Report whether this machine can export.

use subgenius_caption_model::StyleConfig;
use subgenius_common::config::{config_file_path, AppConfig};
use subgenius_render_engine::backend::{FfmpegBackend, MediaBackend};
use subgenius_render_engine::font::FontResolver;

pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("SubGenius System Check");
    println!("{}", "=".repeat(50));
    println!("Config: {}", config_file_path().display());

    let backend = FfmpegBackend::new(&config.export);

    println!("\nffmpeg:");
    if !backend.is_available() {
        println!(
            "  [WARN] ffmpeg/ffprobe not runnable ({} / {})",
            config.export.ffmpeg_path.display(),
            config.export.ffprobe_path.display()
        );
    } else {
        println!("  [OK] ffmpeg and ffprobe found");
        match backend.list_encoders().await {
            Ok(encoders) => {
                let h264: Vec<&str> = encoders
                    .iter()
                    .map(String::as_str)
                    .filter(|name| name.contains("264"))
                    .collect();
                println!("  [OK] H.264 encoders listed: {}", h264.join(", "));
            }
            Err(e) => println!("  [WARN] {e}"),
        }
        match backend.probe_capabilities().await {
            Ok(caps) => println!(
                "  [OK] Export encoder: {} ({})",
                caps.video_encoder,
                if caps.hardware { "hardware" } else { "software" }
            ),
            Err(e) => println!("  [WARN] {e}"),
        }
    }

    println!("\nFonts:");
    let family = config
        .style_path
        .as_deref()
        .and_then(|path| StyleConfig::load(path).ok())
        .unwrap_or_default()
        .font_family;
    if FontResolver::system().resolve(&family).is_fallback() {
        println!("  [WARN] No font for '{family}', captions use placeholder glyphs");
    } else {
        println!("  [OK] Caption font '{family}' resolved");
    }

    println!("\n{}", "=".repeat(50));
    Ok(())
}
