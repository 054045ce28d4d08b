//! Burn captions into a video.

use std::path::PathBuf;

use subgenius_common::config::AppConfig;
use subgenius_render_engine::backend::FfmpegBackend;
use subgenius_render_engine::font::FontResolver;
use subgenius_render_engine::{
    ExportJob, ExportPipeline, ExportRequest, ExportStatus, PipelineOptions,
};

use super::{load_captions, load_style};

pub async fn run(
    config: &AppConfig,
    video: PathBuf,
    captions: PathBuf,
    style: Option<PathBuf>,
    output_dir: PathBuf,
    allow_software: bool,
    encoder: Option<String>,
) -> anyhow::Result<()> {
    let captions = load_captions(&captions)?;
    let style = load_style(config, style)?;

    let mut settings = config.export.clone();
    settings.allow_software_encoder |= allow_software;
    if encoder.is_some() {
        settings.preferred_encoder = encoder;
    }

    let backend = FfmpegBackend::new(&settings);
    if !backend.is_available() {
        anyhow::bail!(
            "ffmpeg/ffprobe not found (looked for {} and {})",
            settings.ffmpeg_path.display(),
            settings.ffprobe_path.display()
        );
    }

    println!("Exporting: {}", video.display());
    println!("  Captions: {}", captions.len());

    let pipeline = ExportPipeline::new(
        backend,
        PipelineOptions::from(&settings),
        FontResolver::system(),
    );
    let job = ExportJob::new(settings.log_capacity);

    let mut updates = job.subscribe();
    let printer = tokio::spawn(async move {
        let mut last_message = String::new();
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            if state.message != last_message {
                println!("  [{:>3}%] {}", state.progress, state.message);
                last_message = state.message;
            }
            if matches!(state.status, ExportStatus::Ready | ExportStatus::Error) {
                break;
            }
        }
    });

    let abort = job.abort_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, stopping export...");
            abort.abort();
        }
    });

    let request = ExportRequest {
        source: video,
        captions: captions.records().to_vec(),
        style,
    };
    let result = pipeline.export(&request, &job).await;
    interrupt.abort();
    drop(job);
    let _ = printer.await;

    let artifact = result?;
    let path = artifact.save_in(&output_dir)?;

    println!("\nExport complete!");
    println!("  Output: {}", path.display());
    println!(
        "  Video: {}x{}, {} frames ({:.1} MB)",
        artifact.width,
        artifact.height,
        artifact.frame_count,
        artifact.bytes.len() as f64 / (1024.0 * 1024.0)
    );
    Ok(())
}
