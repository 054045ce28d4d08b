//! SubGenius CLI: Command-line interface for caption burn-in and exchange.
//!
//! Usage:
//!   subgenius export <VIDEO> -c <CAPTIONS>    Burn captions into an MP4
//!   subgenius preview <VIDEO> -c <CAPTIONS>   Render one captioned frame as PNG
//!   subgenius ass <CAPTIONS>                  Write an ASS (or SRT) subtitle file
//!   subgenius import <JSON>                   Normalize pasted caption JSON
//!   subgenius lint <CAPTIONS>                 Report overlaps and long lines
//!   subgenius check                           Check encoder and font support

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use subgenius_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "subgenius",
    about = "Burn styled captions into videos and exchange them as ASS/SRT/JSON",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Burn captions into a video and write the MP4
    Export {
        /// Source video
        video: PathBuf,

        /// Caption file (.json or .ass)
        #[arg(short, long)]
        captions: PathBuf,

        /// Style file (JSON); defaults to the configured style
        #[arg(short, long)]
        style: Option<PathBuf>,

        /// Directory for the exported file
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// Permit a software H.264 encoder
        #[arg(long)]
        allow_software: bool,

        /// Encoder to try first (e.g. h264_vaapi)
        #[arg(long)]
        encoder: Option<String>,
    },

    /// Render the frame at a timestamp with captions to a PNG
    Preview {
        /// Source video
        video: PathBuf,

        /// Caption file (.json or .ass)
        #[arg(short, long)]
        captions: PathBuf,

        /// Style file (JSON)
        #[arg(short, long)]
        style: Option<PathBuf>,

        /// Timestamp as mm:ss.mmm or seconds
        #[arg(long, default_value = "0")]
        at: String,

        /// Output PNG path
        #[arg(short, long, default_value = "preview.png")]
        output: PathBuf,
    },

    /// Write captions as an ASS subtitle file (SRT when the output ends in .srt)
    Ass {
        /// Caption file (.json or .ass)
        captions: PathBuf,

        /// Style file (JSON)
        #[arg(short, long)]
        style: Option<PathBuf>,

        /// Script resolution width
        #[arg(long, default_value = "1920")]
        width: u32,

        /// Script resolution height
        #[arg(long, default_value = "1080")]
        height: u32,

        /// Output path
        #[arg(short, long, default_value = "legendas.ass")]
        output: PathBuf,
    },

    /// Import caption JSON (code fences allowed) and write it back normalized
    Import {
        /// JSON file, or - for stdin
        input: PathBuf,

        /// Output JSON path; prints to stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Report inverted ranges, overlaps and over-long captions
    Lint {
        /// Caption file (.json or .ass)
        captions: PathBuf,

        /// Style file (JSON)
        #[arg(short, long)]
        style: Option<PathBuf>,
    },

    /// Check ffmpeg, encoder and font support
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load();

    // Initialize logging
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    subgenius_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Export {
            video,
            captions,
            style,
            output_dir,
            allow_software,
            encoder,
        } => {
            commands::export::run(
                &config,
                video,
                captions,
                style,
                output_dir,
                allow_software,
                encoder,
            )
            .await
        }
        Commands::Preview {
            video,
            captions,
            style,
            at,
            output,
        } => commands::preview::run(&config, video, captions, style, &at, output).await,
        Commands::Ass {
            captions,
            style,
            width,
            height,
            output,
        } => commands::ass::run(&config, captions, style, width, height, output),
        Commands::Import { input, output } => commands::import::run(input, output),
        Commands::Lint { captions, style } => commands::lint::run(&config, captions, style),
        Commands::Check => commands::check::run(&config).await,
    }
}
