//! Export job state and the caption burn-in pipeline.
//!
//! An [`ExportJob`] is the observable side of one export: status, progress,
//! and a short rolling log, published through a `tokio::sync::watch`
//! channel. The [`ExportPipeline`] drives a [`MediaBackend`] frame by frame,
//! compositing captions onto every decoded frame before encoding it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use subgenius_caption_model::{CaptionRecord, StyleConfig};
use subgenius_common::clock::{FrameClock, ProgressCadence};
use subgenius_common::config::ExportSettings;
use subgenius_common::error::{SubgeniusError, SubgeniusResult};
use tiny_skia::Pixmap;
use tokio::sync::{watch, Mutex};

use crate::backend::{
    AudioBuffer, AudioEncoderConfig, FrameRequest, FrameSource, MediaBackend, MuxerConfig,
    TrackKind, TrackSink, VideoEncoderConfig, VideoFrame,
};
use crate::compositor::composite_captions;
use crate::font::FontResolver;

/// MIME type of every export artifact.
pub const OUTPUT_MIME_TYPE: &str = "video/mp4";

const OUTPUT_FILE_PREFIX: &str = "video_legendado_";

/// Lifecycle of an export job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    Idle,
    Processing,
    Ready,
    Error,
}

impl fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Snapshot of an export job, as seen by observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportState {
    pub status: ExportStatus,

    /// Completion percentage in `[0, 100]`.
    pub progress: u8,

    /// Latest status line, or the failure message in the `Error` state.
    pub message: String,

    /// Recent status lines, most recent first.
    pub log: Vec<String>,

    /// Frames handed to the encoder so far.
    pub frames_submitted: u64,

    pub total_frames: u64,
}

impl Default for ExportState {
    fn default() -> Self {
        Self {
            status: ExportStatus::Idle,
            progress: 0,
            message: String::new(),
            log: Vec::new(),
            frames_submitted: 0,
            total_frames: 0,
        }
    }
}

/// Requests cancellation of a running export.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Observable state of one export.
///
/// `Idle -> Processing -> Ready | Error`. `Error` can be dismissed back to
/// `Idle`; `Ready` is terminal.
pub struct ExportJob {
    state: watch::Sender<ExportState>,
    abort: AbortHandle,
    log_capacity: usize,
}

impl ExportJob {
    pub fn new(log_capacity: usize) -> Self {
        let (state, _) = watch::channel(ExportState::default());
        Self {
            state,
            abort: AbortHandle::default(),
            log_capacity: log_capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ExportState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> ExportState {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> ExportStatus {
        self.state.borrow().status
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Return a failed job to `Idle`. Returns whether anything changed.
    pub fn dismiss_error(&self) -> bool {
        self.state.send_if_modified(|state| {
            if state.status != ExportStatus::Error {
                return false;
            }
            *state = ExportState::default();
            true
        })
    }

    fn begin(&self) -> SubgeniusResult<()> {
        let current = self.status();
        if current != ExportStatus::Idle {
            return Err(SubgeniusError::validation(format!(
                "Export job is {current}, expected idle"
            )));
        }
        self.abort.reset();
        self.state.send_modify(|state| {
            *state = ExportState {
                status: ExportStatus::Processing,
                ..ExportState::default()
            };
        });
        Ok(())
    }

    /// Set the status message and prepend it to the log.
    fn stage(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(stage = %message, "Export stage");
        let capacity = self.log_capacity;
        self.state.send_modify(|state| {
            push_log(&mut state.log, message.clone(), capacity);
            state.message = message;
        });
    }

    fn plan(&self, total_frames: u64) {
        self.state.send_modify(|state| state.total_frames = total_frames);
    }

    fn frame_submitted(&self) {
        self.state.send_modify(|state| state.frames_submitted += 1);
    }

    fn report_frame(&self, index: u64, total: u64) {
        let progress = ProgressCadence::percent(index, total);
        let line = format!("Rendering frame {index}/{total}");
        tracing::debug!(index, total, progress, "Export progress");
        let capacity = self.log_capacity;
        self.state.send_modify(|state| {
            state.progress = progress;
            push_log(&mut state.log, line, capacity);
        });
    }

    fn complete(&self, message: impl Into<String>) {
        let message = message.into();
        let capacity = self.log_capacity;
        self.state.send_modify(|state| {
            state.status = ExportStatus::Ready;
            state.progress = 100;
            push_log(&mut state.log, message.clone(), capacity);
            state.message = message;
        });
    }

    fn fail(&self, message: String) {
        let capacity = self.log_capacity;
        self.state.send_modify(|state| {
            state.status = ExportStatus::Error;
            push_log(&mut state.log, message.clone(), capacity);
            state.message = message;
        });
    }
}

impl Default for ExportJob {
    fn default() -> Self {
        Self::new(ExportSettings::default().log_capacity)
    }
}

fn push_log(log: &mut Vec<String>, line: String, capacity: usize) {
    log.insert(0, line);
    log.truncate(capacity);
}

/// Input of one export.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub source: PathBuf,
    pub captions: Vec<CaptionRecord>,
    pub style: StyleConfig,
}

/// The finished MP4, held in memory.
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub file_name: String,
    pub width: u32,
    pub height: u32,
    pub frame_count: u64,
}

impl ExportArtifact {
    /// Write the artifact under its own file name into `dir`.
    pub fn save_in(&self, dir: &Path) -> SubgeniusResult<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(&self.file_name);
        std::fs::write(&path, &self.bytes)?;
        Ok(path)
    }
}

/// `video_legendado_<unix-ms>.mp4`
pub fn artifact_file_name(unix_ms: i64) -> String {
    format!("{OUTPUT_FILE_PREFIX}{unix_ms}.mp4")
}

/// Round each dimension down to an even value (odd sizes lose one pixel).
pub fn normalize_dimensions(width: u32, height: u32) -> (u32, u32) {
    (width - width % 2, height - height % 2)
}

/// Tunables of the export loop.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub fps: u32,
    pub keyframe_interval: u64,
    pub backpressure_threshold: usize,
    pub progress_interval: u64,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
    pub audio_bitrate: u32,
    pub metadata_timeout: Duration,
    pub seek_timeout: Duration,
    pub allow_software_encoder: bool,
}

impl From<&ExportSettings> for PipelineOptions {
    fn from(settings: &ExportSettings) -> Self {
        Self {
            fps: settings.fps.max(1),
            keyframe_interval: settings.keyframe_interval.max(1),
            backpressure_threshold: settings.backpressure_threshold,
            progress_interval: settings.progress_interval.max(1),
            audio_sample_rate: settings.audio_sample_rate,
            audio_channels: settings.audio_channels,
            audio_bitrate: settings.audio_bitrate,
            metadata_timeout: settings.metadata_timeout(),
            seek_timeout: settings.seek_timeout(),
            allow_software_encoder: settings.allow_software_encoder,
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from(&ExportSettings::default())
    }
}

/// Runs exports against a media backend, one at a time.
pub struct ExportPipeline<B> {
    backend: B,
    options: PipelineOptions,
    fonts: FontResolver,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag when the export ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<B: MediaBackend> ExportPipeline<B> {
    pub fn new(backend: B, options: PipelineOptions, fonts: FontResolver) -> Self {
        Self {
            backend,
            options,
            fonts,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn fonts(&self) -> &FontResolver {
        &self.fonts
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Burn `request.captions` into `request.source` and return the MP4.
    ///
    /// A second call while one is running fails with
    /// [`SubgeniusError::Busy`] and leaves `job` untouched. Every other
    /// failure moves `job` to `Error` carrying the error's message.
    pub async fn export(
        &self,
        request: &ExportRequest,
        job: &ExportJob,
    ) -> SubgeniusResult<ExportArtifact> {
        let Some(_in_flight) = InFlight::acquire(&self.in_flight) else {
            tracing::warn!("Rejected export while another export is running");
            return Err(SubgeniusError::Busy);
        };
        job.begin()?;

        tracing::info!(
            source = %request.source.display(),
            captions = request.captions.len(),
            backend = self.backend.name(),
            "Starting export"
        );
        let started = Instant::now();

        let result = self.run(request, job).await;
        match &result {
            Ok(artifact) => {
                job.complete("Export complete");
                tracing::info!(
                    file = %artifact.file_name,
                    bytes = artifact.bytes.len(),
                    frames = artifact.frame_count,
                    elapsed_secs = started.elapsed().as_secs_f64(),
                    "Export finished"
                );
            }
            Err(err) => {
                job.fail(err.to_string());
                tracing::error!(error = %err, "Export failed");
            }
        }
        result
    }

    async fn run(
        &self,
        request: &ExportRequest,
        job: &ExportJob,
    ) -> SubgeniusResult<ExportArtifact> {
        if request.captions.is_empty() {
            return Err(SubgeniusError::validation("No captions to export"));
        }

        job.stage("Checking encoder support");
        let caps = self.backend.probe_capabilities().await?;
        if !caps.hardware && !self.options.allow_software_encoder {
            return Err(SubgeniusError::capability(format!(
                "Encoder {} is not hardware accelerated and software encoding is disabled",
                caps.video_encoder
            )));
        }
        tracing::info!(
            encoder = %caps.video_encoder,
            hardware = caps.hardware,
            "Selected video encoder"
        );

        job.stage("Initializing export");
        let mut source = self.backend.open_source(&request.source).await?;
        let result = self
            .render(source.as_mut(), &caps.video_encoder, request, job)
            .await;
        source.release().await;
        result
    }

    async fn render(
        &self,
        source: &mut dyn FrameSource,
        encoder: &str,
        request: &ExportRequest,
        job: &ExportJob,
    ) -> SubgeniusResult<ExportArtifact> {
        let opts = &self.options;
        let metadata = tokio::time::timeout(opts.metadata_timeout, source.metadata())
            .await
            .map_err(|_| SubgeniusError::timeout("video metadata", opts.metadata_timeout))??;

        let (width, height) = normalize_dimensions(metadata.width, metadata.height);
        if width == 0 || height == 0 {
            return Err(SubgeniusError::decode(format!(
                "Source has unusable dimensions {}x{}",
                metadata.width, metadata.height
            )));
        }
        let clock = FrameClock::new(opts.fps);
        let total_frames = clock.total_frames(metadata.duration_secs);
        job.plan(total_frames);
        tracing::info!(
            width,
            height,
            duration_secs = metadata.duration_secs,
            total_frames,
            has_audio = metadata.has_audio,
            "Export plan"
        );

        let video_config = VideoEncoderConfig {
            encoder: encoder.to_string(),
            width,
            height,
            fps: clock.fps(),
            bitrate: u64::from(width) * u64::from(height) * 2,
            keyframe_interval: opts.keyframe_interval,
        };
        let audio_config = AudioEncoderConfig {
            sample_rate: opts.audio_sample_rate,
            channels: opts.audio_channels,
            bitrate: opts.audio_bitrate,
        };
        let muxer = Arc::new(Mutex::new(self.backend.create_muxer(&MuxerConfig {
            video: video_config.clone(),
            audio: audio_config.clone(),
        })?));
        let mut video = self
            .backend
            .create_video_encoder(&video_config, TrackSink::new(TrackKind::Video, muxer.clone()))
            .await?;
        let mut audio = self
            .backend
            .create_audio_encoder(&audio_config, TrackSink::new(TrackKind::Audio, muxer.clone()))
            .await?;

        job.stage("Processing audio");
        let pcm = if metadata.has_audio {
            self.backend
                .decode_audio(&request.source, opts.audio_sample_rate, opts.audio_channels)
                .await?
        } else {
            tracing::info!("Source has no audio stream, encoding silence");
            AudioBuffer::silence(
                metadata.duration_secs,
                opts.audio_sample_rate,
                opts.audio_channels,
            )
        };
        audio.encode(pcm, 0).await?;

        job.stage("Rendering video and captions");
        let face = self.fonts.resolve(&request.style.font_family);
        let mut surface = Pixmap::new(width, height).ok_or_else(|| {
            SubgeniusError::render(format!("Cannot allocate a {width}x{height} frame"))
        })?;
        let cadence = ProgressCadence::new(opts.progress_interval);
        let abort = job.abort_handle();

        for index in 0..total_frames {
            if abort.is_aborted() {
                tracing::warn!(index, "Export aborted");
                return Err(SubgeniusError::Aborted);
            }

            let time_secs = clock.time_secs(index);
            let frame_request = FrameRequest {
                index,
                time_secs,
                width,
                height,
                fps: clock.fps(),
            };
            tokio::time::timeout(
                opts.seek_timeout,
                source.seek_frame(&frame_request, surface.data_mut()),
            )
            .await
            .map_err(|_| {
                SubgeniusError::timeout(format!("seek to frame {index}"), opts.seek_timeout)
            })??;

            composite_captions(
                &mut surface,
                &request.captions,
                time_secs,
                &request.style,
                &face,
            );

            let frame = VideoFrame {
                index,
                timestamp_us: clock.timestamp_us(index),
                width,
                height,
                data: surface.data().to_vec(),
            };

            if video.queue_depth() > opts.backpressure_threshold {
                video.flush().await?;
            }
            video
                .encode(frame, index % opts.keyframe_interval == 0)
                .await?;
            job.frame_submitted();

            if cadence.should_report(index) {
                job.report_frame(index, total_frames);
            }
        }

        job.stage("Finalizing MP4 file");
        video.finish().await?;
        audio.finish().await?;
        drop(video);
        drop(audio);
        let bytes = muxer.lock().await.finalize().await?;

        Ok(ExportArtifact {
            bytes,
            mime_type: OUTPUT_MIME_TYPE,
            file_name: artifact_file_name(chrono::Utc::now().timestamp_millis()),
            width,
            height,
            frame_count: total_frames,
        })
    }
}
