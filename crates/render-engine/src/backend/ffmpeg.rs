//! ffmpeg/ffprobe subprocess backend.
//!
//! Every component is a child process talking raw bytes over pipes:
//!
//! ```text
//! source.mp4 ─► ffmpeg (decode, fps + scale) ─► RGBA frames ─► compositor
//! compositor ─► ffmpeg (h264 encoder) ─► Annex B stream ─┐
//! source.mp4 ─► ffmpeg (f32le 44.1k) ─► ffmpeg (aac) ────┼─► ffmpeg -c copy ─► MP4 bytes
//! ```

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use subgenius_common::config::ExportSettings;
use subgenius_common::error::{SubgeniusError, SubgeniusResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use super::{
    AudioBuffer, AudioEncoder, AudioEncoderConfig, EncodedChunk, EncoderCapabilities,
    FrameRequest, FrameSource, MediaBackend, Muxer, MuxerConfig, SourceMetadata, TrackKind,
    TrackSink, VideoEncoder, VideoEncoderConfig, VideoFrame,
};

/// Hardware H.264 encoders, in order of preference.
pub const HARDWARE_H264_ENCODERS: &[&str] = &[
    "h264_nvenc",
    "h264_qsv",
    "h264_videotoolbox",
    "h264_amf",
    "h264_vaapi",
    "h264_mf",
];

/// Software encoders, used only when explicitly allowed.
pub const SOFTWARE_H264_ENCODERS: &[&str] = &["libx264", "libopenh264"];

const AAC_ENCODER: &str = "aac";
const VAAPI_DEVICE: &str = "/dev/dri/renderD128";
const VERIFY_TIMEOUT: Duration = Duration::from_secs(15);
const READ_CHUNK_BYTES: usize = 64 * 1024;
const STDERR_TAIL_BYTES: usize = 4 * 1024;

/// Media backend built on the ffmpeg command-line tools.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    preferred_encoder: Option<String>,
    allow_software_encoder: bool,
}

impl FfmpegBackend {
    pub fn new(settings: &ExportSettings) -> Self {
        Self {
            ffmpeg: settings.ffmpeg_path.clone(),
            ffprobe: settings.ffprobe_path.clone(),
            preferred_encoder: settings.preferred_encoder.clone(),
            allow_software_encoder: settings.allow_software_encoder,
        }
    }

    /// Whether both ffmpeg and ffprobe can be executed.
    pub fn is_available(&self) -> bool {
        command_exists(&self.ffmpeg) && command_exists(&self.ffprobe)
    }

    /// Encoder names listed by `ffmpeg -encoders`.
    pub async fn list_encoders(&self) -> SubgeniusResult<Vec<String>> {
        let output = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                SubgeniusError::capability(format!(
                    "Failed to run {}: {e}",
                    self.ffmpeg.display()
                ))
            })?;
        if !output.status.success() {
            return Err(SubgeniusError::capability(format!(
                "{} -encoders failed ({}): {}",
                self.ffmpeg.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(parse_encoder_list(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Encode a few synthetic frames to confirm the encoder actually works
    /// on this machine (a listed encoder may lack its device or driver).
    async fn verify_encoder(&self, encoder: &str) -> bool {
        let profile = EncoderProfile::for_encoder(encoder);
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
            .into_iter()
            .map(String::from)
            .collect();
        args.extend(profile.global_args.iter().map(|a| a.to_string()));
        args.extend(
            ["-f", "lavfi", "-i", "color=c=black:s=256x144:r=30:d=0.2"]
                .into_iter()
                .map(String::from),
        );
        args.extend(profile.codec_args(encoder));
        args.extend(["-frames:v", "3", "-f", "null", "-"].into_iter().map(String::from));

        let run = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();
        match tokio::time::timeout(VERIFY_TIMEOUT, run).await {
            Ok(Ok(output)) if output.status.success() => true,
            Ok(Ok(output)) => {
                tracing::debug!(
                    encoder,
                    status = %output.status,
                    stderr = %tail(&output.stderr),
                    "Encoder failed verification"
                );
                false
            }
            Ok(Err(err)) => {
                tracing::debug!(encoder, error = %err, "Could not run encoder verification");
                false
            }
            Err(_) => {
                tracing::debug!(encoder, "Encoder verification timed out");
                false
            }
        }
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin"])
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait::async_trait]
impl MediaBackend for FfmpegBackend {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn probe_capabilities(&self) -> SubgeniusResult<EncoderCapabilities> {
        let listed = self.list_encoders().await?;
        if !listed.iter().any(|name| name == AAC_ENCODER) {
            return Err(SubgeniusError::capability(
                "ffmpeg was built without the AAC audio encoder",
            ));
        }

        let candidates = encoder_candidates(
            &listed,
            self.preferred_encoder.as_deref(),
            self.allow_software_encoder,
        );
        for candidate in candidates {
            if self.verify_encoder(&candidate.video_encoder).await {
                return Ok(candidate);
            }
            tracing::info!(encoder = %candidate.video_encoder, "Encoder listed but not usable");
        }

        Err(SubgeniusError::capability(format!(
            "No usable hardware H.264 encoder found (tried {}); \
             set allow_software_encoder to permit a software encoder",
            HARDWARE_H264_ENCODERS.join(", ")
        )))
    }

    async fn open_source(&self, path: &Path) -> SubgeniusResult<Box<dyn FrameSource>> {
        if !path.exists() {
            return Err(SubgeniusError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        Ok(Box::new(FfmpegFrameSource {
            ffmpeg: self.ffmpeg.clone(),
            ffprobe: self.ffprobe.clone(),
            path: path.to_path_buf(),
            decoder: None,
            frame: Vec::new(),
            has_frame: false,
        }))
    }

    async fn decode_audio(
        &self,
        path: &Path,
        sample_rate: u32,
        channels: u16,
    ) -> SubgeniusResult<AudioBuffer> {
        let output = self
            .base_command()
            .arg("-i")
            .arg(path)
            .args(["-vn", "-sn", "-f", "f32le"])
            .arg("-ac")
            .arg(channels.to_string())
            .arg("-ar")
            .arg(sample_rate.to_string())
            .arg("pipe:1")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SubgeniusError::decode(format!("Failed to start audio decoder: {e}")))?;
        if !output.status.success() {
            return Err(SubgeniusError::decode(format!(
                "Audio decode failed ({}): {}",
                output.status,
                tail(&output.stderr)
            )));
        }

        let samples: Vec<f32> = output
            .stdout
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        tracing::debug!(samples = samples.len(), "Decoded source audio");
        Ok(AudioBuffer {
            sample_rate,
            channels,
            samples,
        })
    }

    fn create_muxer(&self, config: &MuxerConfig) -> SubgeniusResult<Box<dyn Muxer>> {
        Ok(Box::new(FfmpegMuxer {
            ffmpeg: self.ffmpeg.clone(),
            fps: config.video.fps,
            video: Vec::new(),
            audio: Vec::new(),
        }))
    }

    async fn create_video_encoder(
        &self,
        config: &VideoEncoderConfig,
        sink: TrackSink,
    ) -> SubgeniusResult<Box<dyn VideoEncoder>> {
        let mut cmd = self.base_command();
        cmd.args(video_encoder_args(config));
        let process = EncoderProcess::spawn(config.encoder.clone(), cmd, sink)?;
        Ok(Box::new(FfmpegVideoEncoder {
            process,
            frame_len: config.width as usize * config.height as usize * 4,
            keyframe_interval: config.keyframe_interval.max(1),
        }))
    }

    async fn create_audio_encoder(
        &self,
        config: &AudioEncoderConfig,
        sink: TrackSink,
    ) -> SubgeniusResult<Box<dyn AudioEncoder>> {
        let mut cmd = self.base_command();
        cmd.args(audio_encoder_args(config));
        let process = EncoderProcess::spawn(AAC_ENCODER.to_string(), cmd, sink)?;
        Ok(Box::new(FfmpegAudioEncoder {
            process,
            channels: config.channels,
        }))
    }
}

fn command_exists(binary: &Path) -> bool {
    std::process::Command::new(binary)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Extract encoder names from `ffmpeg -encoders` output.
pub fn parse_encoder_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let flags = parts.next()?;
            let name = parts.next()?;
            let is_entry = flags.len() == 6
                && flags.starts_with(|c| matches!(c, 'V' | 'A' | 'S'))
                && name != "=";
            is_entry.then(|| name.to_string())
        })
        .collect()
}

/// Encoders worth trying, best first: the preferred one, then hardware
/// encoders, then software encoders when allowed.
pub fn encoder_candidates(
    available: &[String],
    preferred: Option<&str>,
    allow_software: bool,
) -> Vec<EncoderCapabilities> {
    let listed = |name: &str| available.iter().any(|a| a == name);
    let mut candidates: Vec<EncoderCapabilities> = Vec::new();
    let mut push = |name: &str, hardware: bool| {
        if listed(name) && !candidates.iter().any(|c| c.video_encoder == name) {
            candidates.push(EncoderCapabilities {
                video_encoder: name.to_string(),
                hardware,
            });
        }
    };

    if let Some(name) = preferred {
        let hardware = !SOFTWARE_H264_ENCODERS.contains(&name);
        if hardware || allow_software {
            push(name, hardware);
        }
    }
    for &name in HARDWARE_H264_ENCODERS {
        push(name, true);
    }
    if allow_software {
        for &name in SOFTWARE_H264_ENCODERS {
            push(name, false);
        }
    }
    candidates
}

/// Per-encoder arguments needed to produce baseline H.264 from RGBA input.
struct EncoderProfile {
    /// Global options placed before the input.
    global_args: &'static [&'static str],
    filter: Option<&'static str>,
    pix_fmt: Option<&'static str>,
    profile: Option<&'static str>,
}

impl EncoderProfile {
    fn for_encoder(encoder: &str) -> Self {
        match encoder {
            "h264_vaapi" => Self {
                global_args: &["-vaapi_device", VAAPI_DEVICE],
                filter: Some("format=nv12,hwupload"),
                pix_fmt: None,
                profile: Some("constrained_baseline"),
            },
            "h264_qsv" => Self {
                global_args: &[],
                filter: None,
                pix_fmt: Some("nv12"),
                profile: Some("baseline"),
            },
            "h264_amf" => Self {
                global_args: &[],
                filter: None,
                pix_fmt: Some("yuv420p"),
                profile: Some("constrained_baseline"),
            },
            "h264_mf" | "libopenh264" => Self {
                global_args: &[],
                filter: None,
                pix_fmt: Some("yuv420p"),
                profile: None,
            },
            _ => Self {
                global_args: &[],
                filter: None,
                pix_fmt: Some("yuv420p"),
                profile: Some("baseline"),
            },
        }
    }

    fn codec_args(&self, encoder: &str) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(filter) = self.filter {
            args.extend(["-vf".to_string(), filter.to_string()]);
        }
        args.extend(["-c:v".to_string(), encoder.to_string()]);
        if let Some(profile) = self.profile {
            args.extend(["-profile:v".to_string(), profile.to_string()]);
        }
        if let Some(pix_fmt) = self.pix_fmt {
            args.extend(["-pix_fmt".to_string(), pix_fmt.to_string()]);
        }
        args
    }
}

/// Arguments for an encoder reading RGBA frames on stdin and writing an
/// Annex B H.264 stream on stdout.
pub fn video_encoder_args(config: &VideoEncoderConfig) -> Vec<String> {
    let profile = EncoderProfile::for_encoder(&config.encoder);
    let gop = config.keyframe_interval.max(1);

    let mut args: Vec<String> = profile.global_args.iter().map(|a| a.to_string()).collect();
    args.extend([
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgba".to_string(),
        "-s".to_string(),
        format!("{}x{}", config.width, config.height),
        "-framerate".to_string(),
        config.fps.to_string(),
        "-i".to_string(),
        "pipe:0".to_string(),
    ]);
    args.extend(profile.codec_args(&config.encoder));
    args.extend([
        "-b:v".to_string(),
        config.bitrate.to_string(),
        "-g".to_string(),
        gop.to_string(),
        "-bf".to_string(),
        "0".to_string(),
        "-force_key_frames".to_string(),
        format!("expr:eq(mod(n,{gop}),0)"),
        "-an".to_string(),
        "-f".to_string(),
        "h264".to_string(),
        "pipe:1".to_string(),
    ]);
    args
}

/// Arguments for an AAC encoder reading interleaved f32le PCM on stdin and
/// writing ADTS on stdout.
pub fn audio_encoder_args(config: &AudioEncoderConfig) -> Vec<String> {
    vec![
        "-f".to_string(),
        "f32le".to_string(),
        "-ar".to_string(),
        config.sample_rate.to_string(),
        "-ac".to_string(),
        config.channels.to_string(),
        "-i".to_string(),
        "pipe:0".to_string(),
        "-c:a".to_string(),
        AAC_ENCODER.to_string(),
        "-b:a".to_string(),
        config.bitrate.to_string(),
        "-f".to_string(),
        "adts".to_string(),
        "pipe:1".to_string(),
    ]
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Read duration, first video stream size and audio presence from
/// `ffprobe -print_format json -show_format -show_streams` output.
pub fn parse_probe_output(json: &str) -> SubgeniusResult<SourceMetadata> {
    let probe: ProbeOutput = serde_json::from_str(json)?;
    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| SubgeniusError::decode("Source has no video stream"))?;
    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(SubgeniusError::decode("Video stream has no dimensions")),
    };

    let parse_secs = |raw: Option<&String>| {
        raw.and_then(|d| d.parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d > 0.0)
    };
    let duration_secs = parse_secs(probe.format.as_ref().and_then(|f| f.duration.as_ref()))
        .or_else(|| parse_secs(video.duration.as_ref()))
        .ok_or_else(|| SubgeniusError::decode("Source duration is unknown"))?;

    Ok(SourceMetadata {
        duration_secs,
        width,
        height,
        has_audio: probe
            .streams
            .iter()
            .any(|s| s.codec_type.as_deref() == Some("audio")),
    })
}

struct FfmpegFrameSource {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    path: PathBuf,
    decoder: Option<RawDecoder>,
    /// Most recent decoded frame.
    frame: Vec<u8>,
    has_frame: bool,
}

/// A running decoder streaming RGBA frames from a start frame onward.
struct RawDecoder {
    child: Child,
    stdout: ChildStdout,
    stderr: JoinHandle<String>,
    next_index: u64,
}

impl RawDecoder {
    /// Read the next frame into `buf`. `Ok(false)` on a clean end of stream.
    async fn read_frame(&mut self, buf: &mut [u8]) -> SubgeniusResult<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.stdout.read(&mut buf[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(SubgeniusError::decode(format!(
                    "Truncated frame {} ({filled} of {} bytes)",
                    self.next_index,
                    buf.len()
                )));
            }
            filled += n;
        }
        self.next_index += 1;
        Ok(true)
    }

    async fn stop(mut self) -> String {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
        self.stderr.await.unwrap_or_default()
    }
}

impl FfmpegFrameSource {
    fn spawn_decoder(&self, request: &FrameRequest) -> SubgeniusResult<RawDecoder> {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin"]);
        if request.time_secs > 0.0 {
            cmd.arg("-ss").arg(format!("{:.6}", request.time_secs));
        }
        cmd.arg("-i")
            .arg(&self.path)
            .args(["-an", "-sn", "-vf"])
            .arg(format!(
                "fps={},scale={}:{}",
                request.fps, request.width, request.height
            ))
            .args(["-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| SubgeniusError::decode(format!("Failed to start ffmpeg decoder: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SubgeniusError::decode("Failed to capture decoder stdout"))?;
        let stderr = collect_stderr(child.stderr.take());
        tracing::debug!(
            start_frame = request.index,
            time_secs = request.time_secs,
            pid = child.id(),
            "Started decoder"
        );
        Ok(RawDecoder {
            child,
            stdout,
            stderr,
            next_index: request.index,
        })
    }
}

#[async_trait::async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn metadata(&mut self) -> SubgeniusResult<SourceMetadata> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(&self.path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SubgeniusError::decode(format!("Failed to run ffprobe: {e}")))?;
        if !output.status.success() {
            return Err(SubgeniusError::decode(format!(
                "ffprobe failed ({}): {}",
                output.status,
                tail(&output.stderr)
            )));
        }
        parse_probe_output(&String::from_utf8_lossy(&output.stdout))
    }

    async fn seek_frame(
        &mut self,
        request: &FrameRequest,
        target: &mut [u8],
    ) -> SubgeniusResult<()> {
        let frame_len = request.width as usize * request.height as usize * 4;
        if target.len() != frame_len {
            return Err(SubgeniusError::render(format!(
                "Frame buffer holds {} bytes, expected {frame_len}",
                target.len()
            )));
        }
        if self.frame.len() != frame_len {
            self.frame = vec![0; frame_len];
            self.has_frame = false;
        }

        // Frames are requested in order; only a backward seek restarts.
        let mut decoder = match self.decoder.take() {
            Some(decoder) if decoder.next_index <= request.index => decoder,
            stale => {
                if let Some(old) = stale {
                    old.stop().await;
                }
                self.spawn_decoder(request)?
            }
        };

        let mut ended = false;
        while decoder.next_index <= request.index {
            if !decoder.read_frame(&mut self.frame).await? {
                ended = true;
                break;
            }
            self.has_frame = true;
        }

        if ended {
            let stderr = decoder.stop().await;
            if !self.has_frame {
                return Err(SubgeniusError::decode(format!(
                    "Decoder produced no frames: {stderr}"
                )));
            }
            // Container duration can outrun the last decodable frame.
            tracing::debug!(index = request.index, "Source ended early, repeating last frame");
        } else {
            self.decoder = Some(decoder);
        }

        target.copy_from_slice(&self.frame);
        Ok(())
    }

    async fn release(&mut self) {
        if let Some(decoder) = self.decoder.take() {
            decoder.stop().await;
        }
        self.frame = Vec::new();
        self.has_frame = false;
    }
}

/// Submission bookkeeping shared with an encoder's stdin writer task.
#[derive(Default)]
struct QueueState {
    pending: AtomicUsize,
    closed: AtomicBool,
    drained: Notify,
}

/// One encoder subprocess: a writer task feeding stdin, a reader task
/// forwarding stdout to the muxer, and a stderr collector.
struct EncoderProcess {
    label: String,
    child: Child,
    input: Option<mpsc::UnboundedSender<Vec<u8>>>,
    writer: Option<JoinHandle<std::io::Result<()>>>,
    reader: Option<JoinHandle<SubgeniusResult<()>>>,
    stderr: Option<JoinHandle<String>>,
    queue: Arc<QueueState>,
}

impl EncoderProcess {
    fn spawn(label: String, mut cmd: Command, sink: TrackSink) -> SubgeniusResult<Self> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd
            .spawn()
            .map_err(|e| SubgeniusError::encode(format!("Failed to start {label}: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SubgeniusError::encode(format!("Failed to open {label} stdin")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SubgeniusError::encode(format!("Failed to open {label} stdout")))?;
        let stderr = collect_stderr(child.stderr.take());

        let queue = Arc::new(QueueState::default());
        let (input, pending) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_input(stdin, pending, queue.clone()));
        let reader = tokio::spawn(forward_output(stdout, sink));
        tracing::debug!(encoder = %label, pid = child.id(), "Started encoder process");

        Ok(Self {
            label,
            child,
            input: Some(input),
            writer: Some(writer),
            reader: Some(reader),
            stderr: Some(stderr),
            queue,
        })
    }

    fn depth(&self) -> usize {
        self.queue.pending.load(Ordering::Acquire)
    }

    async fn submit(&mut self, bytes: Vec<u8>) -> SubgeniusResult<()> {
        let Some(input) = &self.input else {
            return Err(SubgeniusError::encode(format!(
                "{} already finished",
                self.label
            )));
        };
        self.queue.pending.fetch_add(1, Ordering::AcqRel);
        if input.send(bytes).is_err() {
            self.queue.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(self.failure("stopped accepting input").await);
        }
        Ok(())
    }

    async fn drain(&mut self) -> SubgeniusResult<()> {
        let queue = self.queue.clone();
        loop {
            let drained = queue.drained.notified();
            if queue.pending.load(Ordering::Acquire) == 0 {
                return Ok(());
            }
            if queue.closed.load(Ordering::Acquire) {
                drop(drained);
                return Err(self.failure("stopped consuming input").await);
            }
            drained.await;
        }
    }

    async fn close(&mut self) -> SubgeniusResult<()> {
        self.drain().await?;
        self.input.take();

        if let Some(writer) = self.writer.take() {
            let written = writer
                .await
                .map_err(|e| SubgeniusError::encode(format!("{} writer failed: {e}", self.label)))?;
            if let Err(err) = written {
                return Err(self.failure(&format!("input pipe failed: {err}")).await);
            }
        }
        if let Some(reader) = self.reader.take() {
            reader.await.map_err(|e| {
                SubgeniusError::encode(format!("{} reader failed: {e}", self.label))
            })??;
        }

        let status = self.child.wait().await?;
        let stderr = self.stderr_text().await;
        if !status.success() {
            return Err(SubgeniusError::encode(format!(
                "{} exited with {status}: {stderr}",
                self.label
            )));
        }
        tracing::debug!(encoder = %self.label, "Encoder finished");
        Ok(())
    }

    /// Stop the process and describe why it failed.
    async fn failure(&mut self, context: &str) -> SubgeniusError {
        let _ = self.child.start_kill();
        let status = self.child.wait().await;
        let stderr = self.stderr_text().await;
        let status = status
            .map(|s| s.to_string())
            .unwrap_or_else(|e| format!("unknown status ({e})"));
        SubgeniusError::encode(format!("{} {context} ({status}): {stderr}", self.label))
    }

    async fn stderr_text(&mut self) -> String {
        match self.stderr.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        }
    }
}

async fn write_input(
    mut stdin: ChildStdin,
    mut pending: mpsc::UnboundedReceiver<Vec<u8>>,
    queue: Arc<QueueState>,
) -> std::io::Result<()> {
    let result = async {
        while let Some(bytes) = pending.recv().await {
            stdin.write_all(&bytes).await?;
            drop(bytes);
            queue.pending.fetch_sub(1, Ordering::AcqRel);
            queue.drained.notify_waiters();
        }
        stdin.shutdown().await
    }
    .await;

    queue.closed.store(true, Ordering::Release);
    queue.drained.notify_waiters();
    result
}

async fn forward_output(mut stdout: ChildStdout, sink: TrackSink) -> SubgeniusResult<()> {
    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    loop {
        let n = stdout.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        sink.push(buf[..n].to_vec(), None, false).await?;
    }
}

/// Drain stderr concurrently so ffmpeg never blocks on a full pipe.
fn collect_stderr(stderr: Option<ChildStderr>) -> JoinHandle<String> {
    tokio::spawn(async move {
        match stderr {
            Some(stderr) => read_tail(stderr).await,
            None => String::new(),
        }
    })
}

async fn read_tail<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut output = Vec::new();
    match reader.read_to_end(&mut output).await {
        Ok(_) => tail(&output),
        Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
    }
}

fn tail(bytes: &[u8]) -> String {
    let start = bytes.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&bytes[start..]).trim().to_string()
}

struct FfmpegVideoEncoder {
    process: EncoderProcess,
    frame_len: usize,
    keyframe_interval: u64,
}

#[async_trait::async_trait]
impl VideoEncoder for FfmpegVideoEncoder {
    fn queue_depth(&self) -> usize {
        self.process.depth()
    }

    async fn encode(&mut self, frame: VideoFrame, keyframe: bool) -> SubgeniusResult<()> {
        if frame.data.len() != self.frame_len {
            return Err(SubgeniusError::encode(format!(
                "Frame {} has {} bytes, expected {}",
                frame.index,
                frame.data.len(),
                self.frame_len
            )));
        }
        // Keyframes come from the fixed GOP configured on the process.
        if keyframe != (frame.index % self.keyframe_interval == 0) {
            tracing::warn!(
                index = frame.index,
                keyframe,
                "Keyframe request does not match the encoder GOP"
            );
        }
        self.process.submit(frame.data).await
    }

    async fn flush(&mut self) -> SubgeniusResult<()> {
        self.process.drain().await
    }

    async fn finish(&mut self) -> SubgeniusResult<()> {
        self.process.close().await
    }
}

struct FfmpegAudioEncoder {
    process: EncoderProcess,
    channels: u16,
}

#[async_trait::async_trait]
impl AudioEncoder for FfmpegAudioEncoder {
    async fn encode(&mut self, audio: AudioBuffer, timestamp_us: u64) -> SubgeniusResult<()> {
        if audio.channels != self.channels {
            return Err(SubgeniusError::encode(format!(
                "Audio has {} channels, encoder expects {}",
                audio.channels, self.channels
            )));
        }
        tracing::debug!(
            timestamp_us,
            duration_secs = audio.duration_secs(),
            "Submitting audio"
        );
        let mut bytes = Vec::with_capacity(audio.samples.len() * 4);
        for sample in &audio.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        drop(audio);
        self.process.submit(bytes).await
    }

    async fn finish(&mut self) -> SubgeniusResult<()> {
        self.process.close().await
    }
}

/// Collects both elementary streams in memory and copy-muxes them into MP4
/// on finalize.
struct FfmpegMuxer {
    ffmpeg: PathBuf,
    fps: u32,
    video: Vec<u8>,
    audio: Vec<u8>,
}

impl FfmpegMuxer {
    async fn mux_in(&self, dir: &Path, video: &[u8], audio: &[u8]) -> SubgeniusResult<Vec<u8>> {
        let video_path = dir.join("video.h264");
        let audio_path = dir.join("audio.aac");
        let output_path = dir.join("output.mp4");
        tokio::fs::write(&video_path, video).await?;

        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin", "-y"])
            .args(["-f", "h264", "-framerate"])
            .arg(self.fps.to_string())
            .arg("-i")
            .arg(&video_path);
        if !audio.is_empty() {
            tokio::fs::write(&audio_path, audio).await?;
            cmd.args(["-f", "aac", "-i"]).arg(&audio_path);
        }
        cmd.args(["-map", "0:v:0"]);
        if !audio.is_empty() {
            cmd.args(["-map", "1:a:0", "-bsf:a", "aac_adtstoasc"]);
        }
        cmd.args(["-c", "copy", "-movflags", "+faststart", "-f", "mp4"])
            .arg(&output_path)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = cmd
            .output()
            .await
            .map_err(|e| SubgeniusError::encode(format!("Failed to start muxer: {e}")))?;
        if !output.status.success() {
            return Err(SubgeniusError::encode(format!(
                "Muxing failed ({}): {}",
                output.status,
                tail(&output.stderr)
            )));
        }
        Ok(tokio::fs::read(&output_path).await?)
    }
}

#[async_trait::async_trait]
impl Muxer for FfmpegMuxer {
    fn add_chunk(&mut self, chunk: EncodedChunk) -> SubgeniusResult<()> {
        match chunk.track {
            TrackKind::Video => self.video.extend_from_slice(&chunk.data),
            TrackKind::Audio => self.audio.extend_from_slice(&chunk.data),
        }
        Ok(())
    }

    async fn finalize(&mut self) -> SubgeniusResult<Vec<u8>> {
        let video = std::mem::take(&mut self.video);
        let audio = std::mem::take(&mut self.audio);
        if video.is_empty() {
            return Err(SubgeniusError::encode("Encoder produced no video data"));
        }

        let dir = std::env::temp_dir().join(format!("subgenius-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await?;
        let result = self.mux_in(&dir, &video, &audio).await;
        if let Err(err) = tokio::fs::remove_dir_all(&dir).await {
            tracing::warn!(dir = %dir.display(), error = %err, "Failed to remove mux directory");
        }

        if let Ok(bytes) = &result {
            tracing::info!(
                video_bytes = video.len(),
                audio_bytes = audio.len(),
                mp4_bytes = bytes.len(),
                "Muxed MP4"
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENCODERS_OUTPUT: &str = "\
Encoders:
 V..... = Video
 A..... = Audio
 S..... = Subtitle
 .F.... = Frame-level multithreading
 ------
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC (codec h264)
 V....D h264_nvenc           NVIDIA NVENC H.264 encoder (codec h264)
 V..... h264_vaapi           H.264/AVC (VAAPI) (codec h264)
 A....D aac                  AAC (Advanced Audio Coding)
";

    fn listed() -> Vec<String> {
        parse_encoder_list(ENCODERS_OUTPUT)
    }

    #[test]
    fn test_parse_encoder_list_skips_legend() {
        assert_eq!(listed(), vec!["libx264", "h264_nvenc", "h264_vaapi", "aac"]);
    }

    #[test]
    fn test_candidates_prefer_hardware_order() {
        let names: Vec<String> = encoder_candidates(&listed(), None, false)
            .into_iter()
            .map(|c| c.video_encoder)
            .collect();
        assert_eq!(names, vec!["h264_nvenc", "h264_vaapi"]);
    }

    #[test]
    fn test_candidates_honor_preference_and_software_flag() {
        let candidates = encoder_candidates(&listed(), Some("h264_vaapi"), true);
        assert_eq!(candidates[0].video_encoder, "h264_vaapi");
        assert_eq!(candidates[1].video_encoder, "h264_nvenc");
        assert_eq!(
            candidates.last(),
            Some(&EncoderCapabilities {
                video_encoder: "libx264".to_string(),
                hardware: false,
            })
        );

        // A software preference is ignored unless software is allowed.
        let strict = encoder_candidates(&listed(), Some("libx264"), false);
        assert!(strict.iter().all(|c| c.hardware));
    }

    #[test]
    fn test_no_candidates_without_hardware() {
        let only_software = vec!["libx264".to_string(), "aac".to_string()];
        assert!(encoder_candidates(&only_software, None, false).is_empty());
    }

    #[test]
    fn test_video_encoder_args() {
        let config = VideoEncoderConfig {
            encoder: "h264_vaapi".to_string(),
            width: 1280,
            height: 720,
            fps: 30,
            bitrate: 1280 * 720 * 2,
            keyframe_interval: 60,
        };
        let args = video_encoder_args(&config);
        let joined = args.join(" ");
        assert!(joined.starts_with("-vaapi_device /dev/dri/renderD128 -f rawvideo -pix_fmt rgba"));
        assert!(joined.contains("-s 1280x720 -framerate 30 -i pipe:0"));
        assert!(joined.contains("-vf format=nv12,hwupload -c:v h264_vaapi"));
        assert!(joined.contains("-b:v 1843200 -g 60"));
        assert!(args.contains(&"expr:eq(mod(n,60),0)".to_string()));
        assert!(joined.ends_with("-f h264 pipe:1"));
    }

    #[test]
    fn test_software_args_use_yuv420p() {
        let config = VideoEncoderConfig {
            encoder: "libx264".to_string(),
            width: 640,
            height: 360,
            fps: 30,
            bitrate: 460_800,
            keyframe_interval: 60,
        };
        let joined = video_encoder_args(&config).join(" ");
        assert!(joined.contains("-c:v libx264 -profile:v baseline -pix_fmt yuv420p"));
        assert!(!joined.contains("-vf"));
    }

    #[test]
    fn test_audio_encoder_args() {
        let args = audio_encoder_args(&AudioEncoderConfig {
            sample_rate: 44_100,
            channels: 2,
            bitrate: 128_000,
        });
        assert_eq!(
            args.join(" "),
            "-f f32le -ar 44100 -ac 2 -i pipe:0 -c:a aac -b:a 128000 -f adts pipe:1"
        );
    }

    #[test]
    fn test_parse_probe_output() {
        let json = r#"{
            "streams": [
                {"index": 0, "codec_type": "video", "width": 1919, "height": 1081, "duration": "3.000000"},
                {"index": 1, "codec_type": "audio", "sample_rate": "48000"}
            ],
            "format": {"duration": "3.021333"}
        }"#;
        let meta = parse_probe_output(json).unwrap();
        assert_eq!(meta.width, 1919);
        assert_eq!(meta.height, 1081);
        assert!((meta.duration_secs - 3.021333).abs() < 1e-9);
        assert!(meta.has_audio);
    }

    #[test]
    fn test_parse_probe_without_video_fails() {
        let json = r#"{"streams": [{"codec_type": "audio"}], "format": {"duration": "1.0"}}"#;
        assert!(matches!(
            parse_probe_output(json),
            Err(SubgeniusError::Decode { .. })
        ));
    }

    #[test]
    fn test_parse_probe_falls_back_to_stream_duration() {
        let json = r#"{"streams": [{"codec_type": "video", "width": 640, "height": 480, "duration": "2.5"}]}"#;
        let meta = parse_probe_output(json).unwrap();
        assert_eq!(meta.duration_secs, 2.5);
        assert!(!meta.has_audio);
    }

    #[test]
    fn test_stderr_tail_is_bounded() {
        let long = vec![b'x'; STDERR_TAIL_BYTES * 2];
        assert_eq!(tail(&long).len(), STDERR_TAIL_BYTES);
    }
}
