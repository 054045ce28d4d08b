//! Media backend seams used by the export pipeline.
//!
//! The pipeline owns the frame loop (seek, composite, encode, report) and
//! talks to decoding, encoding and muxing only through these traits. The
//! production implementation drives ffmpeg subprocesses; tests substitute
//! in-memory fakes.

pub mod ffmpeg;

use std::path::Path;
use std::sync::Arc;

use subgenius_common::error::SubgeniusResult;

pub use ffmpeg::FfmpegBackend;

/// Result of probing the encoder stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderCapabilities {
    /// Encoder identifier handed back in [`VideoEncoderConfig::encoder`].
    pub video_encoder: String,

    /// Whether the encoder is hardware accelerated.
    pub hardware: bool,
}

/// Source container facts needed to plan an export.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMetadata {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub has_audio: bool,
}

/// A decoded frame request: frame `index` at `time_secs`, scaled to
/// `width` x `height` RGBA.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRequest {
    pub index: u64,
    pub time_secs: f64,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// A composited RGBA frame ready for encoding.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub index: u64,
    pub timestamp_us: u64,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Interleaved 32-bit float PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioBuffer {
    /// Silence covering `duration_secs`.
    pub fn silence(duration_secs: f64, sample_rate: u32, channels: u16) -> Self {
        let frames = if duration_secs.is_finite() && duration_secs > 0.0 {
            (duration_secs * sample_rate as f64).round() as usize
        } else {
            0
        };
        Self {
            sample_rate,
            channels,
            samples: vec![0.0; frames * channels as usize],
        }
    }

    /// Samples per channel.
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 / self.sample_rate as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

/// Encoded bytes for one muxer track.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedChunk {
    pub track: TrackKind,
    pub data: Vec<u8>,
    /// Presentation timestamp, when the encoder reports one.
    pub timestamp_us: Option<u64>,
    pub is_key: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoEncoderConfig {
    pub encoder: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate: u64,
    pub keyframe_interval: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioEncoderConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MuxerConfig {
    pub video: VideoEncoderConfig,
    pub audio: AudioEncoderConfig,
}

/// Shared handle through which encoders deliver chunks to the muxer.
#[derive(Clone)]
pub struct TrackSink {
    track: TrackKind,
    muxer: Arc<tokio::sync::Mutex<Box<dyn Muxer>>>,
}

impl TrackSink {
    pub fn new(track: TrackKind, muxer: Arc<tokio::sync::Mutex<Box<dyn Muxer>>>) -> Self {
        Self { track, muxer }
    }

    pub fn track(&self) -> TrackKind {
        self.track
    }

    /// Append encoded bytes to this sink's track.
    pub async fn push(
        &self,
        data: Vec<u8>,
        timestamp_us: Option<u64>,
        is_key: bool,
    ) -> SubgeniusResult<()> {
        self.muxer.lock().await.add_chunk(EncodedChunk {
            track: self.track,
            data,
            timestamp_us,
            is_key,
        })
    }
}

/// Factory for every media component an export needs.
#[async_trait::async_trait]
pub trait MediaBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Find a usable H.264 encoder. Fails with a capability error when none
    /// is available.
    async fn probe_capabilities(&self) -> SubgeniusResult<EncoderCapabilities>;

    /// Open `path` for frame-accurate decoding.
    async fn open_source(&self, path: &Path) -> SubgeniusResult<Box<dyn FrameSource>>;

    /// Decode the whole audio track of `path`, resampled to the requested
    /// layout.
    async fn decode_audio(
        &self,
        path: &Path,
        sample_rate: u32,
        channels: u16,
    ) -> SubgeniusResult<AudioBuffer>;

    fn create_muxer(&self, config: &MuxerConfig) -> SubgeniusResult<Box<dyn Muxer>>;

    async fn create_video_encoder(
        &self,
        config: &VideoEncoderConfig,
        sink: TrackSink,
    ) -> SubgeniusResult<Box<dyn VideoEncoder>>;

    async fn create_audio_encoder(
        &self,
        config: &AudioEncoderConfig,
        sink: TrackSink,
    ) -> SubgeniusResult<Box<dyn AudioEncoder>>;
}

/// A seekable decoded video source.
#[async_trait::async_trait]
pub trait FrameSource: Send {
    /// Resolve once the container's duration and dimensions are known.
    async fn metadata(&mut self) -> SubgeniusResult<SourceMetadata>;

    /// Seek to `request.time_secs` and write the RGBA frame shown there
    /// into `target` (`width * height * 4` bytes).
    async fn seek_frame(&mut self, request: &FrameRequest, target: &mut [u8])
        -> SubgeniusResult<()>;

    /// Free decoder resources. Called exactly once, also after failures.
    async fn release(&mut self);
}

#[async_trait::async_trait]
pub trait VideoEncoder: Send {
    /// Frames submitted but not yet consumed by the encoder.
    fn queue_depth(&self) -> usize;

    /// Submit one frame. Ownership passes to the encoder.
    ///
    /// `keyframe` is advisory. Encoders with a fixed GOP (the ffmpeg
    /// backend forces a keyframe every `keyframe_interval` frames) may
    /// place keyframes themselves and only log a mismatching request.
    async fn encode(&mut self, frame: VideoFrame, keyframe: bool) -> SubgeniusResult<()>;

    /// Wait until every submitted frame has been consumed.
    async fn flush(&mut self) -> SubgeniusResult<()>;

    /// Flush, end the stream and deliver all remaining chunks to the sink.
    async fn finish(&mut self) -> SubgeniusResult<()>;
}

#[async_trait::async_trait]
pub trait AudioEncoder: Send {
    async fn encode(&mut self, audio: AudioBuffer, timestamp_us: u64) -> SubgeniusResult<()>;

    /// End the stream and deliver all remaining chunks to the sink.
    async fn finish(&mut self) -> SubgeniusResult<()>;
}

/// In-memory MP4 assembly.
#[async_trait::async_trait]
pub trait Muxer: Send {
    fn add_chunk(&mut self, chunk: EncodedChunk) -> SubgeniusResult<()>;

    /// Write the container and return its bytes.
    async fn finalize(&mut self) -> SubgeniusResult<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_matches_duration() {
        let silence = AudioBuffer::silence(2.0, 44_100, 2);
        assert_eq!(silence.frames(), 88_200);
        assert_eq!(silence.samples.len(), 176_400);
        assert!(silence.samples.iter().all(|s| *s == 0.0));
        assert!((silence.duration_secs() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_silence_for_invalid_duration_is_empty() {
        assert!(AudioBuffer::silence(f64::NAN, 44_100, 2).samples.is_empty());
        assert!(AudioBuffer::silence(-1.0, 44_100, 2).samples.is_empty());
    }
}
