use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use subgenius_caption_model::{CaptionRecord, StyleConfig};
use subgenius_common::clock::FrameClock;
use subgenius_common::error::{SubgeniusError, SubgeniusResult};
use subgenius_render_engine::backend::{
    AudioBuffer, AudioEncoder, AudioEncoderConfig, EncodedChunk, EncoderCapabilities,
    FrameRequest, FrameSource, MediaBackend, Muxer, MuxerConfig, SourceMetadata, TrackKind,
    TrackSink, VideoEncoder, VideoEncoderConfig, VideoFrame,
};
use subgenius_render_engine::font::{FontFace, FontResolver};
use subgenius_render_engine::preview::{render_still, StillRequest};
use subgenius_render_engine::{
    AbortHandle, ExportJob, ExportPipeline, ExportRequest, ExportState, ExportStatus,
    PipelineOptions,
};
use tokio::sync::watch;

const BASE_PIXEL: [u8; 4] = [40, 80, 120, 255];

#[derive(Debug, Clone)]
struct Submitted {
    index: u64,
    timestamp_us: u64,
    keyframe: bool,
    depth: usize,
    width: u32,
    height: u32,
    has_overlay: bool,
}

#[derive(Debug, Default)]
struct Record {
    opened: usize,
    released: usize,
    muxers: usize,
    audio_decodes: usize,
    seeks: Vec<u64>,
    submitted: Vec<Submitted>,
    flushes: usize,
    audio_units: Vec<(usize, u64)>,
    video_chunk_timestamps: Vec<u64>,
    progress_seen: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Scenario {
    metadata: SourceMetadata,
    hardware: bool,
    hang_metadata: bool,
    fail_encode_at: Option<u64>,
    abort_at: Option<u64>,
}

impl Scenario {
    fn three_seconds() -> Self {
        Self {
            metadata: SourceMetadata {
                duration_secs: 3.0,
                width: 321,
                height: 241,
                has_audio: true,
            },
            hardware: true,
            hang_metadata: false,
            fail_encode_at: None,
            abort_at: None,
        }
    }
}

#[derive(Clone)]
struct MockBackend {
    scenario: Scenario,
    record: Arc<Mutex<Record>>,
    progress: Option<watch::Receiver<ExportState>>,
    abort: Option<AbortHandle>,
}

impl MockBackend {
    fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            record: Arc::new(Mutex::new(Record::default())),
            progress: None,
            abort: None,
        }
    }

    /// Let the encoder see the job's progress and trigger its abort handle.
    fn observing(mut self, job: &ExportJob) -> Self {
        self.progress = Some(job.subscribe());
        self.abort = Some(job.abort_handle());
        self
    }
}

#[async_trait::async_trait]
impl MediaBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn probe_capabilities(&self) -> SubgeniusResult<EncoderCapabilities> {
        tokio::task::yield_now().await;
        Ok(EncoderCapabilities {
            video_encoder: if self.scenario.hardware {
                "mock_h264".to_string()
            } else {
                "mock_soft_h264".to_string()
            },
            hardware: self.scenario.hardware,
        })
    }

    async fn open_source(&self, _path: &Path) -> SubgeniusResult<Box<dyn FrameSource>> {
        self.record.lock().unwrap().opened += 1;
        Ok(Box::new(MockSource {
            scenario: self.scenario.clone(),
            record: self.record.clone(),
        }))
    }

    async fn decode_audio(
        &self,
        _path: &Path,
        sample_rate: u32,
        channels: u16,
    ) -> SubgeniusResult<AudioBuffer> {
        self.record.lock().unwrap().audio_decodes += 1;
        let frames = (self.scenario.metadata.duration_secs * sample_rate as f64) as usize;
        Ok(AudioBuffer {
            sample_rate,
            channels,
            samples: vec![0.25; frames * channels as usize],
        })
    }

    fn create_muxer(&self, _config: &MuxerConfig) -> SubgeniusResult<Box<dyn Muxer>> {
        self.record.lock().unwrap().muxers += 1;
        Ok(Box::new(MockMuxer {
            record: self.record.clone(),
            chunks: 0,
        }))
    }

    async fn create_video_encoder(
        &self,
        _config: &VideoEncoderConfig,
        sink: TrackSink,
    ) -> SubgeniusResult<Box<dyn VideoEncoder>> {
        Ok(Box::new(MockVideoEncoder {
            record: self.record.clone(),
            sink,
            depth: 0,
            fail_at: self.scenario.fail_encode_at,
            abort_at: self.scenario.abort_at.zip(self.abort.clone()),
            progress: self.progress.clone(),
        }))
    }

    async fn create_audio_encoder(
        &self,
        _config: &AudioEncoderConfig,
        sink: TrackSink,
    ) -> SubgeniusResult<Box<dyn AudioEncoder>> {
        Ok(Box::new(MockAudioEncoder {
            record: self.record.clone(),
            sink,
        }))
    }
}

struct MockSource {
    scenario: Scenario,
    record: Arc<Mutex<Record>>,
}

#[async_trait::async_trait]
impl FrameSource for MockSource {
    async fn metadata(&mut self) -> SubgeniusResult<SourceMetadata> {
        if self.scenario.hang_metadata {
            std::future::pending::<()>().await;
        }
        Ok(self.scenario.metadata.clone())
    }

    async fn seek_frame(
        &mut self,
        request: &FrameRequest,
        target: &mut [u8],
    ) -> SubgeniusResult<()> {
        self.record.lock().unwrap().seeks.push(request.index);
        for px in target.chunks_exact_mut(4) {
            px.copy_from_slice(&BASE_PIXEL);
        }
        Ok(())
    }

    async fn release(&mut self) {
        self.record.lock().unwrap().released += 1;
    }
}

struct MockVideoEncoder {
    record: Arc<Mutex<Record>>,
    sink: TrackSink,
    depth: usize,
    fail_at: Option<u64>,
    abort_at: Option<(u64, AbortHandle)>,
    progress: Option<watch::Receiver<ExportState>>,
}

#[async_trait::async_trait]
impl VideoEncoder for MockVideoEncoder {
    fn queue_depth(&self) -> usize {
        self.depth
    }

    async fn encode(&mut self, frame: VideoFrame, keyframe: bool) -> SubgeniusResult<()> {
        if self.fail_at == Some(frame.index) {
            return Err(SubgeniusError::encode(format!(
                "mock encoder rejected frame {}",
                frame.index
            )));
        }

        let has_overlay = frame
            .data
            .chunks_exact(4)
            .any(|px| px != BASE_PIXEL.as_slice());
        let progress = self.progress.as_ref().map(|rx| rx.borrow().progress);
        {
            let mut record = self.record.lock().unwrap();
            record.submitted.push(Submitted {
                index: frame.index,
                timestamp_us: frame.timestamp_us,
                keyframe,
                depth: self.depth,
                width: frame.width,
                height: frame.height,
                has_overlay,
            });
            if let Some(progress) = progress {
                record.progress_seen.push(progress);
            }
        }
        self.depth += 1;

        if let Some((at, handle)) = &self.abort_at {
            if *at == frame.index {
                handle.abort();
            }
        }

        self.sink
            .push(vec![0u8; 16], Some(frame.timestamp_us), keyframe)
            .await
    }

    async fn flush(&mut self) -> SubgeniusResult<()> {
        self.record.lock().unwrap().flushes += 1;
        self.depth = 0;
        Ok(())
    }

    async fn finish(&mut self) -> SubgeniusResult<()> {
        self.depth = 0;
        Ok(())
    }
}

struct MockAudioEncoder {
    record: Arc<Mutex<Record>>,
    sink: TrackSink,
}

#[async_trait::async_trait]
impl AudioEncoder for MockAudioEncoder {
    async fn encode(&mut self, audio: AudioBuffer, timestamp_us: u64) -> SubgeniusResult<()> {
        self.record
            .lock()
            .unwrap()
            .audio_units
            .push((audio.samples.len(), timestamp_us));
        self.sink.push(vec![1u8; 8], Some(timestamp_us), true).await
    }

    async fn finish(&mut self) -> SubgeniusResult<()> {
        Ok(())
    }
}

struct MockMuxer {
    record: Arc<Mutex<Record>>,
    chunks: usize,
}

#[async_trait::async_trait]
impl Muxer for MockMuxer {
    fn add_chunk(&mut self, chunk: EncodedChunk) -> SubgeniusResult<()> {
        self.chunks += 1;
        if chunk.track == TrackKind::Video {
            if let Some(ts) = chunk.timestamp_us {
                self.record.lock().unwrap().video_chunk_timestamps.push(ts);
            }
        }
        Ok(())
    }

    async fn finalize(&mut self) -> SubgeniusResult<Vec<u8>> {
        Ok(format!("mp4:{}", self.chunks).into_bytes())
    }
}

fn pipeline(backend: MockBackend) -> ExportPipeline<MockBackend> {
    let options = PipelineOptions {
        metadata_timeout: Duration::from_millis(50),
        seek_timeout: Duration::from_millis(50),
        ..PipelineOptions::default()
    };
    ExportPipeline::new(backend, options, FontResolver::boxes_only())
}

fn request() -> ExportRequest {
    ExportRequest {
        source: PathBuf::from("input.mp4"),
        captions: vec![CaptionRecord::new("1", 0.5, 1.0, "Hi\nThere")],
        style: StyleConfig::default(),
    }
}

fn record(backend: &MockBackend) -> std::sync::MutexGuard<'_, Record> {
    backend.record.lock().unwrap()
}

#[tokio::test]
async fn ninety_frame_export_follows_frame_schedule() {
    let job = ExportJob::default();
    let backend = MockBackend::new(Scenario::three_seconds()).observing(&job);
    let pipeline = pipeline(backend.clone());

    let artifact = pipeline.export(&request(), &job).await.unwrap();

    assert_eq!(artifact.mime_type, "video/mp4");
    assert!(artifact.file_name.starts_with("video_legendado_"));
    assert!(artifact.file_name.ends_with(".mp4"));
    assert_eq!((artifact.width, artifact.height), (320, 240));
    assert_eq!(artifact.frame_count, 90);
    // 90 video chunks plus one audio chunk reached the muxer.
    assert_eq!(artifact.bytes, b"mp4:91".to_vec());

    let rec = record(&backend);
    assert_eq!(rec.submitted.len(), 90);
    assert_eq!(rec.seeks, (0..90).collect::<Vec<u64>>());

    let keyframes: Vec<u64> = rec
        .submitted
        .iter()
        .filter(|s| s.keyframe)
        .map(|s| s.index)
        .collect();
    assert_eq!(keyframes, vec![0, 60]);

    assert_eq!(rec.submitted[1].timestamp_us, 33_333);
    assert_eq!(rec.submitted[89].timestamp_us, 2_966_666);
    assert!(rec
        .submitted
        .iter()
        .all(|s| (s.width, s.height) == (320, 240)));

    // Progress as seen by the encoder when the next frame arrives.
    let mut progress = rec.progress_seen.clone();
    progress.dedup();
    assert_eq!(progress, vec![0, 17, 33, 50, 67, 83]);

    assert_eq!(rec.audio_decodes, 1);
    assert_eq!(rec.audio_units, vec![(3 * 44_100 * 2, 0)]);
    assert_eq!(rec.released, 1);
    drop(rec);

    let state = job.snapshot();
    assert_eq!(state.status, ExportStatus::Ready);
    assert_eq!(state.progress, 100);
    assert_eq!(state.frames_submitted, 90);
    assert_eq!(state.total_frames, 90);
    assert_eq!(state.log.len(), 11);
    assert_eq!(state.log[0], "Export complete");
    let rendering: Vec<&str> = state
        .log
        .iter()
        .filter(|l| l.starts_with("Rendering frame"))
        .map(String::as_str)
        .collect();
    assert_eq!(
        rendering,
        vec![
            "Rendering frame 75/90",
            "Rendering frame 60/90",
            "Rendering frame 45/90",
            "Rendering frame 30/90",
            "Rendering frame 15/90",
            "Rendering frame 0/90",
        ]
    );
    assert!(!pipeline.is_busy());
}

#[tokio::test]
async fn encoder_queue_never_exceeds_threshold_at_submission() {
    let job = ExportJob::default();
    let backend = MockBackend::new(Scenario::three_seconds());
    pipeline(backend.clone())
        .export(&request(), &job)
        .await
        .unwrap();

    let rec = record(&backend);
    assert!(rec.submitted.iter().all(|s| s.depth <= 2));
    assert!(rec.flushes > 0);
    assert!(rec
        .video_chunk_timestamps
        .windows(2)
        .all(|pair| pair[0] < pair[1]));
}

#[tokio::test]
async fn captions_are_burned_only_while_active() {
    let job = ExportJob::default();
    let backend = MockBackend::new(Scenario::three_seconds());
    pipeline(backend.clone())
        .export(&request(), &job)
        .await
        .unwrap();

    let rec = record(&backend);
    // Caption spans [0.5, 1.0]: frames 15..=30 at 30 fps.
    for s in &rec.submitted {
        assert_eq!(s.has_overlay, (15..=30).contains(&s.index), "frame {}", s.index);
    }
}

#[tokio::test]
async fn missing_hardware_encoder_fails_before_allocation() {
    let job = ExportJob::default();
    let backend = MockBackend::new(Scenario {
        hardware: false,
        ..Scenario::three_seconds()
    });

    let err = pipeline(backend.clone())
        .export(&request(), &job)
        .await
        .unwrap_err();
    assert!(matches!(err, SubgeniusError::Capability { .. }));

    let rec = record(&backend);
    assert_eq!(rec.opened, 0);
    assert_eq!(rec.muxers, 0);
    drop(rec);

    let state = job.snapshot();
    assert_eq!(state.status, ExportStatus::Error);
    assert_eq!(state.message, err.to_string());
}

#[tokio::test]
async fn software_encoder_is_used_when_allowed() {
    let job = ExportJob::default();
    let backend = MockBackend::new(Scenario {
        hardware: false,
        ..Scenario::three_seconds()
    });
    let options = PipelineOptions {
        allow_software_encoder: true,
        ..PipelineOptions::default()
    };
    let pipeline = ExportPipeline::new(backend, options, FontResolver::boxes_only());
    assert!(pipeline.export(&request(), &job).await.is_ok());
}

#[tokio::test]
async fn empty_caption_list_is_rejected() {
    let job = ExportJob::default();
    let backend = MockBackend::new(Scenario::three_seconds());
    let request = ExportRequest {
        captions: Vec::new(),
        ..request()
    };

    let err = pipeline(backend.clone())
        .export(&request, &job)
        .await
        .unwrap_err();
    assert!(matches!(err, SubgeniusError::Validation { .. }));
    assert_eq!(record(&backend).opened, 0);
}

#[tokio::test]
async fn concurrent_export_is_rejected_as_busy() {
    let backend = MockBackend::new(Scenario::three_seconds());
    let pipeline = pipeline(backend);
    let first_job = ExportJob::default();
    let second_job = ExportJob::default();

    let (first_request, second_request) = (request(), request());

    let (first, second) = tokio::join!(
        pipeline.export(&first_request, &first_job),
        pipeline.export(&second_request, &second_job),
    );

    let outcomes = [(first, &first_job), (second, &second_job)];
    let busy: Vec<&ExportJob> = outcomes
        .iter()
        .filter(|(result, _)| matches!(result, Err(SubgeniusError::Busy)))
        .map(|(_, job)| *job)
        .collect();
    assert_eq!(busy.len(), 1);
    assert!(outcomes.iter().any(|(result, _)| result.is_ok()));
    // The rejected job was never started.
    assert_eq!(busy[0].status(), ExportStatus::Idle);

    // The guard is released once the first export ends.
    let third_job = ExportJob::default();
    assert!(pipeline.export(&request(), &third_job).await.is_ok());
}

#[tokio::test]
async fn encoder_failure_moves_job_to_error_and_releases_source() {
    let job = ExportJob::default();
    let backend = MockBackend::new(Scenario {
        fail_encode_at: Some(10),
        ..Scenario::three_seconds()
    });

    let err = pipeline(backend.clone())
        .export(&request(), &job)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Encode error: mock encoder rejected frame 10");

    let rec = record(&backend);
    assert_eq!(rec.submitted.len(), 10);
    assert_eq!(rec.released, 1);
    drop(rec);

    let state = job.snapshot();
    assert_eq!(state.status, ExportStatus::Error);
    assert_eq!(state.message, "Encode error: mock encoder rejected frame 10");
    assert_eq!(state.log[0], state.message);

    assert!(job.dismiss_error());
    assert_eq!(job.status(), ExportStatus::Idle);
}

#[tokio::test]
async fn metadata_deadline_produces_timeout() {
    let job = ExportJob::default();
    let backend = MockBackend::new(Scenario {
        hang_metadata: true,
        ..Scenario::three_seconds()
    });

    let err = pipeline(backend.clone())
        .export(&request(), &job)
        .await
        .unwrap_err();
    assert!(matches!(err, SubgeniusError::Timeout { .. }));
    assert!(job.snapshot().message.contains("video metadata"));
    assert_eq!(record(&backend).released, 1);
}

#[tokio::test]
async fn abort_stops_at_next_frame() {
    let job = ExportJob::default();
    let backend = MockBackend::new(Scenario {
        abort_at: Some(20),
        ..Scenario::three_seconds()
    })
    .observing(&job);

    let err = pipeline(backend.clone())
        .export(&request(), &job)
        .await
        .unwrap_err();
    assert!(matches!(err, SubgeniusError::Aborted));

    let rec = record(&backend);
    assert_eq!(rec.submitted.len(), 21);
    assert_eq!(rec.released, 1);
    drop(rec);
    assert_eq!(job.status(), ExportStatus::Error);
}

#[tokio::test]
async fn silent_source_contributes_silence() {
    let job = ExportJob::default();
    let mut scenario = Scenario::three_seconds();
    scenario.metadata.has_audio = false;
    let backend = MockBackend::new(scenario);

    pipeline(backend.clone())
        .export(&request(), &job)
        .await
        .unwrap();

    let rec = record(&backend);
    assert_eq!(rec.audio_decodes, 0);
    assert_eq!(rec.audio_units, vec![(3 * 44_100 * 2, 0)]);
}

fn still_at(request: &ExportRequest, time_secs: f64) -> StillRequest<'_> {
    StillRequest {
        source: &request.source,
        captions: &request.captions,
        style: &request.style,
        time_secs,
    }
}

#[tokio::test]
async fn still_preview_draws_active_captions() {
    let backend = MockBackend::new(Scenario::three_seconds());
    let request = request();

    let still = render_still(
        &backend,
        still_at(&request, 0.75),
        &FontFace::Boxes,
        FrameClock::new(30),
        Duration::from_millis(50),
    )
    .await
    .unwrap();

    assert_eq!((still.width(), still.height()), (320, 240));
    assert!(still.data().chunks_exact(4).any(|px| px != BASE_PIXEL));

    let rec = record(&backend);
    assert_eq!(rec.seeks, vec![22]);
    assert_eq!(rec.released, 1);
}

#[tokio::test]
async fn still_preview_outside_captions_is_plain_frame() {
    let backend = MockBackend::new(Scenario::three_seconds());
    let request = request();

    let still = render_still(
        &backend,
        still_at(&request, 2.0),
        &FontFace::Boxes,
        FrameClock::new(30),
        Duration::from_millis(50),
    )
    .await
    .unwrap();

    assert!(still.data().chunks_exact(4).all(|px| px == BASE_PIXEL));
}

#[tokio::test]
async fn still_preview_past_the_end_is_rejected() {
    let backend = MockBackend::new(Scenario::three_seconds());
    let request = request();

    let err = render_still(
        &backend,
        still_at(&request, 5.0),
        &FontFace::Boxes,
        FrameClock::new(30),
        Duration::from_millis(50),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, SubgeniusError::Validation { .. }));
    let rec = record(&backend);
    assert!(rec.seeks.is_empty());
    assert_eq!(rec.released, 1);
}
