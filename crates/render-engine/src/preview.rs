//! Single-frame previews: the export compositor applied to one frame.

use std::path::Path;
use std::time::Duration;

use subgenius_caption_model::{CaptionRecord, StyleConfig};
use subgenius_common::clock::FrameClock;
use subgenius_common::error::{SubgeniusError, SubgeniusResult};
use tiny_skia::Pixmap;

use crate::backend::{FrameRequest, FrameSource, MediaBackend};
use crate::compositor::composite_captions;
use crate::export::normalize_dimensions;
use crate::font::FontFace;

/// What to show in a still preview.
#[derive(Debug, Clone, Copy)]
pub struct StillRequest<'a> {
    pub source: &'a Path,
    pub captions: &'a [CaptionRecord],
    pub style: &'a StyleConfig,
    pub time_secs: f64,
}

/// Decode the frame shown at `request.time_secs` and draw the captions
/// active then.
pub async fn render_still<B: MediaBackend>(
    backend: &B,
    request: StillRequest<'_>,
    face: &FontFace,
    clock: FrameClock,
    timeout: Duration,
) -> SubgeniusResult<Pixmap> {
    let mut handle = backend.open_source(request.source).await?;
    let result = draw_still(handle.as_mut(), request, face, clock, timeout).await;
    handle.release().await;
    result
}

async fn draw_still(
    source: &mut dyn FrameSource,
    request: StillRequest<'_>,
    face: &FontFace,
    clock: FrameClock,
    timeout: Duration,
) -> SubgeniusResult<Pixmap> {
    let time_secs = request.time_secs;
    let metadata = tokio::time::timeout(timeout, source.metadata())
        .await
        .map_err(|_| SubgeniusError::timeout("video metadata", timeout))??;
    if !(0.0..=metadata.duration_secs).contains(&time_secs) {
        return Err(SubgeniusError::validation(format!(
            "Time {time_secs:.3}s is outside the video (0 to {:.3}s)",
            metadata.duration_secs
        )));
    }

    let (width, height) = normalize_dimensions(metadata.width, metadata.height);
    let mut frame = Pixmap::new(width, height).ok_or_else(|| {
        SubgeniusError::render(format!("Cannot allocate a {width}x{height} frame"))
    })?;
    let frame_request = FrameRequest {
        index: (time_secs * clock.fps() as f64).floor() as u64,
        time_secs,
        width,
        height,
        fps: clock.fps(),
    };
    tokio::time::timeout(timeout, source.seek_frame(&frame_request, frame.data_mut()))
        .await
        .map_err(|_| SubgeniusError::timeout("preview seek", timeout))??;

    composite_captions(&mut frame, request.captions, time_secs, request.style, face);
    Ok(frame)
}
