//! Frame timing utilities for the export loop.
//!
//! Every exported frame is addressed by its integer index. Timestamps are
//! derived from the index on each use rather than accumulated, so the
//! thousandth frame lands exactly where the first one predicts.

/// Maps frame indices to source seek times and encoder timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameClock {
    fps: u32,
}

impl FrameClock {
    /// Create a clock for the given frame rate (clamped to at least 1).
    pub fn new(fps: u32) -> Self {
        Self { fps: fps.max(1) }
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Number of whole frames that fit in `duration_secs`.
    pub fn total_frames(&self, duration_secs: f64) -> u64 {
        if !duration_secs.is_finite() || duration_secs <= 0.0 {
            return 0;
        }
        (duration_secs * self.fps as f64).floor() as u64
    }

    /// Presentation time of frame `index` in seconds.
    pub fn time_secs(&self, index: u64) -> f64 {
        index as f64 / self.fps as f64
    }

    /// Encoder timestamp of frame `index` in microseconds.
    pub fn timestamp_us(&self, index: u64) -> u64 {
        index * 1_000_000 / self.fps as u64
    }

    /// Duration of one frame in microseconds.
    pub fn frame_duration_us(&self) -> u64 {
        1_000_000 / self.fps as u64
    }
}

/// Decides on which frames the export loop reports progress.
#[derive(Debug, Clone, Copy)]
pub struct ProgressCadence {
    every: u64,
}

impl ProgressCadence {
    /// Report every `every` frames (clamped to at least 1).
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
        }
    }

    /// Whether frame `index` is a reporting frame. Frame 0 always is.
    pub fn should_report(&self, index: u64) -> bool {
        index % self.every == 0
    }

    /// Rounded completion percentage in `[0, 100]`.
    pub fn percent(index: u64, total: u64) -> u8 {
        if total == 0 {
            return 100;
        }
        let pct = (index as f64 / total as f64 * 100.0).round();
        pct.clamp(0.0, 100.0) as u8
    }
}
