//! SubGenius Render Engine
//!
//! Burns captions into video frames and drives the export pipeline that
//! turns a source video plus a caption list into an MP4 artifact.
//!
//! # Pipeline Architecture
//!
//! ```text
//! source.mp4 ──► FrameSource (seek i/30) ──┐
//!                                          ├── Compositor (active captions at i/30)
//! captions + style ────────────────────────┘         │
//!                                                    ▼
//!                                      VideoEncoder (H.264, GOP 60)
//!                                                    │
//! source audio ──► f32 PCM ──► AudioEncoder (AAC) ───┤
//!                                                    ▼
//!                                               Muxer (MP4)
//!                                                    │
//!                                                    ▼
//!                                     video_legendado_<unix-ms>.mp4
//! ```

pub mod backend;
pub mod compositor;
pub mod export;
pub mod font;
pub mod preview;

pub use export::*;
