//! SubGenius Common Utilities
//!
//! Shared infrastructure for all SubGenius crates:
//! - Error types and result aliases
//! - Frame clock and progress cadence for the export loop
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
