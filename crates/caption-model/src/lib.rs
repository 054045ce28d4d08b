//! SubGenius Caption Model
//!
//! Defines the core data contracts shared by the editor, the renderer,
//! and the exchange codecs:
//! - **Captions:** Timed text records kept sorted by start time
//! - **Style:** The single caption style applied to every record
//! - **Lint:** Advisory checks that never block rendering or export
//!
//! All times are in seconds. A caption is active on the closed interval
//! `[start_time, end_time]`.

pub mod caption;
pub mod lint;
pub mod style;
pub mod time;

pub use caption::*;
pub use lint::*;
pub use style::*;

/// Errors raised by the caption model.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("No caption with id {id}")]
    UnknownCaption { id: String },

    #[error("Invalid color {value:?}: expected #RRGGBB")]
    InvalidColor { value: String },

    #[error("Invalid time {value:?}")]
    InvalidTime { value: String },
}
