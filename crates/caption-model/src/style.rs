//! Caption style configuration.
//!
//! A `StyleConfig` is an immutable value: edits produce a new config via
//! struct update syntax. Defaults live only in `StyleConfig::default()`,
//! which serde also uses to fill fields missing from a style file.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Font families offered by the style editor. Any other family name is
/// accepted as-is.
pub const KNOWN_FONT_FAMILIES: &[&str] = &[
    "Roboto",
    "Arial",
    "Verdana",
    "Helvetica",
    "Times New Roman",
    "Courier New",
    "Impact",
];

/// Vertical placement of the caption block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VerticalAlign {
    Top,
    Center,
    #[default]
    Bottom,
}

/// An sRGB color written as `#RRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HexColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl HexColor {
    pub const BLACK: HexColor = HexColor::new(0, 0, 0);
    pub const WHITE: HexColor = HexColor::new(0xff, 0xff, 0xff);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#RRGGBB` (the leading `#` is optional).
    pub fn parse(value: &str) -> Result<Self, ModelError> {
        let invalid = || ModelError::InvalidColor {
            value: value.to_string(),
        };
        let hex = value.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16).map_err(|_| invalid())
        };
        Ok(Self {
            r: channel(0..2)?,
            g: channel(2..4)?,
            b: channel(4..6)?,
        })
    }
}

impl fmt::Display for HexColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl TryFrom<String> for HexColor {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<HexColor> for String {
    fn from(color: HexColor) -> Self {
        color.to_string()
    }
}

/// Style applied to every caption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StyleConfig {
    /// Font size in pixels.
    pub font_size: u32,

    /// Font family name.
    pub font_family: String,

    /// Text fill color.
    pub color: HexColor,

    /// Text outline color.
    pub outline_color: HexColor,

    /// Outline thickness in pixels (stroked at twice this width).
    pub outline_width: u32,

    /// Vertical placement of the caption block.
    pub vertical_align: VerticalAlign,

    /// Distance in pixels from the bottom edge (bottom alignment) or the
    /// top edge (top alignment). Ignored when centered.
    pub bottom_margin: u32,

    /// Background box color.
    pub background_color: HexColor,

    /// Background box opacity: 0 = invisible, 255 = opaque.
    pub background_opacity: u8,

    /// Advisory per-line character limit.
    pub max_chars_per_line: usize,

    /// Advisory per-caption character limit.
    pub max_chars_per_subtitle: usize,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            font_size: 24,
            font_family: "Roboto".to_string(),
            color: HexColor::WHITE,
            outline_color: HexColor::BLACK,
            outline_width: 2,
            vertical_align: VerticalAlign::Bottom,
            bottom_margin: 30,
            background_color: HexColor::BLACK,
            background_opacity: 0,
            max_chars_per_line: 39,
            max_chars_per_subtitle: 95,
        }
    }
}

impl StyleConfig {
    /// Distance between consecutive baselines.
    pub fn line_height(&self) -> f32 {
        self.font_size as f32 * 1.25
    }

    /// Background box opacity mapped to `[0.0, 1.0]`.
    pub fn background_alpha(&self) -> f32 {
        self.background_opacity as f32 / 255.0
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load a style file; missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content).map_err(std::io::Error::other)
    }
}
