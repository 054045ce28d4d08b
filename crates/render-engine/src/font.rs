//! Font lookup and glyph outlines for caption text.
//!
//! Captions are drawn bold in the style's font family, falling back to Arial
//! and then to any sans-serif face installed on the system. When no system
//! font can be loaded, a built-in box face stands in: every visible character
//! becomes a solid cell. It keeps exports working on headless machines and
//! gives tests pixel-stable output.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tiny_skia::{PathBuilder, Rect};

/// Family tried after the requested one.
const FALLBACK_FAMILY: &str = "Arial";

/// Box face advance per character, in ems.
const BOX_ADVANCE_EM: f32 = 0.6;
/// Box face cell size, in ems.
const BOX_CELL_WIDTH_EM: f32 = 0.5;
const BOX_CELL_HEIGHT_EM: f32 = 0.7;
const BOX_ASCENT_EM: f32 = 0.8;
const BOX_DESCENT_EM: f32 = 0.2;

/// A face that can measure and outline caption text.
#[derive(Debug, Clone)]
pub enum FontFace {
    /// A TrueType/OpenType face loaded from the system.
    Outline(Arc<OutlineFont>),
    /// Built-in solid-cell face.
    Boxes,
}

/// Vertical metrics in pixels at a given size. Both values are positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerticalMetrics {
    pub ascent: f32,
    pub descent: f32,
}

/// Raw font data plus the metrics needed for layout.
pub struct OutlineFont {
    family: String,
    data: Vec<u8>,
    index: u32,
    units_per_em: f32,
    ascender: f32,
    descender: f32,
}

impl std::fmt::Debug for OutlineFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutlineFont")
            .field("family", &self.family)
            .field("index", &self.index)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl OutlineFont {
    /// Validate font data and capture its metrics.
    pub fn from_data(family: impl Into<String>, data: Vec<u8>, index: u32) -> Option<Self> {
        let face = ttf_parser::Face::parse(&data, index).ok()?;
        let units_per_em = f32::from(face.units_per_em());
        if units_per_em <= 0.0 {
            return None;
        }
        let ascender = f32::from(face.ascender());
        let descender = f32::from(face.descender());
        Some(Self {
            family: family.into(),
            data,
            index,
            units_per_em,
            ascender,
            descender,
        })
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    fn face(&self) -> Option<ttf_parser::Face<'_>> {
        ttf_parser::Face::parse(&self.data, self.index).ok()
    }
}

impl FontFace {
    /// Advance width of `text` in pixels at `size_px`.
    pub fn measure(&self, text: &str, size_px: f32) -> f32 {
        match self {
            Self::Boxes => text.chars().count() as f32 * BOX_ADVANCE_EM * size_px,
            Self::Outline(font) => {
                let Some(face) = font.face() else {
                    return 0.0;
                };
                let scale = size_px / font.units_per_em;
                text.chars()
                    .map(|c| {
                        let glyph = face.glyph_index(c).unwrap_or(ttf_parser::GlyphId(0));
                        f32::from(face.glyph_hor_advance(glyph).unwrap_or(0)) * scale
                    })
                    .sum()
            }
        }
    }

    pub fn vertical_metrics(&self, size_px: f32) -> VerticalMetrics {
        match self {
            Self::Boxes => VerticalMetrics {
                ascent: BOX_ASCENT_EM * size_px,
                descent: BOX_DESCENT_EM * size_px,
            },
            Self::Outline(font) => {
                let scale = size_px / font.units_per_em;
                VerticalMetrics {
                    ascent: font.ascender * scale,
                    descent: -font.descender * scale,
                }
            }
        }
    }

    /// Append the outline of `text` to `builder`, starting at `x` with the
    /// alphabetic baseline at `baseline`.
    pub fn outline_text(
        &self,
        builder: &mut PathBuilder,
        text: &str,
        size_px: f32,
        x: f32,
        baseline: f32,
    ) {
        match self {
            Self::Boxes => {
                let advance = BOX_ADVANCE_EM * size_px;
                let cell_w = BOX_CELL_WIDTH_EM * size_px;
                let cell_h = BOX_CELL_HEIGHT_EM * size_px;
                let inset = (advance - cell_w) / 2.0;
                for (i, c) in text.chars().enumerate() {
                    if c.is_whitespace() {
                        continue;
                    }
                    let left = x + i as f32 * advance + inset;
                    if let Some(cell) = Rect::from_xywh(left, baseline - cell_h, cell_w, cell_h) {
                        builder.push_rect(cell);
                    }
                }
            }
            Self::Outline(font) => {
                let Some(face) = font.face() else {
                    return;
                };
                let scale = size_px / font.units_per_em;
                let mut pen_x = x;
                for c in text.chars() {
                    let glyph = face.glyph_index(c).unwrap_or(ttf_parser::GlyphId(0));
                    let mut sink = GlyphSink {
                        builder: &mut *builder,
                        scale,
                        origin_x: pen_x,
                        origin_y: baseline,
                    };
                    face.outline_glyph(glyph, &mut sink);
                    pen_x += f32::from(face.glyph_hor_advance(glyph).unwrap_or(0)) * scale;
                }
            }
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Boxes)
    }
}

/// Places font-unit outlines into pixel space (y grows downward).
struct GlyphSink<'a> {
    builder: &'a mut PathBuilder,
    scale: f32,
    origin_x: f32,
    origin_y: f32,
}

impl GlyphSink<'_> {
    fn map(&self, x: f32, y: f32) -> (f32, f32) {
        (self.origin_x + x * self.scale, self.origin_y - y * self.scale)
    }
}

impl ttf_parser::OutlineBuilder for GlyphSink<'_> {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x, y) = self.map(x, y);
        self.builder.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x2, y2) = self.map(x2, y2);
        let (x, y) = self.map(x, y);
        self.builder.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

/// Resolves font families to faces, caching each family once.
pub struct FontResolver {
    db: Option<fontdb::Database>,
    cache: Mutex<HashMap<String, FontFace>>,
}

impl FontResolver {
    /// Resolver backed by the fonts installed on this machine.
    pub fn system() -> Self {
        let mut db = fontdb::Database::new();
        db.load_system_fonts();
        tracing::debug!(faces = db.len(), "Loaded system fonts");
        Self {
            db: Some(db),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolver that always yields the built-in box face.
    pub fn boxes_only() -> Self {
        Self {
            db: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Bold face for `family`, else bold Arial, else any bold sans-serif,
    /// else the box face.
    pub fn resolve(&self, family: &str) -> FontFace {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(face) = cache.get(family) {
            return face.clone();
        }

        let face = self
            .load(family)
            .map(|font| FontFace::Outline(Arc::new(font)))
            .unwrap_or_else(|| {
                if self.db.is_some() {
                    tracing::warn!(
                        family,
                        "No usable system font, drawing captions with box glyphs"
                    );
                }
                FontFace::Boxes
            });
        cache.insert(family.to_string(), face.clone());
        face
    }

    fn load(&self, family: &str) -> Option<OutlineFont> {
        let db = self.db.as_ref()?;
        let families = [
            fontdb::Family::Name(family),
            fontdb::Family::Name(FALLBACK_FAMILY),
            fontdb::Family::SansSerif,
        ];
        let query = fontdb::Query {
            families: &families,
            weight: fontdb::Weight::BOLD,
            stretch: fontdb::Stretch::Normal,
            style: fontdb::Style::Normal,
        };
        let id = db.query(&query)?;
        let resolved = db
            .face(id)
            .and_then(|info| info.families.first().map(|(name, _)| name.clone()))
            .unwrap_or_else(|| family.to_string());
        let font = db.with_face_data(id, |data, index| {
            OutlineFont::from_data(resolved.clone(), data.to_vec(), index)
        })??;
        tracing::debug!(requested = family, resolved = %font.family(), "Resolved caption font");
        Some(font)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_face_measures_per_character() {
        let face = FontFace::Boxes;
        assert!((face.measure("Hi", 20.0) - 24.0).abs() < 1e-4);
        assert_eq!(face.measure("", 20.0), 0.0);
    }

    #[test]
    fn test_box_face_skips_whitespace_cells() {
        let face = FontFace::Boxes;
        let mut builder = PathBuilder::new();
        face.outline_text(&mut builder, "   ", 20.0, 0.0, 20.0);
        assert!(builder.finish().is_none());

        let mut builder = PathBuilder::new();
        face.outline_text(&mut builder, "a b", 20.0, 10.0, 50.0);
        let bounds = builder.finish().unwrap().bounds();
        // First cell inset by 1px, last cell ends 1px before the third advance.
        assert!((bounds.left() - 11.0).abs() < 1e-4);
        assert!((bounds.right() - 45.0).abs() < 1e-4);
        assert!((bounds.bottom() - 50.0).abs() < 1e-4);
        assert!((bounds.top() - 36.0).abs() < 1e-4);
    }

    #[test]
    fn test_boxes_only_resolver_never_loads_fonts() {
        let resolver = FontResolver::boxes_only();
        assert!(resolver.resolve("Roboto").is_fallback());
        assert!(resolver.resolve("Roboto").is_fallback());
    }

    #[test]
    fn test_rejects_invalid_font_data() {
        assert!(OutlineFont::from_data("Broken", vec![0, 1, 2, 3], 0).is_none());
    }
}
