//! Caption compositor: draws the captions active at a timestamp onto a frame.
//!
//! Layout is computed first as a list of [`LinePlacement`] instructions and
//! then painted. The same function drives export frames and still previews,
//! so a frame and its preview always agree.
//!
//! Geometry (all in frame pixels):
//!
//! ```text
//! line height  = fontSize * 1.25
//! anchor y     = H - bottomMargin | H / 2 | bottomMargin
//! first line y = anchor - (n-1)*lh | anchor - (n-1)*lh/2 | anchor
//! line y       = first line y + i*lh, centered at x = W / 2
//! ```
//!
//! Each line's y is its text baseline in the canvas sense: the bottom of the
//! em box for bottom alignment, the middle for center, the top for top.

use subgenius_caption_model::{CaptionRecord, HexColor, StyleConfig, VerticalAlign};
use tiny_skia::{FillRule, LineJoin, Paint, PathBuilder, Pixmap, Rect, Stroke, Transform};

use crate::font::FontFace;

/// Horizontal padding on each side of a line's background box.
const BACKGROUND_PADDING_PX: f32 = 8.0;
/// Background box height relative to the font size.
const BACKGROUND_HEIGHT_EM: f32 = 1.2;

/// Which part of the em box a line's y coordinate refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextBaseline {
    Top,
    Middle,
    Bottom,
}

impl From<VerticalAlign> for TextBaseline {
    fn from(align: VerticalAlign) -> Self {
        match align {
            VerticalAlign::Top => Self::Top,
            VerticalAlign::Center => Self::Middle,
            VerticalAlign::Bottom => Self::Bottom,
        }
    }
}

/// Drawing instruction for one caption line.
#[derive(Debug, Clone, PartialEq)]
pub struct LinePlacement<'a> {
    /// Index of the caption in the input slice.
    pub caption_index: usize,

    /// Index of the line within the caption.
    pub line_index: usize,

    pub text: &'a str,

    /// Horizontal center of the line.
    pub center_x: f32,

    /// Line y, interpreted according to `baseline`.
    pub y: f32,

    pub baseline: TextBaseline,

    /// Measured advance width of the line.
    pub width: f32,

    /// Background box, present only when the background is visible.
    pub background: Option<Rect>,
}

impl LinePlacement<'_> {
    /// Left edge of the text run.
    pub fn left(&self) -> f32 {
        self.center_x - self.width / 2.0
    }

    /// Alphabetic baseline for the given face metrics.
    fn alphabetic_baseline(&self, face: &FontFace, size_px: f32) -> f32 {
        let metrics = face.vertical_metrics(size_px);
        match self.baseline {
            TextBaseline::Bottom => self.y - metrics.descent,
            TextBaseline::Top => self.y + metrics.ascent,
            TextBaseline::Middle => self.y + (metrics.ascent - metrics.descent) / 2.0,
        }
    }
}

/// Compute placements for every line of every caption active at `time_secs`.
///
/// Captions are visited in slice order; overlapping captions each lay out
/// from the same anchor and are drawn over one another.
pub fn layout_captions<'a>(
    captions: &'a [CaptionRecord],
    time_secs: f64,
    style: &StyleConfig,
    face: &FontFace,
    frame_width: u32,
    frame_height: u32,
) -> Vec<LinePlacement<'a>> {
    let mut placements = Vec::new();
    visit_lines(
        captions,
        time_secs,
        style,
        face,
        frame_width,
        frame_height,
        |placement| placements.push(placement),
    );
    placements
}

fn visit_lines<'a>(
    captions: &'a [CaptionRecord],
    time_secs: f64,
    style: &StyleConfig,
    face: &FontFace,
    frame_width: u32,
    frame_height: u32,
    mut visit: impl FnMut(LinePlacement<'a>),
) {
    let size = style.font_size as f32;
    let line_height = style.line_height();
    let width = frame_width as f32;
    let height = frame_height as f32;
    let margin = style.bottom_margin as f32;
    let baseline = TextBaseline::from(style.vertical_align);
    let show_background = style.background_opacity > 0;

    for (caption_index, caption) in captions.iter().enumerate() {
        if !caption.is_active_at(time_secs) {
            continue;
        }

        let line_count = caption.lines().count();
        let stacked = line_count.saturating_sub(1) as f32 * line_height;
        let first_y = match style.vertical_align {
            VerticalAlign::Bottom => height - margin - stacked,
            VerticalAlign::Center => height / 2.0 - stacked / 2.0,
            VerticalAlign::Top => margin,
        };

        for (line_index, text) in caption.lines().enumerate() {
            let y = first_y + line_index as f32 * line_height;
            let line_width = face.measure(text, size);
            let background = if show_background {
                background_rect(width / 2.0, y, line_width, size, baseline)
            } else {
                None
            };
            visit(LinePlacement {
                caption_index,
                line_index,
                text,
                center_x: width / 2.0,
                y,
                baseline,
                width: line_width,
                background,
            });
        }
    }
}

fn background_rect(
    center_x: f32,
    line_y: f32,
    text_width: f32,
    size: f32,
    baseline: TextBaseline,
) -> Option<Rect> {
    let rect_w = text_width + BACKGROUND_PADDING_PX * 2.0;
    let rect_h = size * BACKGROUND_HEIGHT_EM;
    let top = match baseline {
        TextBaseline::Bottom => line_y - rect_h + size * 0.2,
        TextBaseline::Top => line_y - size * 0.1,
        TextBaseline::Middle => line_y - rect_h / 2.0,
    };
    Rect::from_xywh(center_x - rect_w / 2.0, top, rect_w, rect_h)
}

/// Draw the captions active at `time_secs` onto `frame`.
///
/// Per line: the background box (when visible), then the outline stroke,
/// then the fill. Frames with no active caption are left untouched.
pub fn composite_captions(
    frame: &mut Pixmap,
    captions: &[CaptionRecord],
    time_secs: f64,
    style: &StyleConfig,
    face: &FontFace,
) {
    let size = style.font_size as f32;
    let background_paint = solid_paint(style.background_color, style.background_opacity);
    let outline_paint = solid_paint(style.outline_color, 255);
    let fill_paint = solid_paint(style.color, 255);
    let stroke = Stroke {
        width: style.outline_width as f32 * 2.0,
        line_join: LineJoin::Round,
        ..Stroke::default()
    };
    let (frame_width, frame_height) = (frame.width(), frame.height());

    visit_lines(
        captions,
        time_secs,
        style,
        face,
        frame_width,
        frame_height,
        |line| {
            if let Some(rect) = line.background {
                frame.fill_rect(rect, &background_paint, Transform::identity(), None);
            }

            let mut builder = PathBuilder::new();
            let baseline = line.alphabetic_baseline(face, size);
            face.outline_text(&mut builder, line.text, size, line.left(), baseline);
            let Some(path) = builder.finish() else {
                return;
            };

            if style.outline_width > 0 {
                frame.stroke_path(&path, &outline_paint, &stroke, Transform::identity(), None);
            }
            frame.fill_path(
                &path,
                &fill_paint,
                FillRule::Winding,
                Transform::identity(),
                None,
            );
        },
    );
}

fn solid_paint(color: HexColor, alpha: u8) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color_rgba8(color.r, color.g, color.b, alpha);
    paint.anti_alias = true;
    paint
}
