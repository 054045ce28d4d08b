//! Advanced SubStation Alpha (ASS) subtitle tracks.
//!
//! Export writes one `Default` style derived from the `StyleConfig` and one
//! `Dialogue` event per caption. The reader understands the subset needed to
//! load such files back (and most third-party ASS files): the `[Events]`
//! section, its `Format` line, and `Dialogue` events.

use std::fmt::Write as _;

use subgenius_caption_model::{CaptionRecord, HexColor, StyleConfig, VerticalAlign};

use crate::CodecError;

const STYLE_FORMAT: &str = "Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding";
const EVENT_FORMAT: &str = "Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text";

/// Secondary colour is unused by plain dialogue; keep the conventional red.
const SECONDARY_COLOUR: &str = "&H000000FF";

/// Horizontal margins written into the style line.
const MARGIN_LR: u32 = 10;

/// Generate a complete ASS document for `captions` at the given script
/// resolution.
///
/// Text is written as-is apart from line breaks, so braces and backslash
/// sequences act as ASS override codes. `lint` reports such captions.
pub fn generate_ass(
    captions: &[CaptionRecord],
    style: &StyleConfig,
    video_width: u32,
    video_height: u32,
) -> String {
    let primary = ass_color(style.color, 0);
    let outline = ass_color(style.outline_color, 0);
    // ASS alpha counts transparency, the style counts opacity.
    let back = ass_color(style.background_color, 255 - style.background_opacity);

    let mut output = String::new();
    output.push_str("[Script Info]\n");
    output.push_str("ScriptType: v4.00+\n");
    let _ = writeln!(output, "PlayResX: {video_width}");
    let _ = writeln!(output, "PlayResY: {video_height}");
    output.push_str("WrapStyle: 1\n\n");

    output.push_str("[V4+ Styles]\n");
    output.push_str(STYLE_FORMAT);
    output.push('\n');
    let _ = writeln!(
        output,
        "Style: Default,{},{},{primary},{SECONDARY_COLOUR},{outline},{back},0,0,0,0,100,100,0,0,1,{},0,{},{MARGIN_LR},{MARGIN_LR},{},1",
        style.font_family,
        style.font_size,
        style.outline_width,
        alignment_code(style.vertical_align),
        style.bottom_margin,
    );
    output.push('\n');

    output.push_str("[Events]\n");
    output.push_str(EVENT_FORMAT);
    output.push('\n');
    for caption in captions {
        let _ = writeln!(
            output,
            "Dialogue: 0,{},{},Default,,0,0,0,,{}",
            format_ass_time(caption.start_time),
            format_ass_time(caption.end_time),
            escape_text(&caption.text),
        );
    }

    output
}

/// Numpad-style alignment: bottom-center 2, center 5, top-center 8.
pub fn alignment_code(align: VerticalAlign) -> u8 {
    match align {
        VerticalAlign::Bottom => 2,
        VerticalAlign::Center => 5,
        VerticalAlign::Top => 8,
    }
}

/// Encode a color as `&HAABBGGRR`, where `alpha` 0 is opaque.
pub fn ass_color(color: HexColor, alpha: u8) -> String {
    format!(
        "&H{alpha:02X}{:02X}{:02X}{:02X}",
        color.b, color.g, color.r
    )
}

/// Format seconds as `h:mm:ss.cc`, truncating to whole centiseconds.
pub fn format_ass_time(secs: f64) -> String {
    // The epsilon absorbs binary representation error (0.29 * 100 is
    // 28.999...) without turning truncation into rounding.
    let total_cs = (secs.max(0.0) * 100.0 + 1e-6).floor() as u64;
    let hours = total_cs / 360_000;
    let minutes = (total_cs % 360_000) / 6000;
    let seconds = (total_cs % 6000) / 100;
    let centis = total_cs % 100;
    format!("{hours}:{minutes:02}:{seconds:02}.{centis:02}")
}

/// Parse `h:mm:ss.cc` into seconds.
pub fn parse_ass_time(value: &str) -> Option<f64> {
    let mut parts = value.trim().splitn(3, ':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(hours as f64 * 3600.0 + minutes as f64 * 60.0 + seconds)
}

fn escape_text(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "\\N")
}

fn unescape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' => {
                // Override blocks carry styling only.
                for inner in chars.by_ref() {
                    if inner == '}' {
                        break;
                    }
                }
            }
            '\\' => match chars.peek() {
                Some('N') | Some('n') => {
                    chars.next();
                    out.push('\n');
                }
                Some('h') => {
                    chars.next();
                    out.push(' ');
                }
                _ => out.push(c),
            },
            _ => out.push(c),
        }
    }
    out
}

/// Read the dialogue events of an ASS document as captions, in file order.
///
/// Parsed captions get ids of the form `ass-<n>`.
pub fn parse_ass(content: &str) -> Result<Vec<CaptionRecord>, CodecError> {
    let mut in_events = false;
    let mut columns: Option<EventColumns> = None;
    let mut captions = Vec::new();

    for (index, raw_line) in content.lines().enumerate() {
        let line_no = index + 1;
        // Only the left side is trimmed: trailing spaces belong to the text.
        let line = raw_line
            .trim_start_matches('\u{feff}')
            .trim_end_matches('\r')
            .trim_start();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }

        if line.starts_with('[') {
            in_events = line.trim_end().eq_ignore_ascii_case("[events]");
            continue;
        }
        if !in_events {
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "Format" => columns = Some(EventColumns::from_format(value, line_no)?),
            "Dialogue" => {
                let cols = columns.as_ref().ok_or_else(|| CodecError::InvalidAss {
                    line: line_no,
                    message: "Dialogue before Format line".to_string(),
                })?;
                let fields: Vec<&str> = value.trim_start().splitn(cols.count, ',').collect();
                if fields.len() < cols.count {
                    return Err(CodecError::InvalidAss {
                        line: line_no,
                        message: format!(
                            "expected {} fields, found {}",
                            cols.count,
                            fields.len()
                        ),
                    });
                }
                let time = |i: usize, name: &str| {
                    parse_ass_time(fields[i]).ok_or_else(|| CodecError::InvalidAss {
                        line: line_no,
                        message: format!("invalid {name} time {:?}", fields[i]),
                    })
                };
                captions.push(CaptionRecord::new(
                    format!("ass-{}", captions.len()),
                    time(cols.start, "start")?,
                    time(cols.end, "end")?,
                    unescape_text(fields[cols.text]),
                ));
            }
            _ => {}
        }
    }

    Ok(captions)
}

struct EventColumns {
    count: usize,
    start: usize,
    end: usize,
    text: usize,
}

impl EventColumns {
    fn from_format(value: &str, line: usize) -> Result<Self, CodecError> {
        let names: Vec<&str> = value.split(',').map(str::trim).collect();
        let find = |name: &str| {
            names
                .iter()
                .position(|n| n.eq_ignore_ascii_case(name))
                .ok_or_else(|| CodecError::InvalidAss {
                    line,
                    message: format!("Format line lacks {name}"),
                })
        };
        let text = find("Text")?;
        if text != names.len() - 1 {
            return Err(CodecError::InvalidAss {
                line,
                message: "Text must be the last event field".to_string(),
            });
        }
        Ok(Self {
            count: names.len(),
            start: find("Start")?,
            end: find("End")?,
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captions() -> Vec<CaptionRecord> {
        vec![
            CaptionRecord::new("1", 0.5, 3.2, "Hi\nThere"),
            CaptionRecord::new("2", 3661.29, 3663.999, "Later, with commas"),
        ]
    }

    #[test]
    fn test_time_formatting_truncates() {
        assert_eq!(format_ass_time(0.0), "0:00:00.00");
        assert_eq!(format_ass_time(3.2), "0:00:03.20");
        assert_eq!(format_ass_time(0.29), "0:00:00.29");
        assert_eq!(format_ass_time(3663.999), "1:01:03.99");
        assert_eq!(format_ass_time(59.999), "0:00:59.99");
    }

    #[test]
    fn test_color_conversion() {
        assert_eq!(ass_color(HexColor::new(0x12, 0x34, 0x56), 0), "&H00563412");
        assert_eq!(ass_color(HexColor::WHITE, 0), "&H00FFFFFF");
        // Default style: black background, opacity 0 -> fully transparent.
        assert_eq!(ass_color(HexColor::BLACK, 255 - 0), "&HFF000000");
    }

    #[test]
    fn test_style_line() {
        let style = StyleConfig {
            vertical_align: VerticalAlign::Top,
            background_opacity: 255,
            ..StyleConfig::default()
        };
        let ass = generate_ass(&captions(), &style, 1280, 720);
        assert!(ass.contains("PlayResX: 1280\nPlayResY: 720\n"));
        assert!(ass.contains(
            "Style: Default,Roboto,24,&H00FFFFFF,&H000000FF,&H00000000,&H00000000,0,0,0,0,100,100,0,0,1,2,0,8,10,10,30,1"
        ));
    }

    #[test]
    fn test_transparent_background_by_default() {
        let ass = generate_ass(&captions(), &StyleConfig::default(), 1920, 1080);
        assert!(ass.contains(",&HFF000000,0,0,0,0,100,100"));
        assert!(ass.contains(",2,10,10,30,1\n"));
    }

    #[test]
    fn test_dialogue_lines_in_list_order() {
        let ass = generate_ass(&captions(), &StyleConfig::default(), 1920, 1080);
        let dialogue: Vec<&str> = ass.lines().filter(|l| l.starts_with("Dialogue:")).collect();
        assert_eq!(
            dialogue,
            vec![
                "Dialogue: 0,0:00:00.50,0:00:03.20,Default,,0,0,0,,Hi\\NThere",
                "Dialogue: 0,1:01:01.29,1:01:03.99,Default,,0,0,0,,Later, with commas",
            ]
        );
    }

    #[test]
    fn test_parse_restores_breaks_and_commas() {
        let ass = generate_ass(&captions(), &StyleConfig::default(), 1920, 1080);
        let parsed = parse_ass(&ass).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].text, "Hi\nThere");
        assert_eq!(parsed[1].text, "Later, with commas");
        assert!((parsed[1].start_time - 3661.29).abs() < 1e-9);
    }

    #[test]
    fn test_parse_strips_override_tags() {
        let content = "[Events]\nFormat: Layer, Start, End, Style, Text\nDialogue: 0,0:00:01.00,0:00:02.50,Default,{\\i1}Hello{\\i0}\\hworld\n";
        let parsed = parse_ass(content).unwrap();
        assert_eq!(parsed[0].text, "Hello world");
        assert!((parsed[0].end_time - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_parse_rejects_dialogue_without_format() {
        let err = parse_ass("[Events]\nDialogue: 0,0:00:01.00,0:00:02.00,Default,,0,0,0,,x\n")
            .unwrap_err();
        assert!(matches!(err, CodecError::InvalidAss { line: 2, .. }));
    }
}
