//! JSON transport schema: `[{ id?, startTime?, endTime?, text? }, ...]`.
//!
//! Import is lenient about each element (missing or mistyped fields are
//! coerced) but strict about the shape of the document: anything other than
//! a top-level array is rejected and nothing is imported.

use serde_json::Value;
use subgenius_caption_model::CaptionRecord;

use crate::CodecError;

/// Parse pasted caption JSON. Markdown code fences anywhere in the input
/// are removed before parsing.
pub fn import_json(raw: &str) -> Result<Vec<CaptionRecord>, CodecError> {
    let cleaned = strip_code_fences(raw);
    let value: Value = serde_json::from_str(&cleaned)?;
    let Value::Array(items) = value else {
        return Err(CodecError::NotAnArray);
    };

    let captions: Vec<CaptionRecord> = items
        .iter()
        .enumerate()
        .map(|(index, item)| coerce_record(index, item))
        .collect();
    tracing::debug!(count = captions.len(), "Imported captions from JSON");
    Ok(captions)
}

/// Serialize captions in the transport schema.
pub fn export_json(captions: &[CaptionRecord]) -> Result<String, CodecError> {
    Ok(serde_json::to_string_pretty(captions)?)
}

fn strip_code_fences(raw: &str) -> String {
    raw.replace("```json", "").replace("```", "").trim().to_string()
}

fn coerce_record(index: usize, item: &Value) -> CaptionRecord {
    let field = |name: &str| item.get(name).unwrap_or(&Value::Null);
    CaptionRecord {
        id: coerce_id(field("id")).unwrap_or_else(|| format!("sub-{index}")),
        start_time: coerce_seconds(field("startTime")),
        end_time: coerce_seconds(field("endTime")),
        text: coerce_text(field("text")),
    }
}

fn coerce_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        _ => None,
    }
}

/// Numbers pass through, numeric strings are parsed, `true` counts as 1,
/// everything else is 0.
fn coerce_seconds(value: &Value) -> f64 {
    let secs = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        Value::Bool(true) => 1.0,
        _ => 0.0,
    };
    if secs.is_finite() {
        secs
    } else {
        0.0
    }
}

fn coerce_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) if n.as_f64() != Some(0.0) => n.to_string(),
        Value::Bool(true) => "true".to_string(),
        _ => String::new(),
    }
}
