//! SubRip (SRT) subtitle tracks.

use subgenius_caption_model::CaptionRecord;

/// Generate SRT subtitle content from captions, numbered in list order.
pub fn generate_srt(captions: &[CaptionRecord]) -> String {
    let mut output = String::new();

    for (i, caption) in captions.iter().enumerate() {
        output.push_str(&format!("{}\n", i + 1));
        output.push_str(&format!(
            "{} --> {}\n",
            format_srt_time(caption.start_time),
            format_srt_time(caption.end_time),
        ));
        output.push_str(&caption.text);
        output.push_str("\n\n");
    }

    output
}

/// Format seconds as SRT timestamp: HH:MM:SS,mmm
fn format_srt_time(secs: f64) -> String {
    let total_ms = (secs.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let seconds = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{hours:02}:{minutes:02}:{seconds:02},{millis:03}")
}
