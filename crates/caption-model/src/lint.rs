//! Advisory caption checks.
//!
//! Rendering is permissive: inverted ranges are simply never active and
//! overlapping captions stack. These checks only report what an editor
//! would flag; nothing here rejects or rewrites captions.

use std::fmt;

use crate::caption::CaptionRecord;
use crate::style::StyleConfig;

/// A single advisory finding.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptionIssue {
    /// `end_time` is before `start_time`; the caption never renders.
    InvertedRange { id: String },

    /// Two captions are visible at the same time.
    Overlap { first: String, second: String },

    /// A line exceeds `max_chars_per_line`.
    LineTooLong {
        id: String,
        line: usize,
        chars: usize,
        limit: usize,
    },

    /// The caption exceeds `max_chars_per_subtitle`.
    TooManyChars {
        id: String,
        chars: usize,
        limit: usize,
    },

    /// Braces or backslashes that ASS readers treat as override codes, so
    /// the text does not survive an ASS export and re-import unchanged.
    AssMarkup { id: String },
}

impl fmt::Display for CaptionIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvertedRange { id } => write!(f, "{id}: ends before it starts"),
            Self::Overlap { first, second } => write!(f, "{first} overlaps {second}"),
            Self::LineTooLong {
                id,
                line,
                chars,
                limit,
            } => write!(f, "{id}: line {} has {chars} chars (limit {limit})", line + 1),
            Self::TooManyChars { id, chars, limit } => {
                write!(f, "{id}: {chars} chars (limit {limit})")
            }
            Self::AssMarkup { id } => {
                write!(f, "{id}: braces or backslashes are read as ASS override codes")
            }
        }
    }
}

/// Check captions (assumed sorted by start time) against the style limits.
pub fn lint(captions: &[CaptionRecord], style: &StyleConfig) -> Vec<CaptionIssue> {
    let mut issues = Vec::new();

    for caption in captions {
        if caption.end_time < caption.start_time {
            issues.push(CaptionIssue::InvertedRange {
                id: caption.id.clone(),
            });
        }

        for (line, text) in caption.lines().enumerate() {
            let chars = text.chars().count();
            if chars > style.max_chars_per_line {
                issues.push(CaptionIssue::LineTooLong {
                    id: caption.id.clone(),
                    line,
                    chars,
                    limit: style.max_chars_per_line,
                });
            }
        }

        let chars = caption.text.chars().filter(|c| *c != '\n').count();
        if chars > style.max_chars_per_subtitle {
            issues.push(CaptionIssue::TooManyChars {
                id: caption.id.clone(),
                chars,
                limit: style.max_chars_per_subtitle,
            });
        }

        if caption.text.contains(['{', '}', '\\']) {
            issues.push(CaptionIssue::AssMarkup {
                id: caption.id.clone(),
            });
        }
    }

    // Sorted by start, so only later captions starting before this one
    // ends can overlap it.
    for (i, first) in captions.iter().enumerate() {
        if first.end_time < first.start_time {
            continue;
        }
        for second in &captions[i + 1..] {
            if second.start_time > first.end_time {
                break;
            }
            if second.end_time >= second.start_time {
                issues.push(CaptionIssue::Overlap {
                    first: first.id.clone(),
                    second: second.id.clone(),
                });
            }
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_captions_have_no_issues() {
        let captions = vec![
            CaptionRecord::new("1", 0.0, 1.0, "Short"),
            CaptionRecord::new("2", 1.5, 2.0, "Also short"),
        ];
        assert!(lint(&captions, &StyleConfig::default()).is_empty());
    }

    #[test]
    fn test_reports_inverted_and_overlap() {
        let captions = vec![
            CaptionRecord::new("1", 0.0, 2.0, "A"),
            CaptionRecord::new("2", 1.0, 3.0, "B"),
            CaptionRecord::new("3", 5.0, 4.0, "C"),
        ];
        let issues = lint(&captions, &StyleConfig::default());
        assert!(issues.contains(&CaptionIssue::InvertedRange { id: "3".into() }));
        assert!(issues.contains(&CaptionIssue::Overlap {
            first: "1".into(),
            second: "2".into()
        }));
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn test_touching_boundaries_overlap() {
        // Both captions are active at exactly t=2.0.
        let captions = vec![
            CaptionRecord::new("1", 0.0, 2.0, "A"),
            CaptionRecord::new("2", 2.0, 3.0, "B"),
        ];
        assert_eq!(lint(&captions, &StyleConfig::default()).len(), 1);
    }

    #[test]
    fn test_character_limits() {
        let style = StyleConfig {
            max_chars_per_line: 5,
            max_chars_per_subtitle: 8,
            ..StyleConfig::default()
        };
        let captions = vec![CaptionRecord::new("1", 0.0, 1.0, "abcdef\nabc")];
        let issues = lint(&captions, &style);
        assert_eq!(
            issues,
            vec![
                CaptionIssue::LineTooLong {
                    id: "1".into(),
                    line: 0,
                    chars: 6,
                    limit: 5
                },
                CaptionIssue::TooManyChars {
                    id: "1".into(),
                    chars: 9,
                    limit: 8
                },
            ]
        );
        assert_eq!(issues[0].to_string(), "1: line 1 has 6 chars (limit 5)");
    }

    #[test]
    fn test_flags_text_ass_cannot_carry() {
        let captions = vec![
            CaptionRecord::new("1", 0.0, 1.0, "Price {50%} off"),
            CaptionRecord::new("2", 2.0, 3.0, r"C:\new folder"),
            CaptionRecord::new("3", 4.0, 5.0, "Plain\ntext"),
        ];
        let issues = lint(&captions, &StyleConfig::default());
        assert_eq!(
            issues,
            vec![
                CaptionIssue::AssMarkup { id: "1".into() },
                CaptionIssue::AssMarkup { id: "2".into() },
            ]
        );
    }
}
