//! Editor time display: `mm:ss.mmm`.

use crate::ModelError;

/// Format seconds as `mm:ss.mmm`. Minutes are not wrapped at the hour.
pub fn format_clock(secs: f64) -> String {
    let total_ms = (secs.max(0.0) * 1000.0).round() as u64;
    let minutes = total_ms / 60_000;
    let seconds = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{minutes:02}:{seconds:02}.{millis:03}")
}

/// Parse `mm:ss[.fff]` or plain seconds.
pub fn parse_clock(value: &str) -> Result<f64, ModelError> {
    let invalid = || ModelError::InvalidTime {
        value: value.to_string(),
    };
    let trimmed = value.trim();
    let secs = match trimmed.split_once(':') {
        Some((min, sec)) => {
            let min: u64 = min.trim().parse().map_err(|_| invalid())?;
            let sec: f64 = sec.trim().parse().map_err(|_| invalid())?;
            min as f64 * 60.0 + sec
        }
        None => trimmed.parse().map_err(|_| invalid())?,
    };
    if !secs.is_finite() || secs < 0.0 {
        return Err(invalid());
    }
    Ok(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(0.0), "00:00.000");
        assert_eq!(format_clock(3.2), "00:03.200");
        assert_eq!(format_clock(75.5), "01:15.500");
        assert_eq!(format_clock(3661.0), "61:01.000");
    }

    #[test]
    fn test_parse_clock() {
        assert!((parse_clock("01:15.500").unwrap() - 75.5).abs() < 1e-9);
        assert!((parse_clock("2.25").unwrap() - 2.25).abs() < 1e-9);
        assert!(parse_clock("aa:bb").is_err());
        assert!(parse_clock("-1").is_err());
    }
}
