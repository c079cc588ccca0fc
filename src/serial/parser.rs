use once_cell::sync::Lazy;
use regex::Regex;

use crate::device::Reading;

pub const NO_VALUE: &str = "could not parse value";
pub const NO_RESPONSE: &str = "no response";

/// `<token>... <float> <unit>`, e.g. `S S     1.182 g`
static WEIGHT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\S+(?:\s+\S+)*?\s+([-+]?\d+(?:\.\d+)?)\s+([^\s\d][^\s]*)$")
        .expect("Invalid weight line regex")
});

/// Parse a weighing response line
/// Format: [status tokens] [signed decimal] [unit]
pub fn parse_weight_line(line: &str) -> Option<Reading> {
    let caps = WEIGHT_LINE.captures(line.trim())?;
    let value = caps.get(1)?.as_str().parse::<f64>().ok()?;
    let unit = caps.get(2)?.as_str().to_string();
    Some(Reading::Weight { value, unit })
}

/// First matching line wins; otherwise the last line is passed through raw
pub fn classify_measure_lines(lines: &[String]) -> Reading {
    if let Some(reading) = lines.iter().find_map(|line| parse_weight_line(line)) {
        return reading;
    }
    match lines.last() {
        Some(last) => Reading::Raw(last.clone()),
        None => Reading::error(NO_VALUE),
    }
}

/// Decode the single JSON line returned by a snapshot request
pub fn decode_snapshot_line(line: &str) -> Reading {
    let line = line.trim();
    if line.is_empty() {
        return Reading::error(NO_RESPONSE);
    }
    match serde_json::from_str::<serde_json::Value>(line) {
        Ok(value) => Reading::Structured(value),
        Err(e) => Reading::Error {
            message: format!("JSON decode error: {}", e),
            raw: Some(line.to_string()),
        },
    }
}
