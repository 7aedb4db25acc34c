//! Sleep duration parsing
//!
//! Wearable dashboards report sleep as display text such as `"6 hr 30 min"`.
//! The model wants fractional hours. Three shapes are recognized, each
//! case-insensitive with optional whitespace between tokens:
//!
//! - `"<H> hr <M> min"` → H + M/60
//! - `"<H> hr"` → H
//! - `"<M> min"` → M/60
//!
//! Anything else is a parse error; there is no zero fallback.

use crate::error::ComputeError;
use regex::Regex;
use std::sync::LazyLock;

const DURATION_GRAMMAR: &str = r"(?i)^\s*(?:(\d+)\s*hr)?\s*(?:(\d+)\s*min)?\s*$";

static DURATION_PATTERN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(DURATION_GRAMMAR));

fn duration_pattern() -> Result<&'static Regex, ComputeError> {
    DURATION_PATTERN
        .as_ref()
        .map_err(|e| ComputeError::Parse(format!("duration grammar failed to compile: {}", e)))
}

/// Parser for free-text durations
pub struct DurationParser;

impl DurationParser {
    /// Convert duration text into fractional hours
    pub fn parse_hours(text: &str) -> Result<f64, ComputeError> {
        let captures = duration_pattern()?
            .captures(text)
            .ok_or_else(|| unrecognized(text))?;

        let hours = captures.get(1);
        let minutes = captures.get(2);
        if hours.is_none() && minutes.is_none() {
            return Err(unrecognized(text));
        }

        let hours = hours
            .map(|m| parse_token(m.as_str(), text))
            .transpose()?
            .unwrap_or(0);
        let minutes = minutes
            .map(|m| parse_token(m.as_str(), text))
            .transpose()?
            .unwrap_or(0);

        Ok(hours as f64 + minutes as f64 / 60.0)
    }
}

fn parse_token(token: &str, text: &str) -> Result<u32, ComputeError> {
    token
        .parse::<u32>()
        .map_err(|e| ComputeError::Parse(format!("{:?}: {}", text, e)))
}

fn unrecognized(text: &str) -> ComputeError {
    ComputeError::Parse(format!(
        "{:?} is not \"<H> hr <M> min\", \"<H> hr\" or \"<M> min\"",
        text
    ))
}
