//! Duration parsing and formatting utilities.

use std::time::Duration;

/// Parse a duration string (e.g., "90s", "5m", "1h", "2d").
///
/// # Errors
///
/// Returns a message describing the problem for an empty string, an unknown
/// unit, a bad number, or a value too large to represent.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return Err("Empty duration string".into());
    }

    let (num_str, multiplier) = if let Some(num) = s.strip_suffix("ms") {
        (num, 1)
    } else if let Some(num) = s.strip_suffix('s') {
        (num, 1000)
    } else if let Some(num) = s.strip_suffix('m') {
        (num, 60 * 1000)
    } else if let Some(num) = s.strip_suffix('h') {
        (num, 60 * 60 * 1000)
    } else if let Some(num) = s.strip_suffix('d') {
        (num, 24 * 60 * 60 * 1000)
    } else {
        return Err(format!("Unknown duration unit in '{s}'"));
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: '{num_str}'"))?;

    let millis = num
        .checked_mul(multiplier)
        .ok_or_else(|| format!("Duration too large: '{s}'"))?;

    Ok(Duration::from_millis(millis))
}

/// Format a duration for display.
#[must_use]
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();

    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        let (mins, rem) = (secs / 60, secs % 60);
        if rem == 0 {
            format!("{mins}m")
        } else {
            format!("{mins}m {rem}s")
        }
    } else if secs < 86400 {
        let (hours, mins) = (secs / 3600, (secs % 3600) / 60);
        if mins == 0 {
            format!("{hours}h")
        } else {
            format!("{hours}h {mins}m")
        }
    } else {
        let (days, hours) = (secs / 86400, (secs % 86400) / 3600);
        if hours == 0 {
            format!("{days}d")
        } else {
            format!("{days}d {hours}h")
        }
    }
}
