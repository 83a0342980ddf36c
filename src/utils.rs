//! Small helpers shared by logging and the command line.

use chrono::NaiveDate;

/// Truncate a string for logging purposes.
///
/// Long strings are cut after `max` characters and get an ellipsis and a count of
/// the characters left out. Cuts always land on a character boundary.
///
/// # Arguments
///
/// * `s` - The string to potentially truncate
/// * `max` - Maximum number of characters to keep
///
/// # Returns
///
/// The original string if it has at most `max` characters, otherwise a truncated
/// version with `"…(+N chars)"` appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 chars)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => {
            let rest = s[cut..].chars().count();
            format!("{}…(+{} chars)", &s[..cut], rest)
        }
    }
}

/// Parse a `YYYY-MM-DD` command-line date.
pub fn parse_day(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| format!("expected YYYY-MM-DD, got `{s}`: {e}"))
}
