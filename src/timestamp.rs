//! Generation timestamps in the fixed `YYYYMMDD_HHMMSS` form.
//!
//! The same string names a filesystem generation directory, an object-store
//! key prefix and a snapshot `backup_id`.

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

/// chrono format string for generation timestamps
pub const GENERATION_FORMAT: &str = "%Y%m%d_%H%M%S";

fn generation_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{8}_\d{6}$").ok()).as_ref()
}

/// Format an instant as a generation timestamp
pub fn format_generation(at: DateTime<Utc>) -> String {
    at.format(GENERATION_FORMAT).to_string()
}

/// Parse a generation name. Returns `None` for anything that is not exactly
/// fifteen characters of the expected shape or is not a real calendar time.
pub fn parse_generation(name: &str) -> Option<DateTime<Utc>> {
    if !generation_pattern().is_some_and(|pattern| pattern.is_match(name)) {
        return None;
    }
    NaiveDateTime::parse_from_str(name, GENERATION_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_and_parse() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let name = format_generation(at);
        assert_eq!(name, "20240309_070501");
        assert_eq!(parse_generation(&name), Some(at));
    }

    #[test]
    fn test_rejects_near_misses() {
        assert_eq!(parse_generation("20240309_0705"), None);
        assert_eq!(parse_generation("20240309-070501"), None);
        assert_eq!(parse_generation("x20240309_070501"), None);
        assert_eq!(parse_generation("20241399_070501"), None);
        assert_eq!(parse_generation("latest"), None);
    }
}
