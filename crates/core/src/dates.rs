//! Best-effort date parsing across the literal formats sources emit.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%Y%m%d"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
];

/// Parse a date-ish string. Returns `None` (never errors) on total failure,
/// logging the offending field so operators can spot format drift.
pub fn parse_flexible_date(value: Option<&str>, field: &str) -> Option<NaiveDate> {
    let raw = value?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(ts) = parse_timestamp_quiet(raw) {
        return Some(ts.date_naive());
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(d);
        }
    }
    tracing::warn!(field, value = raw, "could not parse date in any known format");
    None
}

/// Parse a timestamp, accepting RFC 3339 and naive datetimes (taken as UTC).
/// Bare dates resolve to midnight UTC.
pub fn parse_timestamp(value: Option<&str>, field: &str) -> Option<DateTime<Utc>> {
    let raw = value?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(ts) = parse_timestamp_quiet(raw) {
        return Some(ts);
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return d.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
        }
    }
    tracing::warn!(field, value = raw, "could not parse timestamp in any known format");
    None
}

fn parse_timestamp_quiet(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|n| n.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn accepts_known_formats() {
        assert_eq!(parse_flexible_date(Some("2024-03-15"), "f"), Some(d(2024, 3, 15)));
        assert_eq!(parse_flexible_date(Some("15/03/2024"), "f"), Some(d(2024, 3, 15)));
        assert_eq!(parse_flexible_date(Some("2024-03-15T10:20:30"), "f"), Some(d(2024, 3, 15)));
        assert_eq!(parse_flexible_date(Some("2024-03-15 10:20:30"), "f"), Some(d(2024, 3, 15)));
        assert_eq!(parse_flexible_date(Some("2024-03-15T10:20:30.123"), "f"), Some(d(2024, 3, 15)));
        assert_eq!(parse_flexible_date(Some("2024-03-15T23:30:00+01:00"), "f"), Some(d(2024, 3, 15)));
    }

    #[test]
    fn garbage_yields_none() {
        assert_eq!(parse_flexible_date(Some("next tuesday"), "f"), None);
        assert_eq!(parse_flexible_date(Some("  "), "f"), None);
        assert_eq!(parse_flexible_date(None, "f"), None);
    }

    #[test]
    fn timestamps_normalize_to_utc() {
        let ts = parse_timestamp(Some("2024-03-15T12:00:00+02:00"), "updated").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-15T10:00:00+00:00");
        let midnight = parse_timestamp(Some("2024-03-15"), "updated").unwrap();
        assert_eq!(midnight.date_naive(), d(2024, 3, 15));
    }
}
