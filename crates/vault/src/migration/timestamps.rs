//! UTC normalization for legacy timestamp strings.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::warn;

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%d %H:%M%:z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse `raw` as an ISO-8601 timestamp and render it in UTC.
///
/// Values with an offset (or `Z`) are converted to UTC; naive values are
/// taken to already be UTC; a bare date means midnight. The output is
/// `YYYY-MM-DDTHH:MM:SS+00:00`, with microseconds appended when non-zero.
/// Returns `None` (and warns) when `raw` is not a recognisable timestamp.
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    let parsed = parse_utc(raw.trim());
    if parsed.is_none() {
        warn!(value = raw, "unable to parse timestamp");
    }
    parsed.map(render)
}

fn parse_utc(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    let s = s.replace('Z', "+00:00");

    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn render(dt: DateTime<Utc>) -> String {
    if dt.timestamp_subsec_micros() == 0 {
        dt.format("%Y-%m-%dT%H:%M:%S+00:00").to_string()
    } else {
        dt.format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naive_datetime_is_assumed_utc() {
        assert_eq!(
            normalize_timestamp("2024-01-15 10:30:00").as_deref(),
            Some("2024-01-15T10:30:00+00:00")
        );
        assert_eq!(
            normalize_timestamp("2024-01-15T10:30").as_deref(),
            Some("2024-01-15T10:30:00+00:00")
        );
    }

    #[test]
    fn bare_date_is_midnight() {
        assert_eq!(
            normalize_timestamp("2024-03-01").as_deref(),
            Some("2024-03-01T00:00:00+00:00")
        );
    }

    #[test]
    fn offsets_are_converted_to_utc() {
        assert_eq!(
            normalize_timestamp("2024-01-15T10:30:00-05:00").as_deref(),
            Some("2024-01-15T15:30:00+00:00")
        );
        assert_eq!(
            normalize_timestamp("2024-01-15 23:00:00+02:00").as_deref(),
            Some("2024-01-15T21:00:00+00:00")
        );
        assert_eq!(
            normalize_timestamp("2024-01-15T10:30:00Z").as_deref(),
            Some("2024-01-15T10:30:00+00:00")
        );
    }

    #[test]
    fn fractional_seconds_are_kept() {
        assert_eq!(
            normalize_timestamp("2024-01-15 10:30:00.250").as_deref(),
            Some("2024-01-15T10:30:00.250000+00:00")
        );
    }

    #[test]
    fn normalized_form_is_a_fixed_point() {
        let once = normalize_timestamp("2024-06-30 08:00:00").unwrap();
        assert_eq!(normalize_timestamp(&once), Some(once));
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(normalize_timestamp("last tuesday"), None);
        assert_eq!(normalize_timestamp(""), None);
        assert_eq!(normalize_timestamp("2024-13-45"), None);
    }
}
