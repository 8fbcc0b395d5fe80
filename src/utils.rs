use chrono::{DateTime, FixedOffset, Local, Timelike};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::constants::MAX_APPLICATION_ID_LENGTH;
use crate::metrics::TimeUnit;

static NON_ALPHANUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Normalizes an application id into the form used in the submission path:
/// lowercase, runs of non-alphanumeric characters collapsed into single
/// hyphens, at most 100 characters.
pub fn sanitize_application_id(application_id: &str) -> String {
    let lowered = application_id.to_lowercase();
    let mut sanitized = NON_ALPHANUMERIC
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string();
    sanitized.truncate(MAX_APPLICATION_ID_LENGTH);
    sanitized
}

/// The current wall-clock time, carrying the local timezone offset.
pub fn local_now_with_offset() -> DateTime<FixedOffset> {
    let now = Local::now();
    now.with_timezone(now.offset())
}

/// Renders a datetime as ISO8601, truncated to the precision of the given
/// time unit. The timezone offset is always included.
pub fn get_iso_time_string(datetime: DateTime<FixedOffset>, truncate_to: TimeUnit) -> String {
    match truncate_to {
        TimeUnit::Nanosecond => datetime.format("%Y-%m-%dT%H:%M:%S%.f%:z"),
        TimeUnit::Microsecond => datetime.format("%Y-%m-%dT%H:%M:%S%.6f%:z"),
        TimeUnit::Millisecond => datetime.format("%Y-%m-%dT%H:%M:%S%.3f%:z"),
        TimeUnit::Second => datetime.format("%Y-%m-%dT%H:%M:%S%:z"),
        TimeUnit::Minute => datetime.format("%Y-%m-%dT%H:%M%:z"),
        TimeUnit::Hour => datetime.format("%Y-%m-%dT%H%:z"),
        TimeUnit::Day => datetime.format("%Y-%m-%d%:z"),
    }
    .to_string()
}

/// Truncates a datetime to the precision of the given time unit, keeping
/// the offset intact. Used when handing datetime values back to callers so
/// comparisons match what a ping would carry.
pub fn truncate_to_time_unit(
    datetime: DateTime<FixedOffset>,
    unit: TimeUnit,
) -> DateTime<FixedOffset> {
    let d = datetime;
    match unit {
        TimeUnit::Nanosecond => d,
        TimeUnit::Microsecond => d.with_nanosecond(d.nanosecond() / 1_000 * 1_000).unwrap_or(d),
        TimeUnit::Millisecond => d
            .with_nanosecond(d.nanosecond() / 1_000_000 * 1_000_000)
            .unwrap_or(d),
        TimeUnit::Second => d.with_nanosecond(0).unwrap_or(d),
        TimeUnit::Minute => d.with_nanosecond(0).and_then(|d| d.with_second(0)).unwrap_or(d),
        TimeUnit::Hour => d
            .with_nanosecond(0)
            .and_then(|d| d.with_second(0))
            .and_then(|d| d.with_minute(0))
            .unwrap_or(d),
        TimeUnit::Day => d
            .with_nanosecond(0)
            .and_then(|d| d.with_second(0))
            .and_then(|d| d.with_minute(0))
            .and_then(|d| d.with_hour(0))
            .unwrap_or(d),
    }
}

/// Truncates a string to at most `length` characters, respecting character
/// boundaries.
pub fn truncate_string_at_boundary(value: &str, length: usize) -> String {
    value.chars().take(length).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn application_id_is_sanitized() {
        assert_eq!("org-example-app", sanitize_application_id("org.example.app"));
        assert_eq!("org-example-app", sanitize_application_id("Org/Example App"));
        assert_eq!("org-example-app", sanitize_application_id("--org.example..app--"));
        assert_eq!(
            MAX_APPLICATION_ID_LENGTH,
            sanitize_application_id(&"x.y".repeat(200)).len()
        );
    }

    #[test]
    fn iso_time_string_honors_the_time_unit() {
        let dt = FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2021, 4, 20, 10, 30, 59)
            .unwrap()
            .with_nanosecond(123_456_789)
            .unwrap();

        assert_eq!(
            "2021-04-20T10:30:59.123456789+01:00",
            get_iso_time_string(dt, TimeUnit::Nanosecond)
        );
        assert_eq!(
            "2021-04-20T10:30:59.123456+01:00",
            get_iso_time_string(dt, TimeUnit::Microsecond)
        );
        assert_eq!(
            "2021-04-20T10:30:59.123+01:00",
            get_iso_time_string(dt, TimeUnit::Millisecond)
        );
        assert_eq!(
            "2021-04-20T10:30:59+01:00",
            get_iso_time_string(dt, TimeUnit::Second)
        );
        assert_eq!("2021-04-20T10:30+01:00", get_iso_time_string(dt, TimeUnit::Minute));
        assert_eq!("2021-04-20T10+01:00", get_iso_time_string(dt, TimeUnit::Hour));
        assert_eq!("2021-04-20+01:00", get_iso_time_string(dt, TimeUnit::Day));
    }

    #[test]
    fn truncation_keeps_character_boundaries() {
        assert_eq!("abc", truncate_string_at_boundary("abcdef", 3));
        assert_eq!("αβ", truncate_string_at_boundary("αβγ", 2));
        assert_eq!("ab", truncate_string_at_boundary("ab", 100));
    }
}
