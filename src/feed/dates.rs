//! Published-date resolution for feed items.
//!
//! Feeds are wildly inconsistent about date formats, so admission is
//! permissive: a handful of concrete formats are tried, then a year or
//! month hint places the item at the middle of the scoring window, and an
//! item with no usable date at all is still admitted.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};

const MONTH_ABBREVIATIONS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Resolve a raw published string to a UTC instant, or `None` when nothing
/// date-like can be recovered.
pub fn parse_published(raw: &str, window_days: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    // Naive datetime variants, assumed UTC.
    for format in [
        "%a, %d %b %Y %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    // Date-only variants.
    for format in ["%Y-%m-%d", "%d %b %Y", "%b %d, %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
        }
    }

    // A plausible year, or a month name, places the item mid-window.
    let assumed = now - Duration::days(i64::from(window_days) / 2);
    if let Some(year) = find_four_digit_year(raw) {
        if (year - now.year()).abs() <= 2 {
            return Some(assumed);
        }
    }
    let lower = raw.to_lowercase();
    if MONTH_ABBREVIATIONS.iter().any(|m| lower.contains(m)) {
        return Some(assumed);
    }

    None
}

/// Window admission. An unresolvable date is admitted; a resolved date must
/// fall within `window_days` of `now` and not in the future.
pub fn within_window(published: Option<DateTime<Utc>>, window_days: u32, now: DateTime<Utc>) -> bool {
    match published {
        None => true,
        Some(date) => {
            let age = now.signed_duration_since(date);
            age >= Duration::zero() && age.num_days() <= i64::from(window_days)
        }
    }
}

/// First standalone 19xx/20xx token in the string.
fn find_four_digit_year(s: &str) -> Option<i32> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i - start == 4 {
                let year: i32 = s[start..i].parse().ok()?;
                if (1900..2100).contains(&year) {
                    return Some(year);
                }
            }
        } else {
            i += 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn parses_rfc822_with_timezone() {
        let dt = parse_published("Tue, 01 Jul 2025 10:00:00 +0000", 7, now()).unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2025, 7, 1, 10, 0, 0).unwrap());

        let dt = parse_published("Tue, 01 Jul 2025 10:00:00 GMT", 7, now()).unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2025, 7, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn parses_rfc822_without_timezone_as_utc() {
        let dt = parse_published("Tue, 01 Jul 2025 10:00:00", 7, now()).unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2025, 7, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn parses_iso8601_variants() {
        for raw in [
            "2025-06-30T08:30:00Z",
            "2025-06-30T08:30:00+00:00",
            "2025-06-30T08:30:00",
        ] {
            let dt = parse_published(raw, 7, now()).unwrap();
            assert_eq!(dt, Utc.with_ymd_and_hms(2025, 6, 30, 8, 30, 0).unwrap(), "{raw}");
        }
    }

    #[test]
    fn parses_date_only_and_locale_variants() {
        assert_eq!(
            parse_published("2025-06-28", 7, now()).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 28, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_published("28 Jun 2025", 7, now()).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 28, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_published("Jun 28, 2025", 7, now()).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 28, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn year_hint_places_item_mid_window() {
        let dt = parse_published("sometime in 2025 probably", 8, now()).unwrap();
        assert_eq!(dt, now() - Duration::days(4));
        // A distant year is not a hint.
        assert!(parse_published("archive from 1997", 8, now()).is_none());
    }

    #[test]
    fn month_hint_places_item_mid_window() {
        let dt = parse_published("early feb update", 14, now()).unwrap();
        assert_eq!(dt, now() - Duration::days(7));
    }

    #[test]
    fn hopeless_strings_resolve_to_none() {
        assert!(parse_published("", 7, now()).is_none());
        assert!(parse_published("yesterday-ish", 7, now()).is_none());
    }

    #[test]
    fn window_admission() {
        let n = now();
        assert!(within_window(None, 7, n));
        assert!(within_window(Some(n - Duration::days(3)), 7, n));
        assert!(within_window(Some(n - Duration::days(7)), 7, n));
        assert!(!within_window(Some(n - Duration::days(8)), 7, n));
        // Future dates are not admitted.
        assert!(!within_window(Some(n + Duration::days(1)), 7, n));
    }
}
