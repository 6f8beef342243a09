//! # Normalizers
//! Pure converters from raw bulletin substrings to typed values.
//!
//! None of these fail. Each returns a [`Normalized`] carrying the best-effort
//! value and a `degraded` flag that is set whenever a fallback was used
//! (null coordinates, zero, or the current time).

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;

/// Best-effort value plus whether a fallback was substituted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalized<T> {
    pub value: T,
    pub degraded: bool,
}

impl<T> Normalized<T> {
    pub fn clean(value: T) -> Self {
        Self {
            value,
            degraded: false,
        }
    }

    pub fn fallback(value: T) -> Self {
        Self {
            value,
            degraded: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Coordinates
// ---------------------------------------------------------------------------

/// Parse `"<lat>, <lon>"` (tokens may carry a trailing degree sign).
/// Anything else yields `(None, None)`.
pub fn parse_coordinates(raw: &str) -> Normalized<(Option<f64>, Option<f64>)> {
    let mut parts = raw.split(',');
    let (Some(lat), Some(lon), None) = (parts.next(), parts.next(), parts.next()) else {
        tracing::debug!(input = raw, "coordinate string has no single comma separator");
        return Normalized::fallback((None, None));
    };

    match (coordinate_token(lat), coordinate_token(lon)) {
        (Some(lat), Some(lon)) => Normalized::clean((Some(lat), Some(lon))),
        _ => {
            tracing::debug!(input = raw, "coordinate token is not numeric");
            Normalized::fallback((None, None))
        }
    }
}

fn coordinate_token(tok: &str) -> Option<f64> {
    let t = tok.trim().trim_end_matches('°').trim();
    t.parse::<f64>().ok().filter(|v| v.is_finite())
}

// ---------------------------------------------------------------------------
// Numbers
// ---------------------------------------------------------------------------

/// Keep only ASCII digits and parse the rest, so `"45 MPH"` becomes 45.
/// No digits at all (or overflow) gives 0.
pub fn clean_numeric(raw: &str) -> Normalized<u64> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return Normalized::fallback(0);
    }
    match digits.parse::<u64>() {
        Ok(v) => Normalized::clean(v),
        Err(_) => {
            tracing::debug!(input = raw, "numeric value out of range");
            Normalized::fallback(0)
        }
    }
}

// ---------------------------------------------------------------------------
// Date/time
// ---------------------------------------------------------------------------

/// Lenient parse of bulletin timestamps such as `"1100 AM EDT Sat Jun 10"`.
///
/// Result is UTC with no zone attached. A missing year becomes the current UTC
/// year; a missing zone is read as UTC. Unparseable text yields `now`.
pub fn parse_report_datetime(raw: &str, now: DateTime<Utc>) -> Normalized<NaiveDateTime> {
    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Normalized::clean(dt.naive_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Normalized::clean(dt.naive_utc());
    }

    match fuzzy_parse(trimmed, now.year()) {
        Some(dt) => Normalized::clean(dt),
        None => {
            tracing::warn!(input = raw, "unparseable report datetime, using current UTC time");
            Normalized::fallback(now.naive_utc())
        }
    }
}

#[derive(Debug, Default)]
struct Fields {
    year: Option<i32>,
    month: Option<u32>,
    day: Option<u32>,
    hour: Option<u32>,
    minute: u32,
    second: u32,
    meridiem: Option<Meridiem>,
    offset_secs: Option<i32>,
}

#[derive(Debug, Clone, Copy)]
enum Meridiem {
    Am,
    Pm,
}

fn re_clock() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,2}):(\d{2})(?::(\d{2}))?$").unwrap())
}

fn re_offset() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"^([+-])(\d{2}):?(\d{2})$").unwrap())
}

fn fuzzy_parse(raw: &str, default_year: i32) -> Option<NaiveDateTime> {
    let upper = raw.to_ascii_uppercase().replace(',', " ");
    let tokens: Vec<&str> = upper.split_whitespace().collect();
    let mut f = Fields::default();

    for (i, tok) in tokens.iter().enumerate() {
        let tok = tok.trim_end_matches('.');
        let next_is_meridiem = tokens
            .get(i + 1)
            .map(|n| meridiem(n.trim_end_matches('.')).is_some())
            .unwrap_or(false);

        if let Some(m) = meridiem(tok) {
            f.meridiem = Some(m);
        } else if let Some(c) = re_clock().captures(tok) {
            f.hour = c[1].parse().ok();
            f.minute = c[2].parse().ok()?;
            f.second = c.get(3).map(|s| s.as_str().parse()).transpose().ok()?.unwrap_or(0);
        } else if let Some(c) = re_offset().captures(tok) {
            let h: i32 = c[2].parse().ok()?;
            let m: i32 = c[3].parse().ok()?;
            let sign = if &c[1] == "-" { -1 } else { 1 };
            f.offset_secs = Some(sign * (h * 3600 + m * 60));
        } else if tok.chars().all(|c| c.is_ascii_digit()) {
            digits_token(tok, next_is_meridiem, &mut f);
        } else if let Some(m) = month(tok) {
            f.month = Some(m);
        } else if let Some(off) = zone_offset_secs(tok) {
            f.offset_secs = Some(off);
        }
        // Weekdays and filler words are skipped.
    }

    let month = f.month?;
    let day = f.day?;
    let date = NaiveDate::from_ymd_opt(f.year.unwrap_or(default_year), month, day)?;

    let mut hour = f.hour.unwrap_or(0);
    match f.meridiem {
        Some(Meridiem::Am) if hour == 12 => hour = 0,
        Some(Meridiem::Pm) if hour < 12 => hour += 12,
        _ => {}
    }
    let local = date.and_hms_opt(hour, f.minute, f.second)?;

    let offset = FixedOffset::east_opt(f.offset_secs.unwrap_or(0))?;
    let aware = offset.from_local_datetime(&local).single()?;
    Some(aware.naive_utc())
}

fn digits_token(tok: &str, next_is_meridiem: bool, f: &mut Fields) {
    let len = tok.len();
    let Ok(n) = tok.parse::<u32>() else {
        return;
    };

    // "1100 AM" / "300 PM"
    if (3..=4).contains(&len) && next_is_meridiem {
        f.hour = Some(n / 100);
        f.minute = n % 100;
        return;
    }
    // bare "9 AM"
    if len <= 2 && next_is_meridiem && f.hour.is_none() {
        f.hour = Some(n);
        return;
    }
    if len == 4 && (1900..=2100).contains(&n) && f.year.is_none() {
        f.year = Some(n as i32);
        return;
    }
    // 24-hour "1500"
    if (3..=4).contains(&len) && f.hour.is_none() && n / 100 < 24 && n % 100 < 60 {
        f.hour = Some(n / 100);
        f.minute = n % 100;
        return;
    }
    if len <= 2 && (1..=31).contains(&n) && f.day.is_none() {
        f.day = Some(n);
    }
}

fn meridiem(tok: &str) -> Option<Meridiem> {
    match tok {
        "AM" | "A.M" => Some(Meridiem::Am),
        "PM" | "P.M" => Some(Meridiem::Pm),
        _ => None,
    }
}

fn month(tok: &str) -> Option<u32> {
    let m = match tok {
        "JAN" | "JANUARY" => 1,
        "FEB" | "FEBRUARY" => 2,
        "MAR" | "MARCH" => 3,
        "APR" | "APRIL" => 4,
        "MAY" => 5,
        "JUN" | "JUNE" => 6,
        "JUL" | "JULY" => 7,
        "AUG" | "AUGUST" => 8,
        "SEP" | "SEPT" | "SEPTEMBER" => 9,
        "OCT" | "OCTOBER" => 10,
        "NOV" | "NOVEMBER" => 11,
        "DEC" | "DECEMBER" => 12,
        _ => return None,
    };
    Some(m)
}

/// Zone abbreviations seen in North Atlantic / Pacific advisories.
fn zone_offset_secs(tok: &str) -> Option<i32> {
    let hours = match tok {
        "UTC" | "GMT" | "Z" | "UT" => 0,
        "AST" | "EDT" => -4,
        "EST" | "CDT" => -5,
        "CST" | "MDT" => -6,
        "MST" | "PDT" => -7,
        "PST" | "AKDT" => -8,
        "AKST" | "HDT" => -9,
        "HST" => -10,
        "SST" => -11,
        "CHST" => 10,
        _ => return None,
    };
    Some(hours * 3600)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 20, 12, 30, 0).unwrap()
    }

    fn ndt(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    #[test]
    fn coordinates_parse_plain_and_degree_tokens() {
        let c = parse_coordinates("23.4, -75.6");
        assert_eq!(c.value, (Some(23.4), Some(-75.6)));
        assert!(!c.degraded);

        let c = parse_coordinates(" 15.9°,-106.5° ");
        assert_eq!(c.value, (Some(15.9), Some(-106.5)));
    }

    #[test]
    fn coordinates_fall_back_to_nulls() {
        for bad in ["garbage", "", "12.0", "1,2,3", "N, W", "12.5, abc"] {
            let c = parse_coordinates(bad);
            assert_eq!(c.value, (None, None), "input {bad:?}");
            assert!(c.degraded);
        }
    }

    #[test]
    fn numeric_strips_units_and_punctuation() {
        assert_eq!(clean_numeric("45 MPH").value, 45);
        assert_eq!(clean_numeric("1,005 mb").value, 1005);
        assert_eq!(clean_numeric("1005").value, 1005);
        assert!(!clean_numeric("1005").degraded);
    }

    #[test]
    fn numeric_empty_or_non_digit_is_zero() {
        for s in ["", "mph", "--"] {
            let n = clean_numeric(s);
            assert_eq!(n.value, 0);
            assert!(n.degraded);
        }
        assert!(clean_numeric("99999999999999999999999999").degraded);
    }

    #[test]
    fn bulletin_time_without_year_uses_current_year_and_converts_to_utc() {
        let d = parse_report_datetime("1100 AM EDT Sat Jun 10", now());
        assert!(!d.degraded);
        assert_eq!(d.value, ndt(2026, 6, 10, 15, 0));
    }

    #[test]
    fn bulletin_time_with_year_and_pm() {
        let d = parse_report_datetime("200 PM HST Mon Aug 05 2024", now());
        assert_eq!(d.value, ndt(2024, 8, 6, 0, 0));

        let d = parse_report_datetime("12:15 AM CDT Tue Sep 3 2024", now());
        assert_eq!(d.value, ndt(2024, 9, 3, 5, 15));
    }

    #[test]
    fn missing_zone_is_utc_and_24h_clock_is_read() {
        let d = parse_report_datetime("1500 UTC Jul 4", now());
        assert_eq!(d.value, ndt(2026, 7, 4, 15, 0));

        let d = parse_report_datetime("Jul 4 0900", now());
        assert_eq!(d.value, ndt(2026, 7, 4, 9, 0));
    }

    #[test]
    fn rfc2822_pubdate_is_accepted() {
        let d = parse_report_datetime("Sat, 10 Jun 2023 15:00:00 GMT", now());
        assert_eq!(d.value, ndt(2023, 6, 10, 15, 0));
        assert!(!d.degraded);
    }

    #[test]
    fn unparseable_text_degrades_to_now() {
        for s in ["", "no date here", "1100 AM EDT", "Feb 30 2025"] {
            let d = parse_report_datetime(s, now());
            assert!(d.degraded, "input {s:?}");
            assert_eq!(d.value, now().naive_utc());
        }
    }
}
