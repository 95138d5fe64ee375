//! Timestamp parsing for the several dialects found in slow query logs.

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, Utc};

/// Parses a slow-log timestamp into a UTC moment.
///
/// Four dialects are tried in order: ISO-8601 with a zone (`T` plus `+` or
/// `Z`), a ten-digit Unix epoch, the long `YYYY-MM-DD HH:MM:SS` form and the
/// legacy `yymmdd HH:MM:SS` form. Anything else yields `None`; this function
/// never panics on log content.
pub fn parse_mysql_time(time_str: &str) -> Option<DateTime<Utc>> {
    let time_str = time_str.trim();
    if time_str.is_empty() {
        return None;
    }

    if time_str.contains('T') && (time_str.contains('+') || time_str.contains('Z')) {
        let iso = time_str.replace('Z', "+00:00");
        if let Ok(dt) = DateTime::parse_from_rfc3339(&iso) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    if time_str.len() == 10 && time_str.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(secs) = time_str.parse::<i64>() {
            return DateTime::from_timestamp(secs, 0);
        }
    }

    if time_str.contains('-') {
        return time_str
            .get(..19)
            .and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok())
            .map(|naive| naive.and_utc());
    }

    if time_str.split_whitespace().next().is_some_and(|tok| tok.len() == 6) {
        let naive = time_str
            .get(..15)
            .and_then(|s| NaiveDateTime::parse_from_str(s, "%y%m%d %H:%M:%S").ok())?;
        // Two-digit years roll over at the century mark.
        let naive = if naive.year() < 1931 {
            naive.with_year(naive.year() + 100)?
        } else {
            naive
        };
        return Some(naive.and_utc());
    }

    None
}

/// Target window for `--days N` / `--today`.
///
/// `days == 0` covers the current UTC day; `days > 0` spans from UTC midnight
/// `days` ago up to now.
pub fn calculate_time_range(days: i64) -> (DateTime<Utc>, DateTime<Utc>) {
    let now = Utc::now();
    if days == 0 {
        let day = now.date_naive();
        let start = day.and_hms_opt(0, 0, 0).expect("midnight is valid");
        let end = day
            .and_hms_micro_opt(23, 59, 59, 999_999)
            .expect("end of day is valid");
        (start.and_utc(), end.and_utc())
    } else {
        let start = (now - Duration::days(days))
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is valid");
        (start.and_utc(), now)
    }
}
