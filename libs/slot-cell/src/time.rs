//! "HH:MM" clock strings and the half-open minute spans built from them.
//!
//! These values only ever compare windows within one calendar day; they are never
//! combined with the slot date for absolute time arithmetic.

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;

static CLOCK_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([01]\d|2[0-3]):([0-5]\d)$").expect("clock pattern is valid"));

/// Parses a strict 24-hour "HH:MM" string into minutes since midnight.
pub fn time_to_minutes(hhmm: &str) -> Option<u16> {
    let caps = CLOCK_TIME.captures(hhmm)?;
    let hours: u16 = caps[1].parse().ok()?;
    let minutes: u16 = caps[2].parse().ok()?;
    Some(hours * 60 + minutes)
}

pub fn minutes_to_time(minutes: u16) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// `[start, end)` in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MinuteSpan {
    pub start: u16,
    pub end: u16,
}

impl MinuteSpan {
    /// Builds a span from two clock strings. `None` if either string is malformed
    /// or the span is empty or reversed.
    pub fn parse(start_time: &str, end_time: &str) -> Option<Self> {
        let start = time_to_minutes(start_time)?;
        let end = time_to_minutes(end_time)?;
        (end > start).then_some(Self { start, end })
    }

    /// Touching spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &MinuteSpan) -> bool {
        self.start < other.end && self.end > other.start
    }
}

impl fmt::Display for MinuteSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", minutes_to_time(self.start), minutes_to_time(self.end))
    }
}

/// Start of the given calendar day in UTC.
pub fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

/// Accepts "YYYY-MM-DD" or an RFC 3339 timestamp. A timestamp contributes the
/// calendar date the client wrote, whatever its offset.
pub fn parse_slot_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive())
}

pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_clock_times() {
        assert_eq!(time_to_minutes("00:00"), Some(0));
        assert_eq!(time_to_minutes("09:30"), Some(570));
        assert_eq!(time_to_minutes("23:59"), Some(1439));
    }

    #[test]
    fn rejects_malformed_clock_times() {
        for raw in ["24:00", "9:30", "09:60", "0930", "09:30:00", " 09:30", "", "ab:cd"] {
            assert_eq!(time_to_minutes(raw), None, "{raw:?} should be rejected");
        }
    }

    #[test]
    fn renders_minutes() {
        assert_eq!(minutes_to_time(570), "09:30");
        assert_eq!(minutes_to_time(0), "00:00");
    }

    #[test]
    fn span_requires_end_after_start() {
        assert!(MinuteSpan::parse("10:00", "10:00").is_none());
        assert!(MinuteSpan::parse("10:30", "10:00").is_none());
        assert_eq!(
            MinuteSpan::parse("09:00", "09:30"),
            Some(MinuteSpan { start: 540, end: 570 })
        );
    }

    #[test]
    fn touching_spans_do_not_overlap() {
        let a = MinuteSpan::parse("09:00", "10:00").unwrap();
        let b = MinuteSpan::parse("10:00", "11:00").unwrap();
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));

        let c = MinuteSpan::parse("09:59", "10:30").unwrap();
        assert!(a.overlaps(&c));
    }

    #[test]
    fn slot_date_keeps_client_calendar_day() {
        let expected = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        assert_eq!(parse_slot_date("2026-10-17"), Some(expected));
        assert_eq!(parse_slot_date("2026-10-17T00:00:00+05:30"), Some(expected));
        assert_eq!(parse_slot_date("2026-10-17T23:30:00-08:00"), Some(expected));
        assert_eq!(parse_slot_date("17/10/2026"), None);
    }

    #[test]
    fn day_start_is_utc_midnight() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        assert_eq!(day_start(date).to_rfc3339(), "2026-10-17T00:00:00+00:00");
    }
}
