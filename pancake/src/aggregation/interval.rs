//! Date histogram intervals and bucket-key arithmetic.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;

const SECOND_MS: i64 = 1_000;
const MINUTE_MS: i64 = 60 * SECOND_MS;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl CalendarUnit {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "1m" | "minute" => Some(Self::Minute),
            "1h" | "hour" => Some(Self::Hour),
            "1d" | "day" => Some(Self::Day),
            "1w" | "week" => Some(Self::Week),
            "1M" | "month" => Some(Self::Month),
            "1q" | "quarter" => Some(Self::Quarter),
            "1y" | "year" => Some(Self::Year),
            _ => None,
        }
    }

    /// ClickHouse `toStartOf*` function for the unit.
    pub fn start_of_function(self) -> &'static str {
        match self {
            Self::Minute => "toStartOfMinute",
            Self::Hour => "toStartOfHour",
            Self::Day => "toStartOfDay",
            Self::Week => "toStartOfWeek",
            Self::Month => "toStartOfMonth",
            Self::Quarter => "toStartOfQuarter",
            Self::Year => "toStartOfYear",
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Minute => "1m",
            Self::Hour => "1h",
            Self::Day => "1d",
            Self::Week => "1w",
            Self::Month => "1M",
            Self::Quarter => "1q",
            Self::Year => "1y",
        }
    }
}

/// A date histogram interval.
///
/// Fixed intervals produce keys that are interval indices
/// (`floor(local_ms / interval_ms)`, also before 1970); calendar intervals
/// produce the start of the local period in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DateInterval {
    Fixed(i64),
    Calendar(CalendarUnit),
}

fn fixed_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)(ms|s|m|h|d)$").expect("fixed interval pattern is valid"))
}

impl DateInterval {
    /// `fixed_interval` syntax: `<n>(ms|s|m|h|d)`.
    pub fn parse_fixed(s: &str) -> Option<Self> {
        let caps = fixed_regex().captures(s.trim())?;
        let n: i64 = caps[1].parse().ok()?;
        let unit = match &caps[2] {
            "ms" => 1,
            "s" => SECOND_MS,
            "m" => MINUTE_MS,
            "h" => HOUR_MS,
            "d" => DAY_MS,
            _ => return None,
        };
        // an overflowing interval is no interval
        n.checked_mul(unit).filter(|ms| *ms > 0).map(Self::Fixed)
    }

    /// `calendar_interval` syntax. Minute, hour and day have a constant
    /// length and are normalized to fixed intervals.
    pub fn parse_calendar(s: &str) -> Option<Self> {
        CalendarUnit::parse(s.trim()).map(|unit| Self::Calendar(unit).normalized())
    }

    /// Legacy `interval` parameter: calendar names first, then fixed units.
    pub fn parse_legacy(s: &str) -> Option<Self> {
        Self::parse_calendar(s).or_else(|| Self::parse_fixed(s))
    }

    pub fn normalized(self) -> Self {
        match self {
            Self::Calendar(CalendarUnit::Minute) => Self::Fixed(MINUTE_MS),
            Self::Calendar(CalendarUnit::Hour) => Self::Fixed(HOUR_MS),
            Self::Calendar(CalendarUnit::Day) => Self::Fixed(DAY_MS),
            other => other,
        }
    }

    /// Rough length in milliseconds, used only to pick auto intervals.
    pub fn approx_millis(self) -> i64 {
        match self {
            Self::Fixed(ms) => ms,
            Self::Calendar(CalendarUnit::Minute) => MINUTE_MS,
            Self::Calendar(CalendarUnit::Hour) => HOUR_MS,
            Self::Calendar(CalendarUnit::Day) => DAY_MS,
            Self::Calendar(CalendarUnit::Week) => 7 * DAY_MS,
            Self::Calendar(CalendarUnit::Month) => 30 * DAY_MS,
            Self::Calendar(CalendarUnit::Quarter) => 91 * DAY_MS,
            Self::Calendar(CalendarUnit::Year) => 365 * DAY_MS,
        }
    }
}

impl fmt::Display for DateInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(ms) => {
                let (n, unit) = [(DAY_MS, "d"), (HOUR_MS, "h"), (MINUTE_MS, "m"), (SECOND_MS, "s")]
                    .iter()
                    .find(|(size, _)| ms % size == 0)
                    .map(|(size, unit)| (ms / size, *unit))
                    .unwrap_or((*ms, "ms"));
                write!(f, "{n}{unit}")
            }
            Self::Calendar(unit) => f.write_str(unit.as_str()),
        }
    }
}

/// Candidate intervals for `auto_date_histogram`, smallest first.
pub const AUTO_INTERVALS: &[DateInterval] = &[
    DateInterval::Fixed(SECOND_MS),
    DateInterval::Fixed(5 * SECOND_MS),
    DateInterval::Fixed(10 * SECOND_MS),
    DateInterval::Fixed(30 * SECOND_MS),
    DateInterval::Fixed(MINUTE_MS),
    DateInterval::Fixed(5 * MINUTE_MS),
    DateInterval::Fixed(10 * MINUTE_MS),
    DateInterval::Fixed(30 * MINUTE_MS),
    DateInterval::Fixed(HOUR_MS),
    DateInterval::Fixed(3 * HOUR_MS),
    DateInterval::Fixed(12 * HOUR_MS),
    DateInterval::Fixed(DAY_MS),
    DateInterval::Fixed(7 * DAY_MS),
    DateInterval::Calendar(CalendarUnit::Month),
    DateInterval::Calendar(CalendarUnit::Quarter),
    DateInterval::Calendar(CalendarUnit::Year),
];

/// Smallest interval that splits `[from_ms, to_ms]` into at most `buckets`
/// buckets, or the largest candidate when none does.
pub fn choose_auto_interval(from_ms: i64, to_ms: i64, buckets: usize) -> DateInterval {
    let span = to_ms.saturating_sub(from_ms).max(0);
    let buckets = i64::try_from(buckets.max(1)).unwrap_or(i64::MAX);
    AUTO_INTERVALS
        .iter()
        .copied()
        .find(|interval| span / interval.approx_millis() < buckets)
        .unwrap_or(DateInterval::Calendar(CalendarUnit::Year))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fixed() {
        assert_eq!(DateInterval::parse_fixed("30s"), Some(DateInterval::Fixed(30_000)));
        assert_eq!(DateInterval::parse_fixed("2000ms"), Some(DateInterval::Fixed(2_000)));
        assert_eq!(DateInterval::parse_fixed("12h"), Some(DateInterval::Fixed(43_200_000)));
        assert_eq!(DateInterval::parse_fixed("0s"), None);
        assert_eq!(DateInterval::parse_fixed("1M"), None);
    }

    #[test]
    fn test_parse_fixed_rejects_overflowing_interval() {
        assert_eq!(DateInterval::parse_fixed("9999999999999999d"), None);
        assert_eq!(DateInterval::parse_fixed("99999999999999999999ms"), None);
        assert_eq!(
            DateInterval::parse_fixed("106751991167d"),
            Some(DateInterval::Fixed(106_751_991_167 * DAY_MS))
        );
    }

    #[test]
    fn test_parse_calendar_normalizes_short_units() {
        assert_eq!(DateInterval::parse_calendar("1h"), Some(DateInterval::Fixed(HOUR_MS)));
        assert_eq!(DateInterval::parse_calendar("day"), Some(DateInterval::Fixed(DAY_MS)));
        assert_eq!(
            DateInterval::parse_calendar("month"),
            Some(DateInterval::Calendar(CalendarUnit::Month))
        );
        assert_eq!(DateInterval::parse_calendar("2w"), None);
    }

    #[test]
    fn test_parse_legacy() {
        assert_eq!(
            DateInterval::parse_legacy("1y"),
            Some(DateInterval::Calendar(CalendarUnit::Year))
        );
        assert_eq!(DateInterval::parse_legacy("90m"), Some(DateInterval::Fixed(90 * MINUTE_MS)));
    }

    #[test]
    fn test_display() {
        assert_eq!(DateInterval::Fixed(30_000).to_string(), "30s");
        assert_eq!(DateInterval::Fixed(2_500).to_string(), "2500ms");
        assert_eq!(DateInterval::Fixed(DAY_MS).to_string(), "1d");
        assert_eq!(DateInterval::Calendar(CalendarUnit::Quarter).to_string(), "1q");
    }

    #[test]
    fn test_choose_auto_interval() {
        assert_eq!(choose_auto_interval(0, 15 * MINUTE_MS, 10), DateInterval::Fixed(5 * MINUTE_MS));
        assert_eq!(choose_auto_interval(0, 4 * DAY_MS, 10), DateInterval::Fixed(12 * HOUR_MS));
        assert_eq!(choose_auto_interval(0, 5 * DAY_MS, 10), DateInterval::Fixed(DAY_MS));
        assert_eq!(choose_auto_interval(0, 9 * SECOND_MS, 10), DateInterval::Fixed(SECOND_MS));
        assert_eq!(
            choose_auto_interval(0, 200 * 365 * DAY_MS, 10),
            DateInterval::Calendar(CalendarUnit::Year)
        );
    }
}
