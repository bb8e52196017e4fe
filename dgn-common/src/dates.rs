//! Calendar date utilities
//!
//! Parameter files carry day-granularity dates as text. The canonical form is
//! `D-Mon-YY` (`17-Dec-25`, day not zero-padded). On input we also accept:
//! - `DD-Mon-YYYY` (four digit year)
//! - ISO `YYYY-MM-DD`
//! - ISO with a time suffix (`2025-12-17T10:30:00Z`, `2025-12-17 10:30`)
//!
//! The time suffix is stripped before the format is detected. Anything else is
//! a [`DateParseError`]; there is no silent recovery.
//!
//! Two-digit years always read as 20xx, so years outside 2000-2099 are
//! emitted with four digits (`17-Dec-1999`).
//!
//! Internally every date is a [`chrono::NaiveDate`], so day arithmetic walks
//! calendar days and never drifts across DST transitions.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

use crate::{Error, Result};

/// Month abbreviations used by the canonical format
const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Unparseable date text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unparseable date: {input:?}")]
pub struct DateParseError {
    /// The text exactly as supplied by the caller
    pub input: String,
}

/// Parse date text in any accepted format
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use dgn_common::dates::parse_date;
///
/// let expected = NaiveDate::from_ymd_opt(2025, 12, 17).unwrap();
/// assert_eq!(parse_date("17-Dec-25").unwrap(), expected);
/// assert_eq!(parse_date("2025-12-17").unwrap(), expected);
/// assert_eq!(parse_date("2025-12-17T23:59:59.000Z").unwrap(), expected);
/// assert!(parse_date("Dec 17th").is_err());
/// ```
pub fn parse_date(text: &str) -> std::result::Result<NaiveDate, DateParseError> {
    let day_part = strip_time_suffix(text.trim());

    parse_iso(day_part)
        .or_else(|| parse_day_month_year(day_part))
        .ok_or_else(|| DateParseError {
            input: text.to_string(),
        })
}

/// Format a date in canonical `D-Mon-YY` form
///
/// ```
/// use chrono::NaiveDate;
/// use dgn_common::dates::format_date;
///
/// assert_eq!(format_date(NaiveDate::from_ymd_opt(2025, 12, 1).unwrap()), "1-Dec-25");
/// assert_eq!(format_date(NaiveDate::from_ymd_opt(1999, 12, 1).unwrap()), "1-Dec-1999");
/// ```
pub fn format_date(date: NaiveDate) -> String {
    let month = MONTHS[date.month0() as usize];
    match date.year() {
        year @ 2000..=2099 => format!("{}-{}-{:02}", date.day(), month, year - 2000),
        year => format!("{}-{}-{}", date.day(), month, year),
    }
}

/// Parse any accepted format and re-emit canonical text
pub fn normalize_date(text: &str) -> std::result::Result<String, DateParseError> {
    parse_date(text).map(format_date)
}

/// Whole calendar days from `earlier` to `later` (negative if reversed)
pub fn days_between(earlier: NaiveDate, later: NaiveDate) -> i64 {
    (later - earlier).num_days()
}

/// Shift a date by a signed number of days
///
/// Saturates at [`NaiveDate::MIN`] / [`NaiveDate::MAX`] instead of
/// overflowing.
pub fn add_days(date: NaiveDate, days: i64) -> NaiveDate {
    Duration::try_days(days)
        .and_then(|delta| date.checked_add_signed(delta))
        .unwrap_or(if days < 0 { NaiveDate::MIN } else { NaiveDate::MAX })
}

fn strip_time_suffix(text: &str) -> &str {
    // A space never appears inside a date, so anything after it is time.
    let text = match text.find(' ') {
        Some(idx) => &text[..idx],
        None => text,
    };

    // 'T' only separates time in ISO text; "17-OCT-25" must survive intact.
    match text.find('T') {
        Some(idx) if text[..idx].chars().all(|c| c.is_ascii_digit() || c == '-') => &text[..idx],
        _ => text,
    }
}

fn parse_iso(text: &str) -> Option<NaiveDate> {
    let mut parts = text.split('-');
    let (year, month, day) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || year.len() != 4 {
        return None;
    }

    NaiveDate::from_ymd_opt(
        parse_digits(year)? as i32,
        parse_digits(month)?,
        parse_digits(day)?,
    )
}

fn parse_day_month_year(text: &str) -> Option<NaiveDate> {
    let mut parts = text.split('-');
    let (day, month, year) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || day.is_empty() || day.len() > 2 {
        return None;
    }

    let month = MONTHS
        .iter()
        .position(|m| m.eq_ignore_ascii_case(month))? as u32
        + 1;

    let year = match year.len() {
        2 => 2000 + parse_digits(year)? as i32,
        4 => parse_digits(year)? as i32,
        _ => return None,
    };

    NaiveDate::from_ymd_opt(year, month, parse_digits(day)?)
}

fn parse_digits(text: &str) -> Option<u32> {
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

/// Inclusive day-granularity date range
///
/// Serialized as canonical text: `{"start": "1-Dec-25", "end": "7-Dec-25"}`.
/// Deserialization applies the same `start <= end` check as [`DateRange::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawDateRange")]
pub struct DateRange {
    #[serde(with = "serde_day")]
    pub start: NaiveDate,
    #[serde(with = "serde_day")]
    pub end: NaiveDate,
}

impl DateRange {
    /// Create a range, rejecting `start > end`
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidInput(format!(
                "Date range start {} is after end {}",
                format_date(start),
                format_date(end)
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse both endpoints from text
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    /// Range covering a single day
    pub fn single(day: NaiveDate) -> Self {
        Self {
            start: day,
            end: day,
        }
    }

    /// Whether `day` falls inside the range (inclusive)
    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// Whether `other` lies entirely inside this range
    pub fn contains_range(&self, other: &DateRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Walk every day in the range
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |day| *day <= end)
    }
}

/// Unchecked wire form of [`DateRange`]
#[derive(Deserialize)]
struct RawDateRange {
    #[serde(with = "serde_day")]
    start: NaiveDate,
    #[serde(with = "serde_day")]
    end: NaiveDate,
}

impl TryFrom<RawDateRange> for DateRange {
    type Error = Error;

    fn try_from(raw: RawDateRange) -> Result<Self> {
        DateRange::new(raw.start, raw.end)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", format_date(self.start), format_date(self.end))
    }
}

/// Serde adapter: `NaiveDate` as canonical text, any accepted format on input
pub mod serde_day {
    use super::*;

    pub fn serialize<S: Serializer>(date: &NaiveDate, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&format_date(*date))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<NaiveDate, D::Error> {
        let text = String::deserialize(d)?;
        parse_date(&text).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for `Option<NaiveDate>`
pub mod serde_opt_day {
    use super::*;

    pub fn serialize<S: Serializer>(
        date: &Option<NaiveDate>,
        s: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match date {
            Some(date) => s.serialize_some(&format_date(*date)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<Option<NaiveDate>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|text| parse_date(&text).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Serde adapter for `Vec<NaiveDate>`
pub mod serde_days {
    use super::*;
    use serde::ser::SerializeSeq;

    pub fn serialize<S: Serializer>(dates: &[NaiveDate], s: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = s.serialize_seq(Some(dates.len()))?;
        for date in dates {
            seq.serialize_element(&format_date(*date))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<Vec<NaiveDate>, D::Error> {
        Vec::<String>::deserialize(d)?
            .iter()
            .map(|text| parse_date(text).map_err(serde::de::Error::custom))
            .collect()
    }
}
