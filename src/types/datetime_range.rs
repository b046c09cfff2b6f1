use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::types::into_utc_trait::IntoUtcDateTime;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DatetimeRangeError {
    #[error("Datetime range '{0}' must have exactly one '/', e.g. 2023-01-01/2023-12-31")]
    SlashCount(String),

    #[error("'{0}' in datetime range is not a YYYY-MM-DD date")]
    InvalidDate(String),

    #[error("Datetime range starts at {start} which is after its end {end}")]
    Reversed { start: NaiveDate, end: NaiveDate },
}

/// An inclusive range of whole days, written `YYYY-MM-DD/YYYY-MM-DD` as in STAC searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatetimeRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DatetimeRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DatetimeRangeError> {
        if start > end {
            return Err(DatetimeRangeError::Reversed { start, end });
        }
        Ok(Self { start, end })
    }

    /// January 1st through December 31st of `year`.
    pub fn year(year: i32) -> Option<Self> {
        Some(Self {
            start: NaiveDate::from_ymd_opt(year, 1, 1)?,
            end: NaiveDate::from_ymd_opt(year, 12, 31)?,
        })
    }

    /// Midnight UTC of the first day.
    pub fn start_utc(&self) -> DateTime<Utc> {
        self.start.into_utc()
    }

    /// Midnight UTC after the last day, exclusive.
    pub fn end_utc_exclusive(&self) -> DateTime<Utc> {
        self.end
            .checked_add_days(Days::new(1))
            .unwrap_or(self.end)
            .into_utc()
    }

    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        time >= self.start_utc() && time < self.end_utc_exclusive()
    }
}

impl FromStr for DatetimeRange {
    type Err = DatetimeRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (start, end) = match s.split_once('/') {
            Some((start, end)) if !end.contains('/') => (start, end),
            _ => return Err(DatetimeRangeError::SlashCount(s.to_string())),
        };
        let parse = |part: &str| {
            NaiveDate::parse_from_str(part.trim(), "%Y-%m-%d")
                .map_err(|_| DatetimeRangeError::InvalidDate(part.to_string()))
        };
        Self::new(parse(start)?, parse(end)?)
    }
}

impl TryFrom<String> for DatetimeRange {
    type Error = DatetimeRangeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DatetimeRange> for String {
    fn from(value: DatetimeRange) -> Self {
        value.to_string()
    }
}

impl fmt::Display for DatetimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_and_displays() {
        let range: DatetimeRange = "2023-01-01/2023-03-31".parse().unwrap();
        assert_eq!(range.start, date(2023, 1, 1));
        assert_eq!(range.end, date(2023, 3, 31));
        assert_eq!(range.to_string(), "2023-01-01/2023-03-31");
    }

    #[test]
    fn rejects_malformed_ranges() {
        assert_eq!(
            "2023-01-01".parse::<DatetimeRange>(),
            Err(DatetimeRangeError::SlashCount("2023-01-01".into()))
        );
        assert!(matches!(
            "2023-01-01/2023-02-01/2023-03-01".parse::<DatetimeRange>(),
            Err(DatetimeRangeError::SlashCount(_))
        ));
        assert_eq!(
            "2023-01-01/March".parse::<DatetimeRange>(),
            Err(DatetimeRangeError::InvalidDate("March".into()))
        );
        assert!(matches!(
            "2023-02-01/2023-01-01".parse::<DatetimeRange>(),
            Err(DatetimeRangeError::Reversed { .. })
        ));
    }

    #[test]
    fn end_day_is_inclusive() {
        let range = DatetimeRange::year(2023).unwrap();
        assert!(range.contains(Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 0).unwrap()));
        assert!(!range.contains(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        assert!(!range.contains(Utc.with_ymd_and_hms(2022, 12, 31, 23, 0, 0).unwrap()));
    }

    #[test]
    fn deserializes_from_yaml_string() {
        let range: DatetimeRange = serde_yaml::from_str("'2023-06-01/2023-06-30'").unwrap();
        assert_eq!(range, DatetimeRange::new(date(2023, 6, 1), date(2023, 6, 30)).unwrap());
        assert!(serde_yaml::from_str::<DatetimeRange>("'2023-06-01'").is_err());
    }
}
