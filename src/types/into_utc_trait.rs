use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Anything that can be pinned to a UTC instant. Naive values are taken to already be UTC,
/// which is how GHCNh timestamps are recorded.
pub trait IntoUtcDateTime {
    fn into_utc(self) -> DateTime<Utc>;
}

impl IntoUtcDateTime for NaiveDateTime {
    fn into_utc(self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self)
    }
}

/// Midnight UTC.
impl IntoUtcDateTime for NaiveDate {
    fn into_utc(self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.and_time(chrono::NaiveTime::MIN))
    }
}

impl IntoUtcDateTime for DateTime<Utc> {
    fn into_utc(self) -> DateTime<Utc> {
        self
    }
}

impl IntoUtcDateTime for DateTime<Local> {
    fn into_utc(self) -> DateTime<Utc> {
        self.with_timezone(&Utc)
    }
}

impl IntoUtcDateTime for DateTime<FixedOffset> {
    fn into_utc(self) -> DateTime<Utc> {
        self.with_timezone(&Utc)
    }
}

/// Converts a polars millisecond timestamp.
pub fn utc_from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naive_values_are_utc() {
        let date = NaiveDate::from_ymd_opt(2023, 6, 1).unwrap();
        let utc = date.into_utc();
        assert_eq!(utc.to_rfc3339(), "2023-06-01T00:00:00+00:00");
        assert_eq!(date.and_hms_opt(0, 0, 0).unwrap().into_utc(), utc);
    }

    #[test]
    fn offsets_are_normalised() {
        let sast = FixedOffset::east_opt(2 * 3600).unwrap();
        let local = sast.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(local.into_utc().to_rfc3339(), "2023-06-01T10:00:00+00:00");
    }

    #[test]
    fn millis_round_trip() {
        let t = Utc.with_ymd_and_hms(2020, 2, 29, 13, 0, 0).unwrap();
        assert_eq!(utc_from_millis(t.timestamp_millis()), Some(t));
        assert_eq!(utc_from_millis(i64::MAX), None);
    }
}
