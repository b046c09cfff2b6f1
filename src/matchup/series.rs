//! Time-window matchup of one station's observations against one raster pixel's time series.
//!
//! Both series are sorted once and then walked with two linear merge scans: one to find the
//! chronologically nearest raster sample for every observation, one to find the most recent
//! strictly-earlier observation inside the previous-step window.

use crate::matchup::error::MatchupError;
use crate::types::into_utc_trait::IntoUtcDateTime;
use chrono::{DateTime, Duration, Utc};

/// A single station reading. `payload` is whatever the caller wants carried through the join,
/// usually the row index into a station frame or the measured value itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation<T> {
    pub time: DateTime<Utc>,
    pub payload: T,
}

impl<T> Observation<T> {
    pub fn new(time: impl IntoUtcDateTime, payload: T) -> Self {
        Self {
            time: time.into_utc(),
            payload,
        }
    }
}

/// One raster pixel value at one acquisition time. `None` marks a missing (NaN) pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterSample {
    pub time: DateTime<Utc>,
    pub value: Option<f64>,
}

impl RasterSample {
    pub fn new(time: impl IntoUtcDateTime, value: Option<f64>) -> Self {
        Self {
            time: time.into_utc(),
            value,
        }
    }
}

/// Controls how strictly observations and raster samples are paired.
///
/// The default is a pure left join: every observation yields exactly one record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchupOptions {
    /// Maximum gap between an observation and the previous observation attached to it.
    pub previous_window: Duration,
    /// When set, raster samples further than this from the observation are reported as absent.
    pub max_raster_offset: Option<Duration>,
    /// Drop records that have no previous observation.
    pub require_previous: bool,
    /// Drop records whose matched raster value is missing.
    pub drop_missing_raster: bool,
}

impl Default for MatchupOptions {
    fn default() -> Self {
        Self {
            previous_window: Duration::hours(4),
            max_raster_offset: None,
            require_previous: false,
            drop_missing_raster: false,
        }
    }
}

impl MatchupOptions {
    /// Only keeps observations within one hour of an overpass that also have a reading from
    /// the preceding four hours and a valid pixel. This is the training-table filter.
    pub fn strict() -> Self {
        Self {
            previous_window: Duration::hours(4),
            max_raster_offset: Some(Duration::hours(1)),
            require_previous: true,
            drop_missing_raster: true,
        }
    }

    pub fn validate(&self) -> Result<(), MatchupError> {
        if self.previous_window < Duration::zero() {
            return Err(MatchupError::NegativeWindow(self.previous_window));
        }
        if let Some(offset) = self.max_raster_offset {
            if offset < Duration::zero() {
                return Err(MatchupError::NegativeOffset(offset));
            }
        }
        Ok(())
    }

    /// Whether a record survives the row filters of these options.
    fn keeps<T>(&self, record: &MatchupRecord<T>) -> bool {
        if self.require_previous && record.previous.is_none() {
            return false;
        }
        if self.drop_missing_raster && record.raster_value.is_none() {
            return false;
        }
        true
    }
}

/// The joined result for one station observation.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchupRecord<T> {
    pub station_time: DateTime<Utc>,
    pub station: T,
    pub raster_time: Option<DateTime<Utc>>,
    pub raster_value: Option<f64>,
    pub previous: Option<Observation<T>>,
}

impl<T> MatchupRecord<T> {
    /// Signed offset of the raster acquisition relative to the observation.
    pub fn raster_offset(&self) -> Option<Duration> {
        self.raster_time.map(|rt| self.station_time - rt)
    }

    pub fn is_complete(&self) -> bool {
        self.raster_value.is_some() && self.previous.is_some()
    }
}

/// Joins a station series with a raster series.
///
/// With default options the output has one record per input observation, in input order.
pub fn match_series<T: Clone>(
    station: &[Observation<T>],
    raster: &[RasterSample],
    options: &MatchupOptions,
) -> Result<Vec<MatchupRecord<T>>, MatchupError> {
    options.validate()?;

    let mut order: Vec<usize> = (0..station.len()).collect();
    order.sort_by_key(|&i| station[i].time);

    let mut raster_sorted = raster.to_vec();
    raster_sorted.sort_by_key(|s| s.time);

    let nearest = nearest_raster(station, &order, &raster_sorted);
    let previous = previous_within(station, &order, options.previous_window);

    let records = station
        .iter()
        .enumerate()
        .map(|(i, obs)| {
            let matched = nearest[i].filter(|sample| match options.max_raster_offset {
                Some(max) => (obs.time - sample.time).abs() <= max,
                None => true,
            });
            MatchupRecord {
                station_time: obs.time,
                station: obs.payload.clone(),
                raster_time: matched.map(|s| s.time),
                raster_value: matched.and_then(|s| s.value),
                previous: previous[i].map(|p| station[p].clone()),
            }
        })
        .filter(|record| options.keeps(record))
        .collect();

    Ok(records)
}

/// For every observation (visited in time order) the nearest raster sample.
/// On an exact tie the later sample wins.
fn nearest_raster<T>(
    station: &[Observation<T>],
    order: &[usize],
    raster: &[RasterSample],
) -> Vec<Option<RasterSample>> {
    let mut nearest = vec![None; station.len()];
    if raster.is_empty() {
        return nearest;
    }

    let mut j = 0;
    for &i in order {
        let t = station[i].time;
        while j + 1 < raster.len() && raster[j + 1].time <= t {
            j += 1;
        }
        let left = raster[j];
        let chosen = if left.time > t || j + 1 == raster.len() {
            left
        } else {
            let right = raster[j + 1];
            if t - left.time < right.time - t {
                left
            } else {
                right
            }
        };
        nearest[i] = Some(chosen);
    }
    nearest
}

/// For every observation the index of the latest strictly-earlier observation within `window`.
fn previous_within<T>(
    station: &[Observation<T>],
    order: &[usize],
    window: Duration,
) -> Vec<Option<usize>> {
    let mut previous = vec![None; station.len()];
    // start of the run of equal timestamps the current position belongs to
    let mut group_start = 0;
    for (pos, &i) in order.iter().enumerate() {
        if pos > 0 && station[order[pos - 1]].time < station[i].time {
            group_start = pos;
        }
        if group_start == 0 {
            continue;
        }
        let candidate = order[group_start - 1];
        if station[i].time - station[candidate].time <= window {
            previous[i] = Some(candidate);
        }
    }
    previous
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 10, h, m, 0).unwrap()
    }

    fn obs(h: u32, m: u32, v: f64) -> Observation<f64> {
        Observation::new(at(h, m), v)
    }

    fn sample(h: u32, m: u32, v: f64) -> RasterSample {
        RasterSample::new(at(h, m), Some(v))
    }

    #[test]
    fn preserves_row_count_and_order() {
        let station = vec![obs(9, 0, 3.0), obs(3, 0, 1.0), obs(6, 0, 2.0), obs(23, 0, 4.0)];
        let raster = vec![sample(10, 30, 300.0), sample(1, 0, 280.0)];
        let out = match_series(&station, &raster, &MatchupOptions::default()).unwrap();

        assert_eq!(out.len(), station.len());
        let payloads: Vec<f64> = out.iter().map(|r| r.station).collect();
        assert_eq!(payloads, vec![3.0, 1.0, 2.0, 4.0]);
    }

    #[test]
    fn picks_chronologically_nearest_raster_sample() {
        let station = vec![obs(2, 0, 0.0), obs(5, 0, 0.0), obs(9, 0, 0.0), obs(12, 0, 0.0)];
        let raster = vec![sample(1, 0, 1.0), sample(6, 0, 2.0), sample(10, 0, 3.0)];
        let out = match_series(&station, &raster, &MatchupOptions::default()).unwrap();

        let matched: Vec<_> = out.iter().map(|r| r.raster_time.unwrap()).collect();
        assert_eq!(matched, vec![at(1, 0), at(6, 0), at(10, 0), at(10, 0)]);
        assert_eq!(out[1].raster_value, Some(2.0));
    }

    #[test]
    fn nearest_matches_brute_force() {
        let station: Vec<_> = (0..24).map(|h| obs(h, 17, h as f64)).collect();
        let raster = vec![
            sample(0, 40, 1.0),
            sample(4, 5, 2.0),
            sample(11, 50, 3.0),
            sample(12, 10, 4.0),
            sample(20, 0, 5.0),
        ];
        let out = match_series(&station, &raster, &MatchupOptions::default()).unwrap();
        for record in &out {
            let best = raster
                .iter()
                .map(|s| (record.station_time - s.time).abs())
                .min()
                .unwrap();
            let got = (record.station_time - record.raster_time.unwrap()).abs();
            assert_eq!(got, best, "at {}", record.station_time);
        }
    }

    #[test]
    fn exact_tie_prefers_later_sample() {
        let station = vec![obs(5, 0, 0.0)];
        let raster = vec![sample(4, 0, 1.0), sample(6, 0, 2.0)];
        let out = match_series(&station, &raster, &MatchupOptions::default()).unwrap();
        assert_eq!(out[0].raster_time, Some(at(6, 0)));
    }

    #[test]
    fn previous_is_strictly_earlier_and_within_window() {
        let station = vec![
            obs(0, 0, 1.0),
            obs(3, 0, 2.0),
            obs(3, 0, 2.5),
            obs(8, 0, 3.0),
            obs(11, 59, 4.0),
        ];
        let out = match_series(&station, &[], &MatchupOptions::default()).unwrap();

        assert!(out[0].previous.is_none());
        assert_eq!(out[1].previous.as_ref().unwrap().payload, 1.0);
        // equal timestamps never pair with each other
        assert_eq!(out[2].previous.as_ref().unwrap().payload, 1.0);
        // 5 hours after the last 03:00 reading
        assert!(out[3].previous.is_none());
        assert_eq!(out[4].previous.as_ref().unwrap().payload, 3.0);

        for record in &out {
            if let Some(prev) = &record.previous {
                assert!(prev.time < record.station_time);
                assert!(record.station_time - prev.time <= Duration::hours(4));
            }
        }
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let station = vec![obs(1, 0, 1.0), obs(5, 0, 2.0)];
        let out = match_series(&station, &[], &MatchupOptions::default()).unwrap();
        assert_eq!(out[1].previous.as_ref().unwrap().time, at(1, 0));
    }

    #[test]
    fn empty_raster_leaves_raster_columns_absent() {
        let station = vec![obs(1, 0, 1.0), obs(2, 0, 2.0)];
        let out = match_series(&station, &[], &MatchupOptions::default()).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r.raster_time.is_none() && r.raster_value.is_none()));
    }

    #[test]
    fn offset_tolerance_blanks_distant_matches() {
        let options = MatchupOptions {
            max_raster_offset: Some(Duration::hours(1)),
            ..Default::default()
        };
        let station = vec![obs(10, 30, 1.0), obs(14, 0, 2.0)];
        let raster = vec![sample(10, 0, 300.0)];
        let out = match_series(&station, &raster, &options).unwrap();
        assert_eq!(out[0].raster_value, Some(300.0));
        assert!(out[1].raster_time.is_none());
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn strict_options_keep_only_complete_records() {
        let station = vec![
            obs(7, 0, 1.0),
            obs(10, 0, 2.0),
            obs(13, 0, 3.0),
            obs(22, 0, 4.0),
        ];
        let raster = vec![
            sample(10, 30, 300.0),
            RasterSample::new(at(22, 0), None),
        ];
        let out = match_series(&station, &raster, &MatchupOptions::strict()).unwrap();

        assert_eq!(out.len(), 1);
        let record = &out[0];
        assert_eq!(record.station, 2.0);
        assert_eq!(record.previous.as_ref().unwrap().payload, 1.0);
        assert!(record.is_complete());
        assert_eq!(record.raster_offset(), Some(Duration::minutes(-30)));
    }

    #[test]
    fn rejects_negative_window() {
        let options = MatchupOptions {
            previous_window: Duration::hours(-1),
            ..Default::default()
        };
        let err = match_series::<f64>(&[], &[], &options).unwrap_err();
        assert!(matches!(err, MatchupError::NegativeWindow(_)));
    }
}
