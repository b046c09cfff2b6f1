//! In-memory raster time series: a `(time, band, y, x)` cube with its coordinate vectors.
//!
//! Coordinates are in EPSG:4326 (y = latitude, x = longitude). Missing pixels are `NaN`.

use crate::matchup::series::RasterSample;
use crate::raster::error::RasterError;
use chrono::{DateTime, Utc};
use ndarray::{Array3, Array4, ArrayView3, Axis};

#[derive(Debug, Clone, PartialEq)]
pub struct RasterStack {
    times: Vec<DateTime<Utc>>,
    bands: Vec<String>,
    y: Vec<f64>,
    x: Vec<f64>,
    data: Array4<f32>,
}

impl RasterStack {
    /// Builds a stack, checking that `data` has shape `(times, bands, y, x)`.
    pub fn new(
        times: Vec<DateTime<Utc>>,
        bands: Vec<String>,
        y: Vec<f64>,
        x: Vec<f64>,
        data: Array4<f32>,
    ) -> Result<Self, RasterError> {
        let expected = (times.len(), bands.len(), y.len(), x.len());
        let found = data.dim();
        if expected != found {
            return Err(RasterError::ShapeMismatch { expected, found });
        }
        Ok(Self {
            times,
            bands,
            y,
            x,
            data,
        })
    }

    pub fn times(&self) -> &[DateTime<Utc>] {
        &self.times
    }

    pub fn bands(&self) -> &[String] {
        &self.bands
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn data(&self) -> &Array4<f32> {
        &self.data
    }

    pub fn has_band(&self, band: &str) -> bool {
        self.bands.iter().any(|b| b == band)
    }

    pub fn band_index(&self, band: &str) -> Result<usize, RasterError> {
        self.bands
            .iter()
            .position(|b| b == band)
            .ok_or_else(|| RasterError::BandNotFound(band.to_string()))
    }

    /// A `(time, y, x)` view of one band.
    pub fn band(&self, band: &str) -> Result<ArrayView3<'_, f32>, RasterError> {
        let b = self.band_index(band)?;
        Ok(self.data.index_axis(Axis(1), b))
    }

    /// Index of the time step closest to `time`; on an exact tie the later time step wins.
    pub fn nearest_time_index(&self, time: DateTime<Utc>) -> Option<usize> {
        let mut best: Option<(usize, chrono::Duration)> = None;
        for (i, t) in self.times.iter().enumerate() {
            let gap = (time - *t).abs();
            best = match best {
                Some((bi, bg)) if gap > bg || (gap == bg && *t < self.times[bi]) => Some((bi, bg)),
                _ => Some((i, gap)),
            };
        }
        best.map(|(i, _)| i)
    }

    /// The pixel whose centre is nearest to the location. Points outside the grid snap to the
    /// edge pixel.
    pub fn pixel_index(&self, latitude: f64, longitude: f64) -> Option<(usize, usize)> {
        Some((
            nearest_index(&self.y, latitude)?,
            nearest_index(&self.x, longitude)?,
        ))
    }

    /// The full time series of one band at the pixel nearest to a location.
    pub fn pixel_series(
        &self,
        band: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<Vec<RasterSample>, RasterError> {
        let view = self.band(band)?;
        let Some((iy, ix)) = self.pixel_index(latitude, longitude) else {
            return Ok(Vec::new());
        };
        Ok(self
            .times
            .iter()
            .enumerate()
            .map(|(t, time)| RasterSample {
                time: *time,
                value: finite(view[[t, iy, ix]]),
            })
            .collect())
    }

    /// Nearest-neighbour lookup on all three dimensions at once.
    pub fn select_nearest(
        &self,
        band: &str,
        time: DateTime<Utc>,
        latitude: f64,
        longitude: f64,
    ) -> Result<Option<RasterSample>, RasterError> {
        let view = self.band(band)?;
        let (Some(t), Some((iy, ix))) = (
            self.nearest_time_index(time),
            self.pixel_index(latitude, longitude),
        ) else {
            return Ok(None);
        };
        Ok(Some(RasterSample {
            time: self.times[t],
            value: finite(view[[t, iy, ix]]),
        }))
    }

    pub fn drop_band(self, band: &str) -> Result<Self, RasterError> {
        let b = self.band_index(band)?;
        let keep: Vec<usize> = (0..self.bands.len()).filter(|&i| i != b).collect();
        let data = self.data.select(Axis(1), &keep);
        let bands = keep.iter().map(|&i| self.bands[i].clone()).collect();
        Ok(Self {
            bands,
            data,
            ..self
        })
    }

    /// Keeps the listed time steps, in the listed order.
    pub fn select_times(self, indices: &[usize]) -> Self {
        let data = self.data.select(Axis(0), indices);
        let times = indices.iter().map(|&i| self.times[i]).collect();
        Self {
            times,
            data,
            ..self
        }
    }

    /// Replaces the time coordinate.
    pub fn with_times(self, times: Vec<DateTime<Utc>>) -> Result<Self, RasterError> {
        if times.len() != self.times.len() {
            return Err(RasterError::CoordinateLength {
                axis: "time",
                expected: self.times.len(),
                found: times.len(),
            });
        }
        Ok(Self { times, ..self })
    }

    pub fn sort_by_time(self) -> Self {
        let mut order: Vec<usize> = (0..self.times.len()).collect();
        order.sort_by_key(|&i| self.times[i]);
        self.select_times(&order)
    }

    /// Collapses time steps that share a timestamp into their NaN-skipping mean.
    /// The result is sorted by time.
    pub fn group_by_time_mean(self) -> Self {
        let sorted = self.sort_by_time();

        let mut groups: Vec<(DateTime<Utc>, Vec<usize>)> = Vec::new();
        for (i, t) in sorted.times.iter().enumerate() {
            match groups.last_mut() {
                Some((gt, members)) if gt == t => members.push(i),
                _ => groups.push((*t, vec![i])),
            }
        }
        if groups.len() == sorted.times.len() {
            return sorted;
        }

        let (_, nb, ny, nx) = sorted.data.dim();
        let mut data = Array4::from_elem((groups.len(), nb, ny, nx), f32::NAN);
        for (g, (_, members)) in groups.iter().enumerate() {
            for b in 0..nb {
                for i in 0..ny {
                    for j in 0..nx {
                        data[[g, b, i, j]] =
                            nanmean(members.iter().map(|&t| sorted.data[[t, b, i, j]]));
                    }
                }
            }
        }

        Self {
            times: groups.into_iter().map(|(t, _)| t).collect(),
            data,
            ..sorted
        }
    }

    /// NaN-skipping mean over the time axis, shaped `(band, y, x)`.
    pub fn mean_over_time(&self) -> Array3<f32> {
        let (nt, nb, ny, nx) = self.data.dim();
        Array3::from_shape_fn((nb, ny, nx), |(b, i, j)| {
            nanmean((0..nt).map(|t| self.data[[t, b, i, j]]))
        })
    }

    /// Resamples onto a target grid by nearest neighbour. Target cells farther than half a
    /// source pixel outside the source grid become `NaN`.
    pub fn regrid_nearest(&self, target_y: &[f64], target_x: &[f64]) -> Self {
        let iy: Vec<Option<usize>> = target_y.iter().map(|&v| index_within(&self.y, v)).collect();
        let ix: Vec<Option<usize>> = target_x.iter().map(|&v| index_within(&self.x, v)).collect();

        let (nt, nb, _, _) = self.data.dim();
        let mut data = Array4::from_elem((nt, nb, target_y.len(), target_x.len()), f32::NAN);
        for t in 0..nt {
            for b in 0..nb {
                for (ti, sy) in iy.iter().enumerate() {
                    let Some(sy) = sy else { continue };
                    for (tj, sx) in ix.iter().enumerate() {
                        if let Some(sx) = sx {
                            data[[t, b, ti, tj]] = self.data[[t, b, *sy, *sx]];
                        }
                    }
                }
            }
        }

        Self {
            times: self.times.clone(),
            bands: self.bands.clone(),
            y: target_y.to_vec(),
            x: target_x.to_vec(),
            data,
        }
    }
}

pub(crate) fn finite(value: f32) -> Option<f64> {
    value.is_finite().then_some(value as f64)
}

pub(crate) fn nanmean<I: IntoIterator<Item = f32>>(values: I) -> f32 {
    let (sum, count) = values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold((0.0f64, 0usize), |(s, c), v| (s + v as f64, c + 1));
    if count == 0 {
        f32::NAN
    } else {
        (sum / count as f64) as f32
    }
}

/// Index of the coordinate closest to `value`; the first one wins a tie.
pub(crate) fn nearest_index(coords: &[f64], value: f64) -> Option<usize> {
    coords
        .iter()
        .enumerate()
        .filter(|(_, c)| !c.is_nan())
        .fold(None, |best: Option<(usize, f64)>, (i, c)| {
            let gap = (c - value).abs();
            match best {
                Some((_, bg)) if bg <= gap => best,
                _ => Some((i, gap)),
            }
        })
        .map(|(i, _)| i)
}

/// Like [`nearest_index`] but only when `value` lies within half a pixel of the grid.
fn index_within(coords: &[f64], value: f64) -> Option<usize> {
    let i = nearest_index(coords, value)?;
    let half_pixel = if coords.len() > 1 {
        let span = (coords[coords.len() - 1] - coords[0]).abs();
        span / (coords.len() - 1) as f64 / 2.0
    } else {
        0.0
    };
    ((coords[i] - value).abs() <= half_pixel + 1e-9).then_some(i)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn day(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, d, h, 0, 0).unwrap()
    }

    /// 3 time steps, bands [lst, qc], 2x3 grid. lst = t*100 + i*10 + j.
    pub(crate) fn sample_stack() -> RasterStack {
        let data = Array4::from_shape_fn((3, 2, 2, 3), |(t, b, i, j)| {
            if b == 0 {
                (t * 100 + i * 10 + j) as f32
            } else {
                0.0
            }
        });
        RasterStack::new(
            vec![day(1, 10), day(2, 10), day(3, 10)],
            vec!["lst".into(), "qc".into()],
            vec![-30.0, -30.01],
            vec![25.0, 25.01, 25.02],
            data,
        )
        .unwrap()
    }

    #[test]
    fn rejects_mismatched_shape() {
        let err = RasterStack::new(
            vec![day(1, 0)],
            vec!["a".into()],
            vec![0.0, 1.0],
            vec![0.0],
            Array4::zeros((1, 1, 1, 1)),
        )
        .unwrap_err();
        assert!(matches!(err, RasterError::ShapeMismatch { .. }));
    }

    #[test]
    fn pixel_series_uses_nearest_pixel() {
        let stack = sample_stack();
        let series = stack.pixel_series("lst", -30.009, 25.011).unwrap();
        let values: Vec<_> = series.iter().map(|s| s.value.unwrap()).collect();
        assert_eq!(values, vec![11.0, 111.0, 211.0]);

        // far outside the grid snaps to the edge
        let edge = stack.pixel_series("lst", -10.0, 0.0).unwrap();
        assert_eq!(edge[0].value, Some(0.0));
    }

    #[test]
    fn nan_pixels_become_missing() {
        let mut stack = sample_stack();
        stack.data[[1, 0, 0, 0]] = f32::NAN;
        let series = stack.pixel_series("lst", -30.0, 25.0).unwrap();
        assert_eq!(series[1].value, None);
    }

    #[test]
    fn unknown_band_is_an_error() {
        let err = sample_stack().pixel_series("nope", 0.0, 0.0).unwrap_err();
        assert!(matches!(err, RasterError::BandNotFound(b) if b == "nope"));
    }

    #[test]
    fn select_nearest_picks_closest_time() {
        let stack = sample_stack();
        let hit = stack
            .select_nearest("lst", day(3, 2), -30.0, 25.02)
            .unwrap()
            .unwrap();
        assert_eq!(hit.time, day(3, 10));
        assert_eq!(hit.value, Some(202.0));
    }

    #[test]
    fn drop_band_keeps_other_bands() {
        let stack = sample_stack().drop_band("qc").unwrap();
        assert_eq!(stack.bands(), ["lst".to_string()]);
        assert_eq!(stack.data().dim(), (3, 1, 2, 3));
        assert_eq!(stack.data()[[2, 0, 1, 2]], 212.0);
    }

    #[test]
    fn group_by_time_mean_merges_duplicates() {
        let stack = sample_stack()
            .with_times(vec![day(2, 10), day(1, 10), day(2, 10)])
            .unwrap()
            .group_by_time_mean();
        assert_eq!(stack.times(), [day(1, 10), day(2, 10)]);
        // mean of t=0 and t=2 slices
        assert_eq!(stack.data()[[1, 0, 0, 0]], 100.0);
        assert_eq!(stack.data()[[0, 0, 0, 0]], 100.0);
    }

    #[test]
    fn group_mean_skips_nan() {
        let mut stack = sample_stack()
            .with_times(vec![day(1, 10), day(1, 10), day(3, 10)])
            .unwrap();
        stack.data[[0, 0, 0, 0]] = f32::NAN;
        let grouped = stack.group_by_time_mean();
        assert_eq!(grouped.data()[[0, 0, 0, 0]], 100.0);
    }

    #[test]
    fn regrid_nearest_fills_outside_with_nan() {
        let stack = sample_stack();
        let out = stack.regrid_nearest(&[-30.0, -30.2], &[25.019, 26.0]);
        assert_eq!(out.data().dim(), (3, 2, 2, 2));
        assert_eq!(out.data()[[0, 0, 0, 0]], 2.0);
        assert!(out.data()[[0, 0, 1, 0]].is_nan());
        assert!(out.data()[[0, 0, 0, 1]].is_nan());
    }

    #[test]
    fn nanmean_of_all_nan_is_nan() {
        assert!(nanmean([f32::NAN, f32::NAN]).is_nan());
        assert_eq!(nanmean([1.0, f32::NAN, 3.0]), 2.0);
    }
}
