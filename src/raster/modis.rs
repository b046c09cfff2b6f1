//! MODIS LST specific stack preparation.
//!
//! A raw MODIS stack carries one time step per tile acquisition (stamped with the acquisition
//! date), an LST band, a view-time band and a view-angle band. Preparing it means turning the
//! view-time band into real timestamps, merging tiles that share a timestamp and dropping
//! scenes viewed at extreme angles.

use crate::raster::error::RasterError;
use crate::raster::stack::{nanmean, RasterStack};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use ndarray::Axis;
use serde::Deserialize;

pub const DAY_VIEW_TIME: &str = "Day_view_time";
pub const NIGHT_VIEW_TIME: &str = "Night_view_time";

/// How the hours in the view-time band relate to UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewTimeBasis {
    /// Use the hour as-is.
    #[default]
    Utc,
    /// The hour is local solar time; shift by the scene's mean longitude / 15 to get UTC.
    LocalSolar,
}

/// Scene rejection rule for off-nadir views.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewAngleMask {
    pub band: String,
    /// Added to the angle band before taking the absolute value.
    pub zenith_offset: f64,
    pub max_view_angle: f64,
    /// Scenes whose share of bad pixels reaches this ratio are dropped.
    pub max_bad_ratio: f64,
}

impl Default for ViewAngleMask {
    fn default() -> Self {
        Self {
            band: "Day_view_angl".to_string(),
            zenith_offset: -65.0,
            max_view_angle: 40.0,
            max_bad_ratio: 0.1,
        }
    }
}

impl ViewAngleMask {
    pub fn with_max_view_angle(max_view_angle: f64) -> Self {
        Self {
            max_view_angle,
            ..Self::default()
        }
    }
}

/// Replaces each time step's acquisition date with the date plus its scene-mean view hour.
///
/// The stack must hold exactly one of [`DAY_VIEW_TIME`] and [`NIGHT_VIEW_TIME`]. That band is
/// dropped from the result, which is sorted by time. Scenes without any valid view-time pixel
/// cannot be placed in time and are dropped.
pub fn convert_view_time_to_coord(
    stack: RasterStack,
    basis: ViewTimeBasis,
) -> Result<RasterStack, RasterError> {
    let candidates = [DAY_VIEW_TIME, NIGHT_VIEW_TIME];
    let present: Vec<&str> = candidates
        .into_iter()
        .filter(|b| stack.has_band(b))
        .collect();
    let [band] = present.as_slice() else {
        return Err(RasterError::ViewTimeBands {
            found: present.len(),
        });
    };

    let shift_hours = match basis {
        ViewTimeBasis::Utc => 0.0,
        ViewTimeBasis::LocalSolar => -mean_coordinate(stack.x()) / 15.0,
    };

    let view = stack.band(band)?;
    let mut keep = Vec::with_capacity(stack.times().len());
    let mut times = Vec::with_capacity(stack.times().len());
    for (t, scene) in view.axis_iter(Axis(0)).enumerate() {
        let mean_hour = nanmean(scene.iter().copied()) as f64;
        if mean_hour.is_nan() {
            warn!(
                "Dropping scene acquired {} without valid {} pixels",
                stack.times()[t],
                band
            );
            continue;
        }
        keep.push(t);
        times.push(view_datetime(stack.times()[t], mean_hour + shift_hours));
    }

    debug!("Converted {} {} scenes to timestamps", times.len(), band);
    stack
        .drop_band(band)?
        .select_times(&keep)
        .with_times(times)
        .map(RasterStack::sort_by_time)
}

/// Midnight of the acquisition date plus the view hour rounded half-to-even.
fn view_datetime(acquired: DateTime<Utc>, hours: f64) -> DateTime<Utc> {
    let midnight = acquired
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|n| n.and_utc())
        .unwrap_or(acquired);
    midnight + Duration::hours(hours.round_ties_even() as i64)
}

fn mean_coordinate(coords: &[f64]) -> f64 {
    if coords.is_empty() {
        return 0.0;
    }
    coords.iter().sum::<f64>() / coords.len() as f64
}

/// Share of pixels per scene whose zenith angle exceeds the limit. NaN pixels count toward
/// neither side; a scene without any valid pixel yields NaN.
pub fn bad_view_angle_ratios(
    stack: &RasterStack,
    mask: &ViewAngleMask,
) -> Result<Vec<f64>, RasterError> {
    let view = stack.band(&mask.band)?;
    Ok(view
        .axis_iter(Axis(0))
        .map(|scene| {
            let (bad, good) = scene
                .iter()
                .filter(|v| !v.is_nan())
                .map(|&v| (v as f64 + mask.zenith_offset).abs())
                .fold((0usize, 0usize), |(bad, good), zenith| {
                    if zenith > mask.max_view_angle {
                        (bad + 1, good)
                    } else {
                        (bad, good + 1)
                    }
                });
            bad as f64 / (bad + good) as f64
        })
        .collect())
}

/// Drops scenes with too many off-nadir pixels and then the angle band itself.
pub fn mask_bad_view_angles(
    stack: RasterStack,
    mask: &ViewAngleMask,
) -> Result<RasterStack, RasterError> {
    let ratios = bad_view_angle_ratios(&stack, mask)?;
    let keep: Vec<usize> = ratios
        .iter()
        .enumerate()
        .filter(|(_, r)| **r < mask.max_bad_ratio)
        .map(|(i, _)| i)
        .collect();

    info!(
        "Keeping {} of {} scenes with view angles within {} degrees",
        keep.len(),
        ratios.len(),
        mask.max_view_angle
    );
    stack.select_times(&keep).drop_band(&mask.band)
}

/// View-time conversion, same-time aggregation and optional view-angle masking, in that order.
pub fn prepare_modis_lst(
    stack: RasterStack,
    basis: ViewTimeBasis,
    view_angle_mask: Option<&ViewAngleMask>,
) -> Result<RasterStack, RasterError> {
    if stack.times().is_empty() {
        return Err(RasterError::EmptyStack);
    }

    info!("Converting view time to datetime");
    let stack = convert_view_time_to_coord(stack, basis)?;

    info!("Aggregating data by same times");
    let stack = stack.group_by_time_mean();

    match view_angle_mask {
        Some(mask) => {
            info!("Masking out bad view angles");
            mask_bad_view_angles(stack, mask)
        }
        None => Ok(stack),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::stack::tests::day;
    use ndarray::Array4;

    /// bands: [LST_Day_1km, Day_view_time, Day_view_angl] on a 2x2 grid.
    fn modis_stack(view_hours: &[[f32; 4]], angles: &[[f32; 4]]) -> RasterStack {
        let nt = view_hours.len();
        let data = Array4::from_shape_fn((nt, 3, 2, 2), |(t, b, i, j)| match b {
            0 => 300.0 + t as f32,
            1 => view_hours[t][i * 2 + j],
            _ => angles[t][i * 2 + j],
        });
        RasterStack::new(
            (0..nt).map(|t| day(1 + t as u32, 0)).collect(),
            vec![
                "LST_Day_1km".into(),
                DAY_VIEW_TIME.into(),
                "Day_view_angl".into(),
            ],
            vec![-30.0, -30.01],
            vec![30.0, 30.01],
            data,
        )
        .unwrap()
    }

    #[test]
    fn view_time_becomes_timestamp() {
        let stack = modis_stack(
            &[[10.0, 10.2, 10.4, f32::NAN], [13.5, 13.5, 13.5, 13.5]],
            &[[65.0; 4], [65.0; 4]],
        );
        let out = convert_view_time_to_coord(stack, ViewTimeBasis::Utc).unwrap();
        // 13.5 rounds to even
        assert_eq!(out.times(), [day(1, 10), day(2, 14)]);
        assert!(!out.has_band(DAY_VIEW_TIME));
        assert_eq!(out.bands().len(), 2);
    }

    #[test]
    fn local_solar_shifts_by_longitude() {
        let stack = modis_stack(&[[12.0; 4]], &[[65.0; 4]]);
        let out = convert_view_time_to_coord(stack, ViewTimeBasis::LocalSolar).unwrap();
        // mean lon 30.005 -> -2.0003 h
        assert_eq!(out.times(), [day(1, 10)]);
    }

    #[test]
    fn scene_without_view_time_is_dropped() {
        let stack = modis_stack(&[[f32::NAN; 4], [9.0; 4]], &[[65.0; 4], [65.0; 4]]);
        let out = convert_view_time_to_coord(stack, ViewTimeBasis::Utc).unwrap();
        assert_eq!(out.times(), [day(2, 9)]);
        assert_eq!(out.data()[[0, 0, 0, 0]], 301.0);
    }

    #[test]
    fn requires_exactly_one_view_time_band() {
        let stack = modis_stack(&[[10.0; 4]], &[[65.0; 4]])
            .drop_band(DAY_VIEW_TIME)
            .unwrap();
        let err = convert_view_time_to_coord(stack, ViewTimeBasis::Utc).unwrap_err();
        assert!(matches!(err, RasterError::ViewTimeBands { found: 0 }));
    }

    #[test]
    fn bad_angle_ratio_ignores_nan() {
        let stack = modis_stack(
            &[[10.0; 4], [10.0; 4]],
            &[[65.0, 10.0, f32::NAN, 65.0], [f32::NAN; 4]],
        );
        let ratios = bad_view_angle_ratios(&stack, &ViewAngleMask::default()).unwrap();
        approx::assert_relative_eq!(ratios[0], 1.0 / 3.0);
        assert!(ratios[1].is_nan());
    }

    #[test]
    fn mask_drops_oblique_and_empty_scenes() {
        let stack = modis_stack(
            &[[10.0; 4], [10.0; 4], [10.0; 4]],
            &[[65.0; 4], [65.0, 65.0, 65.0, 0.0], [f32::NAN; 4]],
        );
        let out = mask_bad_view_angles(stack, &ViewAngleMask::default()).unwrap();
        assert_eq!(out.times(), [day(1, 0)]);
        assert!(!out.has_band("Day_view_angl"));
    }

    #[test]
    fn prepare_merges_same_time_scenes() {
        let stack = modis_stack(&[[10.0; 4], [10.0; 4]], &[[65.0; 4], [65.0; 4]])
            .with_times(vec![day(5, 0), day(5, 0)])
            .unwrap();
        let out = prepare_modis_lst(stack, ViewTimeBasis::Utc, Some(&ViewAngleMask::default()))
            .unwrap();
        assert_eq!(out.times(), [day(5, 10)]);
        assert_eq!(out.bands(), ["LST_Day_1km".to_string()]);
        assert_eq!(out.data()[[0, 0, 1, 1]], 300.5);
    }
}
