//! Elevation derived terrain layers: slope and aspect via Horn's 3x3 method.
//!
//! Grids are north-up: row 0 is the northernmost row. Cells on the grid edge have no full
//! neighbourhood and are `NaN` in the derived layers.

use crate::raster::error::RasterError;
use crate::raster::spatial::calculate_res_metres;
use crate::raster::stack::{finite, RasterStack};
use log::info;
use ndarray::{Array2, Array4, ArrayView2, Axis};

pub const TERRAIN_BANDS: [&str; 5] = ["elev", "slope", "aspect", "aspect_cos", "aspect_sin"];

/// Terrain values at a single pixel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TerrainSample {
    pub elev: Option<f64>,
    pub slope: Option<f64>,
    pub aspect: Option<f64>,
    pub aspect_cos: Option<f64>,
    pub aspect_sin: Option<f64>,
}

/// A single time step stack with the bands in [`TERRAIN_BANDS`].
#[derive(Debug, Clone, PartialEq)]
pub struct TerrainStack {
    stack: RasterStack,
}

impl TerrainStack {
    /// Averages DEM tiles over time, takes the first band as elevation and derives the rest.
    pub fn from_dem(dem: &RasterStack) -> Result<Self, RasterError> {
        let Some(first_time) = dem.times().iter().min().copied() else {
            return Err(RasterError::EmptyStack);
        };
        if dem.bands().is_empty() {
            return Err(RasterError::BandNotFound("elevation".to_string()));
        }

        let elev = dem.mean_over_time().index_axis_move(Axis(0), 0);
        let (res_y, res_x) = calculate_res_metres(dem.y(), dem.x())?;
        info!(
            "Deriving slope and aspect on a {}x{} grid ({} m x {} m cells)",
            elev.nrows(),
            elev.ncols(),
            res_y.abs(),
            res_x.abs()
        );

        let slope = slope(elev.view(), res_x.abs(), res_y.abs());
        let aspect = aspect(elev.view());
        let aspect_cos = aspect.mapv(|a| a.to_radians().cos());
        let aspect_sin = aspect.mapv(|a| a.to_radians().sin());

        let layers = ndarray::stack(
            Axis(0),
            &[
                elev.view(),
                slope.view(),
                aspect.view(),
                aspect_cos.view(),
                aspect_sin.view(),
            ],
        )?;
        let data: Array4<f32> = layers.insert_axis(Axis(0));

        let stack = RasterStack::new(
            vec![first_time],
            TERRAIN_BANDS.iter().map(|b| b.to_string()).collect(),
            dem.y().to_vec(),
            dem.x().to_vec(),
            data,
        )?;
        Ok(Self { stack })
    }

    pub fn stack(&self) -> &RasterStack {
        &self.stack
    }

    pub fn into_stack(self) -> RasterStack {
        self.stack
    }

    pub fn regrid_nearest(&self, target_y: &[f64], target_x: &[f64]) -> Self {
        Self {
            stack: self.stack.regrid_nearest(target_y, target_x),
        }
    }

    /// Regrids onto the lat/lon grid of another stack.
    pub fn regrid_like(&self, target: &RasterStack) -> Self {
        self.regrid_nearest(target.y(), target.x())
    }

    /// Terrain at the pixel nearest to a location.
    pub fn sample(&self, latitude: f64, longitude: f64) -> TerrainSample {
        let Some((iy, ix)) = self.stack.pixel_index(latitude, longitude) else {
            return TerrainSample::default();
        };
        let data = self.stack.data();
        let at = |b: usize| finite(data[[0, b, iy, ix]]);
        TerrainSample {
            elev: at(0),
            slope: at(1),
            aspect: at(2),
            aspect_cos: at(3),
            aspect_sin: at(4),
        }
    }
}

/// Neighbourhood `[a b c; d e f; g h i]` around each interior cell.
fn horn_gradients(
    elev: ArrayView2<'_, f32>,
    mut cell: impl FnMut(f64, f64) -> f32,
) -> Array2<f32> {
    let (ny, nx) = elev.dim();
    let mut out = Array2::from_elem((ny, nx), f32::NAN);
    if ny < 3 || nx < 3 {
        return out;
    }
    for r in 1..ny - 1 {
        for c in 1..nx - 1 {
            let z = |dr: usize, dc: usize| elev[[r + dr - 1, c + dc - 1]] as f64;
            let (a, b, cc) = (z(0, 0), z(0, 1), z(0, 2));
            let (d, f) = (z(1, 0), z(1, 2));
            let (g, h, i) = (z(2, 0), z(2, 1), z(2, 2));
            let dz_dx = ((cc + 2.0 * f + i) - (a + 2.0 * d + g)) / 8.0;
            let dz_dy = ((g + 2.0 * h + i) - (a + 2.0 * b + cc)) / 8.0;
            out[[r, c]] = cell(dz_dx, dz_dy);
        }
    }
    out
}

/// Slope in degrees. Cell sizes are in the elevation's units (metres).
pub fn slope(elev: ArrayView2<'_, f32>, cellsize_x: f64, cellsize_y: f64) -> Array2<f32> {
    horn_gradients(elev, |dz_dx, dz_dy| {
        let p = (dz_dx / cellsize_x).hypot(dz_dy / cellsize_y);
        p.atan().to_degrees() as f32
    })
}

/// Compass aspect in degrees, clockwise from north. Flat cells are `-1`.
pub fn aspect(elev: ArrayView2<'_, f32>) -> Array2<f32> {
    horn_gradients(elev, |dz_dx, dz_dy| {
        if dz_dx == 0.0 && dz_dy == 0.0 {
            return -1.0;
        }
        let a = dz_dy.atan2(-dz_dx).to_degrees();
        let compass = if a < 0.0 {
            90.0 - a
        } else if a > 90.0 {
            360.0 - a + 90.0
        } else {
            90.0 - a
        };
        compass as f32
    })
}
