use crate::raster::error::RasterError;

/// Metres per degree of latitude.
pub const METRES_PER_DEGREE: f64 = 111_000.0;

/// Grid resolution in metres as `(y, x)`, rounded to whole metres.
///
/// The longitude spacing is scaled by the cosine of the grid's mean latitude. Signs follow the
/// coordinate order, so a north-up grid has a negative `y` resolution.
pub fn calculate_res_metres(y: &[f64], x: &[f64]) -> Result<(f64, f64), RasterError> {
    let dy = mean_step(y, "y")?;
    let dx = mean_step(x, "x")?;
    let mean_lat = y.iter().sum::<f64>() / y.len() as f64;

    let res_lat = dy * METRES_PER_DEGREE;
    let res_lon = dx * METRES_PER_DEGREE * mean_lat.to_radians().cos();
    Ok((res_lat.round(), res_lon.round()))
}

fn mean_step(coords: &[f64], axis: &'static str) -> Result<f64, RasterError> {
    if coords.len() < 2 {
        return Err(RasterError::TooFewCoordinates {
            axis,
            found: coords.len(),
        });
    }
    Ok((coords[coords.len() - 1] - coords[0]) / (coords.len() - 1) as f64)
}

/// Number of whole pixels of `resolution` in `span`. Quotients within float noise of an integer
/// are not rounded up to an extra pixel.
fn pixel_count(span: f64, resolution: f64) -> usize {
    let n = span / resolution;
    let n = if (n - n.round()).abs() < 1e-9 {
        n.round()
    } else {
        n.ceil()
    };
    n.max(0.0) as usize
}

/// Pixel-centre coordinates for a north-up lat/lon grid covering
/// `[min_lon, min_lat, max_lon, max_lat]` at `resolution` degrees.
pub fn latlon_grid(
    bounds: [f64; 4],
    resolution: f64,
) -> Result<(Vec<f64>, Vec<f64>), RasterError> {
    if !(resolution.is_finite() && resolution > 0.0) {
        return Err(RasterError::InvalidResolution(resolution));
    }
    let [min_lon, min_lat, max_lon, max_lat] = bounds;
    let ny = pixel_count(max_lat - min_lat, resolution);
    let nx = pixel_count(max_lon - min_lon, resolution);
    let y = (0..ny)
        .map(|i| max_lat - (i as f64 + 0.5) * resolution)
        .collect();
    let x = (0..nx)
        .map(|j| min_lon + (j as f64 + 0.5) * resolution)
        .collect();
    Ok((y, x))
}
