//! Parquet persistence of raster stacks in long format: one row per `(time, band, y, x)` cell
//! with columns `time, band, y, x, value`. Missing pixels are stored as nulls.

use crate::raster::error::RasterError;
use crate::raster::stack::RasterStack;
use crate::utils::write_parquet;
use chrono::{DateTime, Utc};
use log::info;
use ndarray::Array4;
use ordered_float::OrderedFloat;
use polars::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::hash::Hash;
use std::path::Path;

const DATETIME_MS: DataType = DataType::Datetime(TimeUnit::Milliseconds, None);

/// Flattens a stack into a long-format frame.
pub fn stack_to_frame(stack: &RasterStack) -> PolarsResult<DataFrame> {
    let (nt, nb, ny, nx) = stack.data().dim();
    let rows = nt * nb * ny * nx;

    let mut time = Vec::with_capacity(rows);
    let mut band = Vec::with_capacity(rows);
    let mut y = Vec::with_capacity(rows);
    let mut x = Vec::with_capacity(rows);
    let mut value = Vec::with_capacity(rows);
    for ((t, b, i, j), v) in stack.data().indexed_iter() {
        time.push(stack.times()[t].timestamp_millis());
        band.push(stack.bands()[b].as_str());
        y.push(stack.y()[i]);
        x.push(stack.x()[j]);
        value.push((!v.is_nan()).then_some(*v));
    }

    DataFrame::new(vec![
        Column::new("time".into(), time).cast(&DATETIME_MS)?,
        Column::new("band".into(), band),
        Column::new("y".into(), y),
        Column::new("x".into(), x),
        Column::new("value".into(), value),
    ])
}

/// Rebuilds a stack from a long-format frame. Time steps are sorted, bands keep their
/// first-seen order and the grid is north-up: `y` descending, `x` ascending. Cells absent from
/// the frame are `NaN`.
pub fn frame_to_stack(df: &DataFrame) -> Result<RasterStack, RasterError> {
    let time = df.column("time")?.cast(&DATETIME_MS)?.cast(&DataType::Int64)?;
    let band = df.column("band")?.cast(&DataType::String)?;
    let y = df.column("y")?.cast(&DataType::Float64)?;
    let x = df.column("x")?.cast(&DataType::Float64)?;
    let value = df.column("value")?.cast(&DataType::Float32)?;

    let time = time.i64()?;
    let band = band.str()?;
    let y = y.f64()?;
    let x = x.f64()?;
    let value = value.f32()?;

    let mut rows = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        let t = time.get(idx).ok_or_else(|| null_value("time"))?;
        let b = band.get(idx).ok_or_else(|| null_value("band"))?;
        let yi = y.get(idx).ok_or_else(|| null_value("y"))?;
        let xi = x.get(idx).ok_or_else(|| null_value("x"))?;
        rows.push((t, b, yi, xi, value.get(idx).unwrap_or(f32::NAN)));
    }

    let mut time_ms: Vec<i64> = rows.iter().map(|r| r.0).collect();
    time_ms.sort_unstable();
    time_ms.dedup();
    let bands = first_seen(rows.iter().map(|r| r.1));
    let mut ys = first_seen(rows.iter().map(|r| OrderedFloat(r.2)));
    ys.sort_unstable_by(|a, b| b.cmp(a));
    let mut xs = first_seen(rows.iter().map(|r| OrderedFloat(r.3)));
    xs.sort_unstable();

    let t_idx: HashMap<i64, usize> = time_ms.iter().enumerate().map(|(i, t)| (*t, i)).collect();
    let b_idx = index_of(&bands);
    let y_idx = index_of(&ys);
    let x_idx = index_of(&xs);

    let mut data = Array4::from_elem((time_ms.len(), bands.len(), ys.len(), xs.len()), f32::NAN);
    for (t, b, yi, xi, v) in &rows {
        data[[
            t_idx[t],
            b_idx[b],
            y_idx[&OrderedFloat(*yi)],
            x_idx[&OrderedFloat(*xi)],
        ]] = *v;
    }

    let times = time_ms
        .into_iter()
        .map(|ms| {
            DateTime::<Utc>::from_timestamp_millis(ms).ok_or(RasterError::TimestampOutOfRange(ms))
        })
        .collect::<Result<Vec<_>, _>>()?;

    RasterStack::new(
        times,
        bands.into_iter().map(str::to_string).collect(),
        ys.into_iter().map(|k| k.0).collect(),
        xs.into_iter().map(|k| k.0).collect(),
        data,
    )
}

pub fn write_stack_parquet(stack: &RasterStack, path: &Path) -> Result<(), RasterError> {
    let mut df = stack_to_frame(stack)?;
    write_parquet(&mut df, path).map_err(|e| RasterError::ParquetWrite(path.to_path_buf(), e))?;
    info!(
        "Wrote raster stack {:?} to {}",
        stack.data().dim(),
        path.display()
    );
    Ok(())
}

pub fn read_stack_parquet(path: &Path) -> Result<RasterStack, RasterError> {
    let df = File::open(path)
        .map_err(PolarsError::from)
        .and_then(|file| ParquetReader::new(file).finish())
        .map_err(|e| RasterError::ParquetRead(path.to_path_buf(), e))?;
    frame_to_stack(&df).map_err(|e| match e {
        RasterError::NullValue { column, .. } => RasterError::NullValue {
            path: path.to_path_buf(),
            column,
        },
        other => other,
    })
}

fn null_value(column: &'static str) -> RasterError {
    RasterError::NullValue {
        path: Default::default(),
        column,
    }
}

fn first_seen<K: Copy + Eq + Hash>(keys: impl Iterator<Item = K>) -> Vec<K> {
    let mut seen = HashSet::new();
    keys.filter(|k| seen.insert(*k)).collect()
}

fn index_of<K: Copy + Eq + Hash>(keys: &[K]) -> HashMap<K, usize> {
    keys.iter().enumerate().map(|(i, k)| (*k, i)).collect()
}
