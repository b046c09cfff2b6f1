//! Frame-level matchup: every station in a station frame against one raster band.

use crate::matchup::error::MatchupError;
use crate::matchup::series::{match_series, MatchupOptions, MatchupRecord, Observation};
use crate::raster::stack::RasterStack;
use crate::raster::terrain::{TerrainSample, TerrainStack};
use crate::types::into_utc_trait::utc_from_millis;
use log::{debug, info};
use polars::prelude::*;
use rayon::prelude::*;
use std::collections::BTreeMap;

pub const STATION_NAME: &str = "station_name";
pub const DATETIME: &str = "datetime";
pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";
pub const MODIS_TIME: &str = "modis_time";
pub const MODIS_LST: &str = "modis_lst";
pub const PREVIOUS_SUFFIX: &str = "_tm1";

const DATETIME_MS: DataType = DataType::Datetime(TimeUnit::Milliseconds, None);

/// The station frame pulled into plain vectors so groups can be matched in parallel.
struct StationColumns {
    names: Vec<Option<String>>,
    times: Vec<Option<i64>>,
    latitudes: Vec<Option<f64>>,
    longitudes: Vec<Option<f64>>,
    variables: Vec<Vec<Option<f64>>>,
}

impl StationColumns {
    fn extract(frame: &DataFrame, variables: &[String]) -> Result<Self, MatchupError> {
        let names = column(frame, STATION_NAME)?
            .cast(&DataType::String)?
            .str()?
            .into_iter()
            .map(|name| name.map(str::to_string))
            .collect();
        let times = column(frame, DATETIME)?
            .cast(&DATETIME_MS)?
            .cast(&DataType::Int64)?
            .i64()?
            .into_iter()
            .collect();
        Ok(Self {
            names,
            times,
            latitudes: f64_values(frame, LATITUDE)?,
            longitudes: f64_values(frame, LONGITUDE)?,
            variables: variables
                .iter()
                .map(|v| f64_values(frame, v))
                .collect::<Result<_, _>>()?,
        })
    }

    fn location(&self, rows: &[usize]) -> Option<(f64, f64)> {
        rows.iter().find_map(|&r| {
            let (lat, lon) = (self.latitudes[r]?, self.longitudes[r]?);
            (lat.is_finite() && lon.is_finite()).then_some((lat, lon))
        })
    }
}

fn column<'a>(frame: &'a DataFrame, name: &str) -> Result<&'a Column, MatchupError> {
    frame
        .column(name)
        .map_err(|e| MatchupError::ColumnNotFound(name.to_string(), e))
}

fn f64_values(frame: &DataFrame, name: &str) -> Result<Vec<Option<f64>>, MatchupError> {
    Ok(column(frame, name)?
        .cast(&DataType::Float64)?
        .f64()?
        .into_iter()
        .collect())
}

fn datetime_column(name: &str, values: Vec<Option<i64>>) -> PolarsResult<Column> {
    Column::new(name.into(), values).cast(&DATETIME_MS)
}

/// Matches every station in `frame` against `band` of `stack`.
///
/// `frame` needs `station_name`, `datetime`, `latitude`, `longitude` and the listed variables.
/// Each station is matched at the pixel nearest its first valid location. The result has
/// columns `station_name, datetime, latitude, longitude, modis_time, modis_lst`, then the
/// variables, then the variables of the previous observation suffixed `_tm1`, and finally
/// `datetime_tm1`. Rows are sorted by station and time.
pub fn match_station_frame(
    frame: &DataFrame,
    stack: &RasterStack,
    band: &str,
    variables: &[String],
    options: &MatchupOptions,
) -> Result<DataFrame, MatchupError> {
    options.validate()?;
    stack.band_index(band)?;
    let cols = StationColumns::extract(frame, variables)?;

    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (row, name) in cols.names.iter().enumerate() {
        let name = name.as_deref().ok_or(MatchupError::NullValue {
            column: STATION_NAME,
            row,
        })?;
        groups.entry(name).or_default().push(row);
    }
    let groups: Vec<(&str, Vec<usize>)> = groups.into_iter().collect();

    info!(
        "Matching {} stations ({} observations) with band '{}'",
        groups.len(),
        frame.height(),
        band
    );
    let matched = groups
        .par_iter()
        .map(|(name, rows)| match_group(name, rows, &cols, stack, band, options))
        .collect::<Result<Vec<_>, _>>()?;
    let records: Vec<MatchupRecord<usize>> = matched.into_iter().flatten().collect();
    info!("Matched {} of {} observations", records.len(), frame.height());

    build_frame(&records, &cols, variables)
}

fn match_group(
    name: &str,
    rows: &[usize],
    cols: &StationColumns,
    stack: &RasterStack,
    band: &str,
    options: &MatchupOptions,
) -> Result<Vec<MatchupRecord<usize>>, MatchupError> {
    let (lat, lon) = cols
        .location(rows)
        .ok_or_else(|| MatchupError::MissingLocation(name.to_string()))?;
    let samples = stack.pixel_series(band, lat, lon)?;

    let mut observations = rows
        .iter()
        .map(|&row| {
            let ms = cols.times[row].ok_or(MatchupError::NullValue {
                column: DATETIME,
                row,
            })?;
            let time = utc_from_millis(ms).ok_or(MatchupError::TimestampOutOfRange(ms))?;
            Ok(Observation { time, payload: row })
        })
        .collect::<Result<Vec<_>, MatchupError>>()?;
    observations.sort_by_key(|o| o.time);

    let records = match_series(&observations, &samples, options)?;
    debug!(
        "Station {} at ({:.4}, {:.4}): {} of {} observations matched",
        name,
        lat,
        lon,
        records.len(),
        observations.len()
    );
    Ok(records)
}

fn build_frame(
    records: &[MatchupRecord<usize>],
    cols: &StationColumns,
    variables: &[String],
) -> Result<DataFrame, MatchupError> {
    let names: Vec<&str> = records
        .iter()
        .map(|r| cols.names[r.station].as_deref().unwrap_or_default())
        .collect();

    let mut columns = vec![
        Column::new(STATION_NAME.into(), names),
        datetime_column(
            DATETIME,
            records
                .iter()
                .map(|r| Some(r.station_time.timestamp_millis()))
                .collect(),
        )?,
        Column::new(
            LATITUDE.into(),
            records
                .iter()
                .map(|r| cols.latitudes[r.station])
                .collect::<Vec<_>>(),
        ),
        Column::new(
            LONGITUDE.into(),
            records
                .iter()
                .map(|r| cols.longitudes[r.station])
                .collect::<Vec<_>>(),
        ),
        datetime_column(
            MODIS_TIME,
            records
                .iter()
                .map(|r| r.raster_time.map(|t| t.timestamp_millis()))
                .collect(),
        )?,
        Column::new(
            MODIS_LST.into(),
            records.iter().map(|r| r.raster_value).collect::<Vec<_>>(),
        ),
    ];

    for (k, var) in variables.iter().enumerate() {
        let values: Vec<Option<f64>> = records
            .iter()
            .map(|r| cols.variables[k][r.station])
            .collect();
        columns.push(Column::new(var.as_str().into(), values));
    }
    for (k, var) in variables.iter().enumerate() {
        let values: Vec<Option<f64>> = records
            .iter()
            .map(|r| r.previous.as_ref().and_then(|p| cols.variables[k][p.payload]))
            .collect();
        columns.push(Column::new(
            format!("{var}{PREVIOUS_SUFFIX}").into(),
            values,
        ));
    }
    columns.push(datetime_column(
        &format!("{DATETIME}{PREVIOUS_SUFFIX}"),
        records
            .iter()
            .map(|r| r.previous.as_ref().map(|p| p.time.timestamp_millis()))
            .collect(),
    )?);

    Ok(DataFrame::new(columns)?)
}

/// Builds a matchup table for a single station series whose payload is the variable value.
pub fn records_to_frame(
    station_name: &str,
    variable: &str,
    records: &[MatchupRecord<Option<f64>>],
) -> PolarsResult<DataFrame> {
    DataFrame::new(vec![
        Column::new(STATION_NAME.into(), vec![station_name; records.len()]),
        datetime_column(
            DATETIME,
            records
                .iter()
                .map(|r| Some(r.station_time.timestamp_millis()))
                .collect(),
        )?,
        datetime_column(
            MODIS_TIME,
            records
                .iter()
                .map(|r| r.raster_time.map(|t| t.timestamp_millis()))
                .collect(),
        )?,
        Column::new(
            MODIS_LST.into(),
            records.iter().map(|r| r.raster_value).collect::<Vec<_>>(),
        ),
        Column::new(
            variable.into(),
            records.iter().map(|r| r.station).collect::<Vec<_>>(),
        ),
        Column::new(
            format!("{variable}{PREVIOUS_SUFFIX}").into(),
            records
                .iter()
                .map(|r| r.previous.as_ref().and_then(|p| p.payload))
                .collect::<Vec<_>>(),
        ),
        datetime_column(
            &format!("{DATETIME}{PREVIOUS_SUFFIX}"),
            records
                .iter()
                .map(|r| r.previous.as_ref().map(|p| p.time.timestamp_millis()))
                .collect(),
        )?,
    ])
}

/// Appends the terrain at each row's nearest pixel as `elev, slope, aspect, aspect_cos,
/// aspect_sin`.
pub fn attach_terrain(
    frame: &DataFrame,
    terrain: &TerrainStack,
) -> Result<DataFrame, MatchupError> {
    let latitudes = f64_values(frame, LATITUDE)?;
    let longitudes = f64_values(frame, LONGITUDE)?;
    let samples: Vec<_> = latitudes
        .iter()
        .zip(&longitudes)
        .map(|(lat, lon)| match (lat, lon) {
            (Some(lat), Some(lon)) => terrain.sample(*lat, *lon),
            _ => TerrainSample::default(),
        })
        .collect();

    let mut out = frame.clone();
    let layers: [(&str, fn(&TerrainSample) -> Option<f64>); 5] = [
        ("elev", |s| s.elev),
        ("slope", |s| s.slope),
        ("aspect", |s| s.aspect),
        ("aspect_cos", |s| s.aspect_cos),
        ("aspect_sin", |s| s.aspect_sin),
    ];
    for (name, get) in layers {
        let values: Vec<Option<f64>> = samples.iter().map(get).collect();
        out.with_column(Column::new(name.into(), values))?;
    }
    Ok(out)
}
