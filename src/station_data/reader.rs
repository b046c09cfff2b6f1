//! Reading cached station parquet back into one analysis-ready frame.

use crate::config::types::StationReadConfig;
use crate::station_data::error::StationDataError;
use crate::types::column_filter::combine_filters;
use crate::utils::snake_case_column;
use log::{debug, info};
use ordered_float::OrderedFloat;
use polars::prelude::*;
use regex::Regex;
use std::collections::HashSet;
use std::path::PathBuf;

pub const DATETIME_COLUMN: &str = "datetime";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DatetimePart {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

impl DatetimePart {
    fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "year" => Some(Self::Year),
            "month" => Some(Self::Month),
            "day" => Some(Self::Day),
            "hour" => Some(Self::Hour),
            "minute" => Some(Self::Minute),
            "second" => Some(Self::Second),
            _ => None,
        }
    }
}

/// Builds a millisecond `datetime` expression from separate year/month/day[/hour/minute/second]
/// columns. Parts are recognised by name, case-insensitively; missing time parts are zero.
fn datetime_expr(parts: &[String]) -> Result<Expr, StationDataError> {
    let mut found: Vec<(DatetimePart, &str)> = Vec::with_capacity(parts.len());
    for name in parts {
        let part = DatetimePart::parse(name)
            .ok_or_else(|| StationDataError::UnknownDatetimePart(name.clone()))?;
        found.push((part, name));
    }
    let get = |part: DatetimePart, dtype: DataType| -> Option<Expr> {
        found
            .iter()
            .find(|(p, _)| *p == part)
            .map(|(_, name)| col(*name).cast(dtype))
    };

    let (Some(year), Some(month), Some(day)) = (
        get(DatetimePart::Year, DataType::Int32),
        get(DatetimePart::Month, DataType::Int8),
        get(DatetimePart::Day, DataType::Int8),
    ) else {
        return Err(StationDataError::IncompleteDatetimeParts(parts.to_vec()));
    };
    let time_part = |part| get(part, DataType::Int8).unwrap_or(lit(0i8));

    let args = DatetimeArgs::new(year, month, day).with_hms(
        time_part(DatetimePart::Hour),
        time_part(DatetimePart::Minute),
        time_part(DatetimePart::Second),
    );
    Ok(datetime(args)
        .cast(DataType::Datetime(TimeUnit::Milliseconds, None))
        .alias(DATETIME_COLUMN))
}

/// Scans the parquet file(s) matched by `config.path` (a glob is allowed) and returns them
/// as one frame.
///
/// In order: columns are selected, filters applied, the datetime parts combined into a
/// `datetime` column that replaces them, all names snake_cased, and rows sorted by the
/// (snake_cased) index columns.
pub fn read_stations(config: &StationReadConfig) -> Result<DataFrame, StationDataError> {
    let path = PathBuf::from(&config.path);
    let mut lf = LazyFrame::scan_parquet(&path, ScanArgsParquet::default())
        .map_err(|e| StationDataError::ParquetScan(path.clone(), e))?;

    if let Some(columns) = &config.columns {
        lf = lf.select(columns.iter().map(|c| col(c.as_str())).collect::<Vec<_>>());
    }
    if let Some(predicate) = combine_filters(&config.filters)? {
        lf = lf.filter(predicate);
    }

    let schema = lf.collect_schema()?;
    let mut exprs: Vec<Expr> = schema
        .iter_names()
        .filter(|name| !config.datetime_cols.iter().any(|p| p == name.as_str()))
        .map(|name| col(name.clone()).alias(snake_case_column(name)))
        .collect();
    if !config.datetime_cols.is_empty() {
        exprs.push(datetime_expr(&config.datetime_cols)?);
    }
    lf = lf.select(exprs);

    if !config.index_cols.is_empty() {
        let by: Vec<Expr> = config
            .index_cols
            .iter()
            .map(|c| col(snake_case_column(c)))
            .collect();
        lf = lf.sort_by_exprs(by, SortMultipleOptions::default().with_maintain_order(true));
    }

    let df = lf.collect()?;
    info!(
        "Read {} station rows with {} columns from {}",
        df.height(),
        df.width(),
        config.path
    );
    Ok(df)
}

/// A station position as it appears in a station frame.
#[derive(Debug, Clone, PartialEq)]
pub struct StationLocation {
    pub station: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

/// Unique `(latitude, longitude)` pairs of a station frame, in order of first appearance.
/// The station name is taken from `station_name` when that column exists. Rows with a
/// missing coordinate are skipped.
pub fn station_locations(df: &DataFrame) -> Result<Vec<StationLocation>, StationDataError> {
    let coords = |name: &str| -> Result<Float64Chunked, StationDataError> {
        let column = df
            .column(name)
            .map_err(|e| StationDataError::ColumnNotFound(name.to_string(), e))?;
        Ok(column.cast(&DataType::Float64)?.f64()?.clone())
    };
    let latitudes = coords("latitude")?;
    let longitudes = coords("longitude")?;
    let names: Option<StringChunked> = match df.column("station_name") {
        Ok(column) => Some(column.cast(&DataType::String)?.str()?.clone()),
        Err(_) => None,
    };

    let mut seen = HashSet::new();
    let mut locations = Vec::new();
    for (row, (lat, lon)) in latitudes.into_iter().zip(longitudes.into_iter()).enumerate() {
        let (Some(latitude), Some(longitude)) = (lat, lon) else {
            continue;
        };
        if seen.insert((OrderedFloat(latitude), OrderedFloat(longitude))) {
            locations.push(StationLocation {
                station: names.as_ref().and_then(|n| n.get(row)).map(str::to_string),
                latitude,
                longitude,
            });
        }
    }
    debug!("Found {} unique station locations", locations.len());
    Ok(locations)
}

/// Drops every column whose name matches any of the regular expressions in `patterns`.
/// Plain substrings such as `Quality_Code` work as patterns.
pub fn exclude_columns(df: &DataFrame, patterns: &[String]) -> Result<DataFrame, StationDataError> {
    let regexes = patterns
        .iter()
        .map(|p| Regex::new(p).map_err(|e| StationDataError::InvalidPattern(p.clone(), e)))
        .collect::<Result<Vec<_>, _>>()?;
    let keep: Vec<PlSmallStr> = df
        .get_column_names()
        .into_iter()
        .filter(|name| !regexes.iter().any(|r| r.is_match(name.as_str())))
        .cloned()
        .collect();
    Ok(df.select(keep)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::column_filter::{ColumnFilter, FilterOp, FilterScalar, FilterValue};
    use crate::utils::write_parquet;
    use chrono::NaiveDate;

    fn ghcnh_frame(station: &str, lat: f64, hours: &[i64]) -> DataFrame {
        let n = hours.len();
        df!(
            "Station_ID" => vec![station; n],
            "Station name" => vec![format!("{station} AIRPORT"); n],
            "Latitude" => vec![lat; n],
            "Longitude" => vec![18.6; n],
            "Year" => vec![2023i64; n],
            "Month" => vec![1i64; n],
            "Day" => vec![2i64; n],
            "Hour" => hours.to_vec(),
            "temperature" => hours.iter().map(|h| 20.0 + *h as f64).collect::<Vec<_>>(),
            "temperature_Quality_Code" => vec!["0"; n],
        )
        .unwrap()
    }

    fn write_stations(dir: &std::path::Path) {
        write_parquet(&mut ghcnh_frame("SFM00068920", -34.0, &[12, 6]), &dir.join("a.parquet"))
            .unwrap();
        write_parquet(&mut ghcnh_frame("SFM00068816", -33.9, &[9, 3]), &dir.join("b.parquet"))
            .unwrap();
    }

    fn config(dir: &std::path::Path) -> StationReadConfig {
        StationReadConfig {
            path: dir.join("*.parquet").to_string_lossy().into_owned(),
            columns: None,
            filters: vec![],
            datetime_cols: ["Year", "Month", "Day", "Hour"].map(String::from).to_vec(),
            index_cols: ["Station name", "datetime"].map(String::from).to_vec(),
        }
    }

    #[test]
    fn assembles_datetime_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        write_stations(dir.path());

        let df = read_stations(&config(dir.path())).unwrap();
        assert_eq!(df.height(), 4);
        assert!(df.column("year").is_err());
        assert!(df.column("station_name").is_ok());

        let names: Vec<_> = df
            .column("station_name")
            .unwrap()
            .str()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(names[0], "SFM00068816 AIRPORT");

        let times: Vec<_> = df
            .column(DATETIME_COLUMN)
            .unwrap()
            .cast(&DataType::Int64)
            .unwrap()
            .i64()
            .unwrap()
            .into_no_null_iter()
            .collect();
        let expected = |h| {
            NaiveDate::from_ymd_opt(2023, 1, 2)
                .unwrap()
                .and_hms_opt(h, 0, 0)
                .unwrap()
                .and_utc()
                .timestamp_millis()
        };
        assert_eq!(times, [expected(3), expected(9), expected(6), expected(12)]);
    }

    #[test]
    fn selects_and_filters_before_renaming() {
        let dir = tempfile::tempdir().unwrap();
        write_stations(dir.path());
        let mut config = config(dir.path());
        config.columns = Some(
            ["Station name", "Year", "Month", "Day", "Hour", "temperature"]
                .map(String::from)
                .to_vec(),
        );
        config.filters = vec![ColumnFilter::new(
            "Hour",
            FilterOp::GtEq,
            FilterValue::Scalar(FilterScalar::Int(9)),
        )];

        let df = read_stations(&config).unwrap();
        assert_eq!(df.height(), 2);
        let names: Vec<_> = df.get_column_names().into_iter().map(|n| n.as_str()).collect();
        assert_eq!(names, ["station_name", "temperature", "datetime"]);
    }

    #[test]
    fn rejects_incomplete_or_unknown_parts() {
        let dir = tempfile::tempdir().unwrap();
        write_stations(dir.path());
        let mut config = config(dir.path());
        config.datetime_cols = vec!["Year".into(), "Month".into()];
        assert!(matches!(
            read_stations(&config),
            Err(StationDataError::IncompleteDatetimeParts(_))
        ));
        config.datetime_cols = vec!["Year".into(), "Month".into(), "Day".into(), "Week".into()];
        assert!(matches!(
            read_stations(&config),
            Err(StationDataError::UnknownDatetimePart(p)) if p == "Week"
        ));
    }

    #[test]
    fn unique_locations_keep_first_station() {
        let df = df!(
            "station_name" => ["A", "A", "B", "C"],
            "latitude" => [Some(-33.9), Some(-33.9), Some(-26.1), None],
            "longitude" => [Some(18.6), Some(18.6), Some(28.2), Some(20.0)],
        )
        .unwrap();
        let locations = station_locations(&df).unwrap();
        assert_eq!(
            locations,
            [
                StationLocation {
                    station: Some("A".into()),
                    latitude: -33.9,
                    longitude: 18.6
                },
                StationLocation {
                    station: Some("B".into()),
                    latitude: -26.1,
                    longitude: 28.2
                },
            ]
        );
    }

    #[test]
    fn excludes_matching_columns() {
        let df = ghcnh_frame("SFM00068816", -33.9, &[1]);
        let df = exclude_columns(&df, &["Quality_Code".into(), "^Station".into()]).unwrap();
        assert!(df.column("temperature_Quality_Code").is_err());
        assert!(df.column("Station_ID").is_err());
        assert!(df.column("temperature").is_ok());

        assert!(matches!(
            exclude_columns(&df, &["(".into()]),
            Err(StationDataError::InvalidPattern(..))
        ));
    }
}
