use polars::error::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("Data shape {found:?} does not match coordinates {expected:?} (time, band, y, x)")]
    ShapeMismatch {
        expected: (usize, usize, usize, usize),
        found: (usize, usize, usize, usize),
    },

    #[error("Coordinate '{axis}' has {found} values but {expected} were given")]
    CoordinateLength {
        axis: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Band '{0}' not found in raster stack")]
    BandNotFound(String),

    #[error("Exactly one view time band is required, found {found}")]
    ViewTimeBands { found: usize },

    #[error("At least two '{axis}' coordinates are needed, found {found}")]
    TooFewCoordinates { axis: &'static str, found: usize },

    #[error("Invalid raster shape: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Grid resolution must be a positive number, got {0}")]
    InvalidResolution(f64),

    #[error("Raster stack has no time steps")]
    EmptyStack,

    #[error("Timestamp {0} ms is out of range")]
    TimestampOutOfRange(i64),

    #[error("Raster parquet file '{path}' has a null '{column}' value")]
    NullValue { path: PathBuf, column: &'static str },

    #[error("Failed to write raster parquet file '{0}'")]
    ParquetWrite(PathBuf, #[source] PolarsError),

    #[error("Failed to read raster parquet file '{0}'")]
    ParquetRead(PathBuf, #[source] PolarsError),

    #[error("Failed processing DataFrame: {0}")]
    DataFrameProcessing(#[from] PolarsError),
}
