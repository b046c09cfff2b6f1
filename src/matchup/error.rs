use crate::raster::error::RasterError;
use chrono::Duration;
use polars::error::PolarsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatchupError {
    #[error("Previous-step window must not be negative, got {0}")]
    NegativeWindow(Duration),

    #[error("Raster offset tolerance must not be negative, got {0}")]
    NegativeOffset(Duration),

    #[error("Required column '{0}' not found in station frame")]
    ColumnNotFound(String, #[source] PolarsError),

    #[error("Station frame has a null '{column}' at row {row}")]
    NullValue { column: &'static str, row: usize },

    #[error("Station '{0}' has no valid latitude/longitude")]
    MissingLocation(String),

    #[error("Timestamp {0} ms is out of range")]
    TimestampOutOfRange(i64),

    #[error("Failed processing DataFrame: {0}")]
    DataFrameProcessing(#[from] PolarsError),

    #[error(transparent)]
    Raster(#[from] RasterError),
}
