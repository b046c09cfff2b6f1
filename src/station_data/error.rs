use crate::types::column_filter::ColumnFilterError;
use polars::error::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StationDataError {
    #[error("Failed to create cache directory '{0}'")]
    CacheDirCreation(PathBuf, #[source] std::io::Error),

    #[error("Failed to write parquet file '{0}'")]
    ParquetWrite(PathBuf, #[source] PolarsError),

    #[error("Failed to scan parquet file(s) '{0}'")]
    ParquetScan(PathBuf, #[source] PolarsError),

    #[error("Failed to build HTTP client")]
    ClientBuild(#[source] reqwest::Error),

    #[error("Network request failed for {0}")]
    NetworkRequest(String, #[source] reqwest::Error),

    #[error("HTTP request failed for {url} with status {status}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
        #[source]
        source: reqwest::Error,
    },

    #[error("Data download failed")]
    DownloadIo(#[from] std::io::Error),

    #[error("Parsing error reading delimited data for station '{station}'")]
    CsvRead {
        station: String,
        #[source]
        source: PolarsError,
    },

    #[error("Failed to list directory '{0}'")]
    ReadDir(PathBuf, #[source] std::io::Error),

    #[error("Required column '{0}' not found in DataFrame")]
    ColumnNotFound(String, #[source] PolarsError),

    #[error("Datetime columns {0:?} must include year, month and day")]
    IncompleteDatetimeParts(Vec<String>),

    #[error("Unrecognised datetime column '{0}', expected year, month, day, hour, minute or second")]
    UnknownDatetimePart(String),

    #[error("Invalid column pattern '{0}'")]
    InvalidPattern(String, #[source] regex::Error),

    #[error(transparent)]
    Filter(#[from] ColumnFilterError),

    #[error("Background task failed to complete")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("Failed processing DataFrame: {0}")]
    DataFrameProcessing(#[from] PolarsError),
}
