use crate::catalog::error::CatalogError;
use crate::config::error::ConfigError;
use crate::matchup::error::MatchupError;
use crate::raster::error::RasterError;
use crate::station_data::error::StationDataError;
use crate::stations::error::LocateStationError;
use crate::types::datetime_range::DatetimeRangeError;
use polars::error::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LstFillerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    LocateStation(#[from] LocateStationError),

    #[error(transparent)]
    StationData(#[from] StationDataError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Raster(#[from] RasterError),

    #[error(transparent)]
    Matchup(#[from] MatchupError),

    #[error(transparent)]
    DatetimeRange(#[from] DatetimeRangeError),

    #[error("No station within {radius} km of ({latitude}, {longitude})")]
    NoStationWithinRadius {
        radius: f64,
        latitude: f64,
        longitude: f64,
    },

    #[error("Config has no '{0}' raster source")]
    MissingRasterSource(&'static str),

    #[error("Failed to write matchup table '{0}'")]
    OutputWrite(PathBuf, #[source] PolarsError),

    #[error("Failed to create cache directory '{0}'")]
    CacheDirCreation(PathBuf, #[source] std::io::Error),

    #[error("Failed to determine cache directory")]
    CacheDirResolution(#[source] std::io::Error),

    #[error("Background task failed to complete")]
    TaskJoin(#[from] tokio::task::JoinError),
}
