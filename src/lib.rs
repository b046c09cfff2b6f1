pub mod catalog;
pub mod config;
mod error;
mod lst_filler;
pub mod matchup;
pub mod raster;
pub mod station_data;
pub mod stations;
#[cfg(test)]
mod test_server;
pub mod types;
mod utils;

pub use error::LstFillerError;
pub use lst_filler::*;

pub use catalog::client::StacClient;
pub use catalog::error::CatalogError;
pub use catalog::item::{ItemCollection, SearchRequest, StacItem};

pub use config::error::ConfigError;
pub use config::loader::{load_pipeline_config, load_yaml_config, render_template};
pub use config::types::*;

pub use matchup::error::MatchupError;
pub use matchup::frame::{attach_terrain, match_station_frame};
pub use matchup::series::{match_series, MatchupOptions, MatchupRecord, Observation, RasterSample};

pub use raster::error::RasterError;
pub use raster::modis::{prepare_modis_lst, ViewAngleMask, ViewTimeBasis};
pub use raster::stack::RasterStack;
pub use raster::terrain::{TerrainSample, TerrainStack};

pub use station_data::bulk::{BulkDownloader, DownloadReport};
pub use station_data::error::StationDataError;
pub use station_data::reader::{exclude_columns, read_stations, station_locations, StationLocation};

pub use stations::error::LocateStationError;
pub use stations::locate_station::StationLocator;
pub use stations::station_list::StationFilter;

pub use types::column_filter::{ColumnFilter, FilterOp, FilterValue};
pub use types::datetime_range::{DatetimeRange, DatetimeRangeError};
pub use types::station::*;
