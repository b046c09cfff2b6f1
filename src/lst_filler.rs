//! The main entry point: one client that finds and downloads GHCNh stations, searches the
//! MODIS/DEM catalog and matches station observations with land surface temperature.

use crate::catalog::client::StacClient;
use crate::catalog::item::{ItemCollection, SearchRequest};
use crate::config::types::{MatchupConfig, PipelineConfig, RasterSourceConfig, Resampling};
use crate::config::types::{DownloadConfig, StationReadConfig};
use crate::error::LstFillerError;
use crate::matchup::frame::{attach_terrain, match_station_frame};
use crate::raster::io::read_stack_parquet;
use crate::raster::modis::prepare_modis_lst;
use crate::raster::spatial::latlon_grid;
use crate::raster::stack::RasterStack;
use crate::raster::terrain::TerrainStack;
use crate::station_data::bulk::{BulkDownloader, DownloadReport};
use crate::station_data::clean::{mask_by_quality, ACCEPTED_QUALITY_CODES};
use crate::station_data::data_loader::StationDataLoader;
use crate::station_data::error::StationDataError;
use crate::station_data::frame_fetcher::FrameFetcher;
use crate::station_data::reader::{exclude_columns, read_stations};
use crate::stations::locate_station::StationLocator;
use crate::stations::station_list::StationFilter;
use crate::types::datetime_range::DatetimeRange;
use crate::types::station::GhcnhStation;
use crate::utils::{ensure_cache_dir_exists, get_cache_dir, write_parquet};
use bon::bon;
use chrono::NaiveDate;
use log::{info, warn};
use polars::prelude::{DataFrame, IntoLazy, LazyFrame};
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;

/// Terrain grid spacing in degrees when no target grid is given.
pub const DEFAULT_TERRAIN_RESOLUTION: f64 = 0.01;

/// Latitude, longitude in degrees.
///
/// ```
/// use lst_filler::LatLon;
///
/// let cape_town = LatLon(-33.9648, 18.6017);
/// assert_eq!(cape_town.0, -33.9648);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLon(pub f64, pub f64);

/// The signed asset links of one catalog item.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneAssets {
    pub item_id: String,
    pub date: Option<NaiveDate>,
    /// `(asset key, signed href)` in the requested asset order.
    pub hrefs: Vec<(String, String)>,
}

/// Client tying station data, the raster catalog and the matchup together.
///
/// The GHCNh station list is only loaded the first time a station lookup needs it, so a client
/// that only matches local files never touches the network.
///
/// ```no_run
/// # use lst_filler::{LstFiller, LstFillerError, LatLon};
/// # async fn run() -> Result<(), LstFillerError> {
/// let client = LstFiller::new().await?;
/// let nearby = client
///     .find_stations()
///     .location(LatLon(-33.93, 18.42))
///     .max_distance_km(30.0)
///     .call()
///     .await?;
/// for (station, km) in nearby {
///     println!("{} at {km:.1} km", station.id);
/// }
/// # Ok(())
/// # }
/// ```
pub struct LstFiller {
    cache_dir: PathBuf,
    station_data_url: Option<String>,
    fetcher: FrameFetcher,
    station_locator: OnceCell<StationLocator>,
    catalog: StacClient,
}

#[bon]
impl LstFiller {
    /// Client caching station lists and station parquet files in `cache_folder`, which is
    /// created if missing.
    pub async fn with_cache_folder(cache_folder: PathBuf) -> Result<Self, LstFillerError> {
        ensure_cache_dir_exists(&cache_folder)
            .await
            .map_err(|e| LstFillerError::CacheDirCreation(cache_folder.clone(), e))?;
        Ok(Self {
            fetcher: FrameFetcher::new(StationDataLoader::new(&cache_folder)),
            station_data_url: None,
            station_locator: OnceCell::new(),
            catalog: StacClient::default(),
            cache_dir: cache_folder,
        })
    }

    /// Client using the default user cache directory.
    pub async fn new() -> Result<Self, LstFillerError> {
        let cache_folder = get_cache_dir().map_err(LstFillerError::CacheDirResolution)?;
        Self::with_cache_folder(cache_folder).await
    }

    /// Client using `download.cache_dir` of `config`, or the default cache directory.
    pub async fn from_config(config: &PipelineConfig) -> Result<Self, LstFillerError> {
        match &config.download.cache_dir {
            Some(dir) => Self::with_cache_folder(dir.clone()).await,
            None => Self::new().await,
        }
    }

    /// Replaces the catalog client, e.g. to point at another STAC API.
    pub fn with_catalog(mut self, catalog: StacClient) -> Self {
        self.catalog = catalog;
        self
    }

    /// Uses an already loaded station list instead of the cached GHCNh list.
    pub fn with_station_locator(mut self, locator: StationLocator) -> Self {
        self.station_locator = OnceCell::new_with(Some(locator));
        self
    }

    /// Downloads station files from `url` instead of the NCEI by-station directory.
    pub fn with_station_data_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.fetcher =
            FrameFetcher::new(StationDataLoader::new(&self.cache_dir).with_base_url(url.clone()));
        self.station_data_url = Some(url);
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn catalog(&self) -> &StacClient {
        &self.catalog
    }

    /// The station index, loaded on first use.
    pub async fn station_locator(&self) -> Result<&StationLocator, LstFillerError> {
        self.station_locator
            .get_or_try_init(|| async {
                StationLocator::new(&self.cache_dir)
                    .await
                    .map_err(LstFillerError::from)
            })
            .await
    }

    /// Stations near `location`, nearest first, with their distance in km.
    ///
    /// * `max_distance_km` - search radius, default 50 km
    /// * `station_limit` - at most this many stations, default 5
    /// * `filter` - only stations matching this prefix/exclusion filter
    #[builder]
    pub async fn find_stations(
        &self,
        location: LatLon,
        max_distance_km: Option<f64>,
        station_limit: Option<usize>,
        filter: Option<StationFilter>,
    ) -> Result<Vec<(GhcnhStation, f64)>, LstFillerError> {
        let max_distance_km = max_distance_km.unwrap_or(50.0);
        let station_limit = station_limit.unwrap_or(5);

        let locator = self.station_locator().await?;
        Ok(locator.query(
            location.0,
            location.1,
            station_limit,
            max_distance_km,
            filter.as_ref(),
        ))
    }

    /// Cleaned observations of one GHCNh station, downloaded and cached on first use.
    #[builder]
    pub async fn station_frame(&self, station: &str) -> Result<LazyFrame, LstFillerError> {
        self.fetcher
            .get_cache_lazyframe(station)
            .await
            .map_err(LstFillerError::from)
    }

    /// Observations of the nearest station that has data.
    ///
    /// Tries up to `station_limit` (default 1) stations within `max_distance_km` (default 50 km),
    /// nearest first, and returns the first that downloads. If all fail, the last error is
    /// returned.
    #[builder]
    pub async fn nearest_station_frame(
        &self,
        location: LatLon,
        max_distance_km: Option<f64>,
        station_limit: Option<usize>,
        filter: Option<StationFilter>,
    ) -> Result<LazyFrame, LstFillerError> {
        let max_distance_km = max_distance_km.unwrap_or(50.0);
        let stations = self
            .find_stations()
            .location(location)
            .max_distance_km(max_distance_km)
            .station_limit(station_limit.unwrap_or(1))
            .maybe_filter(filter)
            .call()
            .await?;

        let mut last_error = None;
        for (station, distance_km) in stations {
            match self.fetcher.get_cache_lazyframe(&station.id).await {
                Ok(frame) => {
                    info!("Using station {} at {:.1} km", station.id, distance_km);
                    return Ok(frame);
                }
                Err(e) => {
                    warn!("No data for station {}: {}", station.id, e);
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) => Err(e.into()),
            None => Err(LstFillerError::NoStationWithinRadius {
                radius: max_distance_km,
                latitude: location.0,
                longitude: location.1,
            }),
        }
    }

    /// Downloads every station matching `settings.filter()` into the cache, pacing requests and
    /// retrying failures once. Writes the combined parquet when `combined_output` is set.
    #[builder]
    pub async fn download_stations(
        &self,
        #[builder(default)] settings: DownloadConfig,
    ) -> Result<DownloadReport, LstFillerError> {
        let locator = self.station_locator().await?;
        let ids: Vec<String> = locator
            .filtered(&settings.filter())
            .into_iter()
            .map(|station| station.id)
            .collect();
        info!("Downloading {} of {} stations", ids.len(), locator.len());

        let downloader = BulkDownloader::builder()
            .cache_dir(self.cache_dir.clone())
            .request_interval(settings.request_interval())
            .timeout(settings.timeout())
            .retry_timeout(settings.retry_timeout())
            .maybe_base_url(self.station_data_url.clone())
            .build()?;
        let report = downloader.download_all(&ids).await;
        if !report.failed.is_empty() {
            warn!("Failed stations: {:?}", report.failed_ids());
        }

        if let Some(output) = &settings.combined_output {
            if report.succeeded.is_empty() {
                warn!("No station downloaded, not writing {}", output.display());
            } else {
                downloader.write_combined(&report.succeeded, output).await?;
            }
        }
        Ok(report)
    }

    /// Reads station parquet files as configured, off the async runtime.
    pub async fn read_stations(
        &self,
        config: StationReadConfig,
    ) -> Result<DataFrame, LstFillerError> {
        let df = tokio::task::spawn_blocking(move || read_stations(&config)).await??;
        Ok(df)
    }

    /// Searches the catalog for `source`, with `datetime` replacing the configured range when
    /// given. Items come back signed and sorted by acquisition date.
    #[builder]
    pub async fn search_rasters(
        &self,
        source: &RasterSourceConfig,
        datetime: Option<DatetimeRange>,
    ) -> Result<ItemCollection, LstFillerError> {
        let request: SearchRequest = match datetime {
            Some(range) => source.search.clone().with_datetime(range),
            None => source.search.clone(),
        };
        Ok(self.catalog.search_signed(&request).await?)
    }

    /// The signed hrefs of the configured assets for every item `search_rasters` returns.
    #[builder]
    pub async fn scene_assets(
        &self,
        source: &RasterSourceConfig,
        datetime: Option<DatetimeRange>,
    ) -> Result<Vec<SceneAssets>, LstFillerError> {
        let items = self
            .search_rasters()
            .source(source)
            .maybe_datetime(datetime)
            .call()
            .await?;
        Ok(items
            .features
            .iter()
            .map(|item| SceneAssets {
                item_id: item.id.clone(),
                date: item.acquisition_date(),
                hrefs: item.asset_hrefs(&source.stack.assets),
            })
            .collect())
    }

    /// Slope and aspect from a DEM stack.
    ///
    /// With `bounds` (`[min_lon, min_lat, max_lon, max_lat]`) the result is regridded to a
    /// lat/lon grid at `resolution` degrees, default [`DEFAULT_TERRAIN_RESOLUTION`].
    #[builder]
    pub fn terrain(
        dem: &RasterStack,
        bounds: Option<[f64; 4]>,
        resolution: Option<f64>,
    ) -> Result<TerrainStack, LstFillerError> {
        let terrain = TerrainStack::from_dem(dem)?;
        Ok(match bounds {
            Some(bounds) => {
                let (y, x) =
                    latlon_grid(bounds, resolution.unwrap_or(DEFAULT_TERRAIN_RESOLUTION))?;
                terrain.regrid_nearest(&y, &x)
            }
            None => terrain,
        })
    }

    /// Matches station observations with MODIS LST.
    ///
    /// The MODIS stack needs the `settings.band` LST band, a view-time band and, unless
    /// `max_view_angle` is null, the view-angle band. With a DEM, terrain on the MODIS grid is
    /// appended to every row. The table is written to `settings.output` when set.
    #[builder]
    pub async fn matchup(
        &self,
        stations: DataFrame,
        modis: RasterStack,
        dem: Option<RasterStack>,
        #[builder(default)] settings: MatchupConfig,
    ) -> Result<DataFrame, LstFillerError> {
        tokio::task::spawn_blocking(move || run_matchup(stations, modis, dem, &settings)).await?
    }

    /// Runs a whole config: reads the stations, loads the decoded MODIS (and DEM) stacks from
    /// parquet and matches them.
    pub async fn run_config(
        &self,
        config: &PipelineConfig,
        modis_stack: &Path,
        dem_stack: Option<&Path>,
    ) -> Result<DataFrame, LstFillerError> {
        if config.modis.is_none() {
            return Err(LstFillerError::MissingRasterSource("modis"));
        }
        if let (Some(dem), Some(_)) = (&config.dem, dem_stack) {
            if dem.stack.resampling != Resampling::Nearest {
                warn!(
                    "DEM resampling {:?} is not supported, using nearest",
                    dem.stack.resampling
                );
            }
        }

        let stations = self.read_stations(config.stations.clone()).await?;
        let modis_path = modis_stack.to_path_buf();
        let dem_path = dem_stack.map(Path::to_path_buf);
        let (modis, dem) = tokio::task::spawn_blocking(move || {
            let modis = read_stack_parquet(&modis_path)?;
            let dem = dem_path.as_deref().map(read_stack_parquet).transpose()?;
            Ok::<_, LstFillerError>((modis, dem))
        })
        .await??;

        self.matchup()
            .stations(stations)
            .modis(modis)
            .maybe_dem(dem)
            .settings(config.matchup.clone())
            .call()
            .await
    }
}

fn run_matchup(
    stations: DataFrame,
    modis: RasterStack,
    dem: Option<RasterStack>,
    settings: &MatchupConfig,
) -> Result<DataFrame, LstFillerError> {
    let stations = if settings.quality_mask {
        mask_by_quality(stations.lazy(), &settings.variables, &ACCEPTED_QUALITY_CODES)
            .and_then(LazyFrame::collect)
            .map_err(StationDataError::from)?
    } else {
        stations
    };

    let lst = prepare_modis_lst(
        modis,
        settings.view_time_basis,
        settings.view_angle_mask().as_ref(),
    )?;
    let mut table = match_station_frame(
        &stations,
        &lst,
        &settings.band,
        &settings.variables,
        &settings.options(),
    )?;

    if let Some(dem) = dem {
        let terrain = TerrainStack::from_dem(&dem)?.regrid_like(&lst);
        table = attach_terrain(&table, &terrain)?;
    }
    let mut table = exclude_columns(&table, &settings.exclude_columns)?;

    if let Some(output) = &settings.output {
        write_parquet(&mut table, output)
            .map_err(|e| LstFillerError::OutputWrite(output.clone(), e))?;
        info!("Wrote {} matchup rows to {}", table.height(), output.display());
    }
    Ok(table)
}
