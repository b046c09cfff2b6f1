use crate::catalog::item::SearchRequest;
use crate::config::error::ConfigError;
use crate::matchup::series::MatchupOptions;
use crate::raster::modis::{ViewAngleMask, ViewTimeBasis};
use crate::stations::station_list::StationFilter;
use crate::types::column_filter::ColumnFilter;
use crate::types::datetime_range::DatetimeRange;
use chrono::Duration;
use serde::Deserialize;
use std::path::PathBuf;

/// Everything a matchup run needs, as read from one YAML file.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub stations: StationReadConfig,
    #[serde(default)]
    pub modis: Option<RasterSourceConfig>,
    #[serde(default)]
    pub dem: Option<RasterSourceConfig>,
    #[serde(default)]
    pub matchup: MatchupConfig,
    #[serde(default)]
    pub download: DownloadConfig,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stations.path.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "stations.path",
                message: "must not be empty".to_string(),
            });
        }
        self.matchup.validate()?;
        self.download.validate()
    }
}

/// Which station parquet files to read and how to shape them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StationReadConfig {
    /// File path or glob.
    pub path: String,
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub filters: Vec<ColumnFilter>,
    /// Columns combined into `datetime`, e.g. `[Year, Month, Day, Hour, Minute]`.
    #[serde(default)]
    pub datetime_cols: Vec<String>,
    #[serde(default)]
    pub index_cols: Vec<String>,
}

/// A catalog search plus how its assets should be stacked.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RasterSourceConfig {
    pub search: SearchRequest,
    #[serde(alias = "stackstac")]
    pub stack: StackOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resampling {
    #[default]
    Nearest,
    Bilinear,
    Cubic,
    Average,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StackOptions {
    #[serde(default)]
    pub assets: Vec<String>,
    /// `[min_lon, min_lat, max_lon, max_lat]`
    #[serde(default)]
    pub bounds_latlon: Option<[f64; 4]>,
    /// Output resolution in units of `epsg`.
    #[serde(default)]
    pub resolution: Option<f64>,
    #[serde(default)]
    pub epsg: Option<u32>,
    #[serde(default)]
    pub resampling: Resampling,
}

fn default_band() -> String {
    "LST_Day_1km".to_string()
}

fn default_previous_window_hours() -> f64 {
    4.0
}

fn default_max_view_angle() -> Option<f64> {
    Some(40.0)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MatchupConfig {
    /// Date range of the raster search; overrides any `datetime` in the search sections.
    #[serde(default)]
    pub datetime: Option<DatetimeRange>,
    #[serde(default = "default_band")]
    pub band: String,
    /// Station variables carried into the matchup table.
    #[serde(default)]
    pub variables: Vec<String>,
    /// Use the one-hour / previous-required / valid-pixel filter.
    #[serde(default)]
    pub strict: bool,
    #[serde(default = "default_previous_window_hours")]
    pub previous_window_hours: f64,
    #[serde(default)]
    pub max_raster_offset_hours: Option<f64>,
    #[serde(default)]
    pub require_previous: bool,
    #[serde(default)]
    pub drop_missing_raster: bool,
    #[serde(default)]
    pub view_time_basis: ViewTimeBasis,
    /// `null` disables view-angle masking.
    #[serde(default = "default_max_view_angle")]
    pub max_view_angle: Option<f64>,
    /// Null out variables whose quality code is not accepted before matching.
    #[serde(default)]
    pub quality_mask: bool,
    /// Regex patterns of station columns to drop from the output.
    #[serde(default)]
    pub exclude_columns: Vec<String>,
    /// Where the matchup table is written, if anywhere.
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl Default for MatchupConfig {
    fn default() -> Self {
        Self {
            datetime: None,
            band: default_band(),
            variables: vec![],
            strict: false,
            previous_window_hours: default_previous_window_hours(),
            max_raster_offset_hours: None,
            require_previous: false,
            drop_missing_raster: false,
            view_time_basis: ViewTimeBasis::default(),
            max_view_angle: default_max_view_angle(),
            quality_mask: false,
            exclude_columns: vec![],
            output: None,
        }
    }
}

fn hours(h: f64) -> Duration {
    Duration::milliseconds((h * 3_600_000.0).round() as i64)
}

impl MatchupConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let non_negative = |key: &'static str, value: f64| {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(ConfigError::InvalidValue {
                    key,
                    message: format!("must be a non-negative number, got {value}"),
                })
            }
        };
        non_negative("matchup.previous_window_hours", self.previous_window_hours)?;
        if let Some(offset) = self.max_raster_offset_hours {
            non_negative("matchup.max_raster_offset_hours", offset)?;
        }
        if let Some(angle) = self.max_view_angle {
            non_negative("matchup.max_view_angle", angle)?;
        }
        Ok(())
    }

    /// `strict: true` wins over the individual settings.
    pub fn options(&self) -> MatchupOptions {
        if self.strict {
            return MatchupOptions::strict();
        }
        MatchupOptions {
            previous_window: hours(self.previous_window_hours),
            max_raster_offset: self.max_raster_offset_hours.map(hours),
            require_previous: self.require_previous,
            drop_missing_raster: self.drop_missing_raster,
        }
    }

    pub fn view_angle_mask(&self) -> Option<ViewAngleMask> {
        self.max_view_angle.map(ViewAngleMask::with_max_view_angle)
    }
}

fn default_request_interval_secs() -> f64 {
    2.0
}

fn default_timeout_secs() -> f64 {
    60.0
}

fn default_retry_timeout_secs() -> f64 {
    120.0
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DownloadConfig {
    /// Defaults to the user cache directory.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Station ID prefix, e.g. `SF` for South Africa.
    #[serde(default)]
    pub station_prefix: Option<String>,
    /// Station IDs known to have no or broken data.
    #[serde(default)]
    pub exclude_ids: Vec<String>,
    #[serde(default = "default_request_interval_secs")]
    pub request_interval_secs: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
    #[serde(default = "default_retry_timeout_secs")]
    pub retry_timeout_secs: f64,
    /// Writes all downloaded stations to this parquet file when set.
    #[serde(default)]
    pub combined_output: Option<PathBuf>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            station_prefix: None,
            exclude_ids: vec![],
            request_interval_secs: default_request_interval_secs(),
            timeout_secs: default_timeout_secs(),
            retry_timeout_secs: default_retry_timeout_secs(),
            combined_output: None,
        }
    }
}

impl DownloadConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("download.request_interval_secs", self.request_interval_secs),
            ("download.timeout_secs", self.timeout_secs),
            ("download.retry_timeout_secs", self.retry_timeout_secs),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::InvalidValue {
                    key,
                    message: format!("must be a non-negative number, got {value}"),
                });
            }
        }
        Ok(())
    }

    pub fn filter(&self) -> StationFilter {
        StationFilter {
            prefix: self.station_prefix.clone(),
            exclude_ids: self.exclude_ids.iter().cloned().collect(),
        }
    }

    pub fn request_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.request_interval_secs)
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.timeout_secs)
    }

    pub fn retry_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.retry_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::load_yaml_str;
    use crate::types::column_filter::FilterOp;

    const CONFIG: &str = r#"
data_dir: /data/ghcnh
bbox: [16.0, -35.0, 33.0, -22.0]

stations:
  path: "{{ data_dir }}/*.parquet"
  columns: [Station_ID, Station_name, Latitude, Longitude, Year, Month, Day, Hour, temperature]
  filters:
    - [Year, ">", 2014]
    - [Station_ID, "not in", [SFM00068920]]
  datetime_cols: [Year, Month, Day, Hour]
  index_cols: [Station_name, datetime]

modis:
  search:
    collections: [modis-11A1-061]
    bbox: {{ bbox }}
  stackstac:
    assets: [LST_Day_1km, Day_view_time, Day_view_angl]
    bounds_latlon: {{ bbox }}
    resolution: 0.01
    epsg: 4326

dem:
  search:
    collections: [cop-dem-glo-90]
    bbox: {{ bbox }}
  stack:
    assets: [data]
    resolution: 90
    epsg: 32734
    resampling: bilinear

matchup:
  datetime: 2023-01-01/2023-12-31
  variables: [temperature]
  max_raster_offset_hours: 1.5
  view_time_basis: local_solar

download:
  station_prefix: SF
  exclude_ids: [SFM00068920]
"#;

    fn parse(text: &str) -> PipelineConfig {
        serde_yaml::from_value(load_yaml_str(text, None).unwrap()).unwrap()
    }

    #[test]
    fn parses_full_pipeline_config() {
        let config = parse(CONFIG);
        config.validate().unwrap();

        assert_eq!(config.stations.path, "/data/ghcnh/*.parquet");
        assert_eq!(config.stations.filters[0].op, FilterOp::Gt);
        assert_eq!(config.stations.datetime_cols.len(), 4);

        let modis = config.modis.unwrap();
        assert_eq!(modis.search.bbox, Some([16.0, -35.0, 33.0, -22.0]));
        assert_eq!(modis.stack.bounds_latlon, modis.search.bbox);
        assert_eq!(modis.stack.resampling, Resampling::Nearest);
        assert_eq!(config.dem.unwrap().stack.resampling, Resampling::Bilinear);

        let matchup = &config.matchup;
        assert_eq!(matchup.band, "LST_Day_1km");
        assert_eq!(matchup.view_time_basis, ViewTimeBasis::LocalSolar);
        assert_eq!(
            matchup.datetime.map(|d| d.to_string()).as_deref(),
            Some("2023-01-01/2023-12-31")
        );
        let options = matchup.options();
        assert_eq!(options.previous_window, Duration::hours(4));
        assert_eq!(options.max_raster_offset, Some(Duration::minutes(90)));
        assert_eq!(matchup.view_angle_mask().unwrap().max_view_angle, 40.0);

        let filter = config.download.filter();
        assert_eq!(filter.prefix.as_deref(), Some("SF"));
        assert!(filter.exclude_ids.contains("SFM00068920"));
        assert_eq!(config.download.retry_timeout().as_secs(), 120);
    }

    #[test]
    fn strict_overrides_individual_options() {
        let config = parse("stations: {path: x.parquet}\nmatchup: {strict: true, previous_window_hours: 1}\n");
        assert_eq!(config.matchup.options(), MatchupOptions::strict());
        assert!(config.modis.is_none());
        assert_eq!(config.download, DownloadConfig::default());
    }

    #[test]
    fn rejects_negative_durations() {
        let config = parse("stations: {path: x.parquet}\nmatchup: {previous_window_hours: -1}\n");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key: "matchup.previous_window_hours", .. })
        ));
        let config = parse("stations: {path: x.parquet}\nmatchup: {max_view_angle: null}\n");
        assert!(config.matchup.view_angle_mask().is_none());
    }
}
