use crate::station_data::clean::{clean_frame, CleanOptions};
use crate::station_data::convert::read_delimited;
use crate::station_data::error::StationDataError;
use crate::utils::write_parquet;
use futures_util::TryStreamExt;
use log::{info, warn};
use polars::prelude::*;
use reqwest::Client;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::{fs, task};
use tokio_util::io::StreamReader;

pub const STATION_DATA_URL: &str =
    "https://www.ncei.noaa.gov/oa/global-historical-climatology-network/hourly/access/by-station";

/// Downloads GHCNh period-of-record files and keeps them as cleaned parquet in the cache dir.
#[derive(Debug, Clone)]
pub struct StationDataLoader {
    cache_dir: PathBuf,
    download_client: Client,
    base_url: String,
    clean: CleanOptions,
}

impl StationDataLoader {
    pub fn new(cache_dir: &Path) -> StationDataLoader {
        StationDataLoader {
            cache_dir: cache_dir.to_path_buf(),
            download_client: Client::new(),
            base_url: STATION_DATA_URL.to_string(),
            clean: CleanOptions::default(),
        }
    }

    /// Uses `client` for downloads, e.g. one built with a longer timeout.
    pub fn with_client(mut self, client: Client) -> Self {
        self.download_client = client;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_clean_options(mut self, clean: CleanOptions) -> Self {
        self.clean = clean;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn parquet_path(&self, station: &str) -> PathBuf {
        self.cache_dir.join(format!("GHCNh_{station}.parquet"))
    }

    pub fn station_url(&self, station: &str) -> String {
        format!("{}/GHCNh_{station}_por.psv", self.base_url)
    }

    /// Scans the cached parquet for `station`, downloading it first on a cache miss.
    pub async fn get_frame(&self, station: &str) -> Result<LazyFrame, StationDataError> {
        let parquet_path = self.parquet_path(station);

        if fs::metadata(&parquet_path).await.is_ok() {
            info!("Cache hit for station {} at {:?}", station, parquet_path);
        } else {
            warn!("Cache miss for station {}. Downloading.", station);
            let df = self.download_frame(station).await?;

            fs::create_dir_all(&self.cache_dir)
                .await
                .map_err(|e| StationDataError::CacheDirCreation(self.cache_dir.clone(), e))?;
            Self::cache_dataframe(df, &parquet_path).await?;
            info!("Cached station {} to {:?}", station, parquet_path);
        }

        LazyFrame::scan_parquet(&parquet_path, Default::default())
            .map_err(|e| StationDataError::ParquetScan(parquet_path.clone(), e))
    }

    /// Downloads the pipe-separated file for `station` and returns it cleaned, without caching.
    pub async fn download_frame(&self, station: &str) -> Result<DataFrame, StationDataError> {
        let url = self.station_url(station);
        info!("Downloading data from {}", url);

        let response = self
            .download_client
            .get(&url)
            .send()
            .await
            .map_err(|e| StationDataError::NetworkRequest(url.clone(), e))?;
        let response = match response.error_for_status() {
            Ok(resp) => resp,
            Err(e) => {
                warn!("HTTP error for {}: {:?}", url, e);
                return Err(match e.status() {
                    Some(status) => StationDataError::HttpStatus {
                        url,
                        status,
                        source: e,
                    },
                    None => StationDataError::NetworkRequest(url, e),
                });
            }
        };

        // Station files run to hundreds of MB, so stream to disk rather than into memory.
        let temp_file = NamedTempFile::new()?;
        let mut file = fs::File::create(temp_file.path()).await?;
        let stream = response.bytes_stream().map_err(std::io::Error::other);
        let mut reader = StreamReader::new(stream);
        let written = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        info!("Downloaded {} bytes for station {}", written, station);

        let station_owned = station.to_string();
        let clean = self.clean;
        task::spawn_blocking(move || {
            read_delimited(temp_file.path(), b'|')
                .and_then(|df| clean_frame(df, &clean))
                .map_err(|e| StationDataError::CsvRead {
                    station: station_owned,
                    source: e,
                })
        })
        .await?
    }

    async fn cache_dataframe(mut df: DataFrame, path: &Path) -> Result<(), StationDataError> {
        let path_buf = path.to_path_buf();
        task::spawn_blocking(move || {
            write_parquet(&mut df, &path_buf)
                .map_err(|e| StationDataError::ParquetWrite(path_buf, e))
        })
        .await??;
        Ok(())
    }
}
