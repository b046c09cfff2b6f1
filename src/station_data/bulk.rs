//! Downloading many stations politely, with one retry pass for the stations that failed.

use crate::station_data::clean::CleanOptions;
use crate::station_data::data_loader::StationDataLoader;
use crate::station_data::error::StationDataError;
use crate::utils::write_parquet;
use bon::bon;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use polars::prelude::*;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Stations that ended up cached, and those that still failed after the retry pass.
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, StationDataError)>,
}

impl DownloadReport {
    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed.iter().map(|(id, _)| id.as_str()).collect()
    }
}

pub struct BulkDownloader {
    loader: StationDataLoader,
    retry_loader: StationDataLoader,
    request_interval: Duration,
}

fn progress_bar(len: usize, message: &'static str) -> ProgressBar {
    let progress = ProgressBar::new(len as u64).with_message(message);
    if let Ok(style) = ProgressStyle::with_template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
    {
        progress.set_style(style);
    }
    progress
}

fn client_with_timeout(timeout: Duration) -> Result<Client, StationDataError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(StationDataError::ClientBuild)
}

#[bon]
impl BulkDownloader {
    /// Builds a downloader caching into `cache_dir`.
    ///
    /// * `request_interval` - pause after every download attempt, default 2 s
    /// * `timeout` - per-request timeout of the first pass, default 60 s
    /// * `retry_timeout` - per-request timeout of the retry pass, default 120 s
    /// * `base_url` - overrides the GHCNh by-station URL
    #[builder]
    pub fn new(
        #[builder(into)] cache_dir: PathBuf,
        #[builder(default = Duration::from_secs(2))] request_interval: Duration,
        #[builder(default = Duration::from_secs(60))] timeout: Duration,
        #[builder(default = Duration::from_secs(120))] retry_timeout: Duration,
        #[builder(into)] base_url: Option<String>,
        #[builder(default)] clean: CleanOptions,
    ) -> Result<Self, StationDataError> {
        let make_loader = |timeout| -> Result<StationDataLoader, StationDataError> {
            let loader = StationDataLoader::new(&cache_dir)
                .with_client(client_with_timeout(timeout)?)
                .with_clean_options(clean);
            Ok(match &base_url {
                Some(url) => loader.with_base_url(url.clone()),
                None => loader,
            })
        };
        Ok(Self {
            loader: make_loader(timeout)?,
            retry_loader: make_loader(retry_timeout)?,
            request_interval,
        })
    }

    pub fn loader(&self) -> &StationDataLoader {
        &self.loader
    }

    /// Downloads every station in `ids` that is not cached yet. Stations that fail are
    /// retried once with the longer timeout. Errors are collected, never returned.
    pub async fn download_all(&self, ids: &[String]) -> DownloadReport {
        let mut report = DownloadReport::default();
        let mut first_failures = Vec::new();

        info!("Downloading {} stations", ids.len());
        let progress = progress_bar(ids.len(), "Downloading");
        for id in ids {
            match self.fetch(&self.loader, id).await {
                Ok(()) => report.succeeded.push(id.clone()),
                Err(e) => {
                    warn!("Error downloading {}: {}", id, e);
                    first_failures.push(id.clone());
                }
            }
            progress.inc(1);
        }
        progress.finish_and_clear();

        if !first_failures.is_empty() {
            info!("Retrying {} failed stations", first_failures.len());
            let progress = progress_bar(first_failures.len(), "Retrying");
            for id in first_failures {
                match self.fetch(&self.retry_loader, &id).await {
                    Ok(()) => report.succeeded.push(id),
                    Err(e) => {
                        warn!("Retry failed for {}: {}", id, e);
                        report.failed.push((id, e));
                    }
                }
                progress.inc(1);
            }
            progress.finish_and_clear();
        }

        info!(
            "{} stations downloaded, {} failed",
            report.succeeded.len(),
            report.failed.len()
        );
        report
    }

    async fn fetch(&self, loader: &StationDataLoader, id: &str) -> Result<(), StationDataError> {
        if loader.parquet_path(id).exists() {
            return Ok(());
        }
        let result = loader.get_frame(id).await.map(|_| ());
        if !self.request_interval.is_zero() {
            tokio::time::sleep(self.request_interval).await;
        }
        result
    }

    /// Concatenates the cached frames of `ids` into one parquet at `output`. Columns missing
    /// from some stations are filled with nulls.
    pub async fn write_combined(
        &self,
        ids: &[String],
        output: &Path,
    ) -> Result<PathBuf, StationDataError> {
        let frames = ids
            .iter()
            .map(|id| {
                let path = self.loader.parquet_path(id);
                LazyFrame::scan_parquet(&path, Default::default())
                    .map_err(|e| StationDataError::ParquetScan(path, e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output = output.to_path_buf();
        let n_stations = ids.len();
        tokio::task::spawn_blocking(move || {
            let mut combined = concat_lf_diagonal(frames, UnionArgs::default())?.collect()?;
            info!(
                "Writing {} rows from {} stations to {}",
                combined.height(),
                n_stations,
                output.display()
            );
            write_parquet(&mut combined, &output)
                .map_err(|e| StationDataError::ParquetWrite(output.clone(), e))?;
            Ok::<_, StationDataError>(output)
        })
        .await?
    }
}
