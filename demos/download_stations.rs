//! Downloads every South African GHCNh station into the cache and writes one combined file.
//!
//! Run with `RUST_LOG=info` to follow progress.

use lst_filler::{DownloadConfig, LstFiller, LstFillerError};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<(), LstFillerError> {
    env_logger::init();

    let client = LstFiller::new().await?;
    let settings = DownloadConfig {
        station_prefix: Some("SF".to_string()),
        combined_output: Some(PathBuf::from("ghcnh_south_africa.parquet")),
        ..Default::default()
    };

    let report = client
        .download_stations()
        .settings(settings)
        .call()
        .await?;

    println!(
        "Downloaded {} stations, {} failed: {:?}",
        report.succeeded.len(),
        report.failed.len(),
        report.failed_ids()
    );
    Ok(())
}
