//! Runs a matchup from a YAML config.
//!
//! ```text
//! cargo run --example matchup_from_config -- config/example.yaml modis.parquet [dem.parquet]
//! ```
//!
//! The MODIS and DEM stacks are decoded raster cubes written with `write_stack_parquet`.
//! Before matching, the signed asset links of the configured search are listed.

use lst_filler::{load_pipeline_config, LstFiller, LstFillerError};
use std::env;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<(), LstFillerError> {
    env_logger::init();
    configure_polars_display();

    let mut args = env::args().skip(1);
    let (Some(config_path), Some(modis_path)) = (args.next(), args.next()) else {
        eprintln!("usage: matchup_from_config <config.yaml> <modis.parquet> [dem.parquet]");
        return Ok(());
    };
    let dem_path = args.next().map(PathBuf::from);

    let config = load_pipeline_config(config_path.as_ref(), None)?;
    let client = LstFiller::from_config(&config).await?;

    if let Some(modis) = &config.modis {
        let scenes = client
            .scene_assets()
            .source(modis)
            .maybe_datetime(config.matchup.datetime)
            .call()
            .await?;
        println!("{} MODIS scenes in the catalog", scenes.len());
        if let Some(first) = scenes.first() {
            println!("First scene {} ({:?}): {:?}", first.item_id, first.date, first.hrefs);
        }
    }

    let table = client
        .run_config(&config, modis_path.as_ref(), dem_path.as_deref())
        .await?;
    println!("{}", table.head(Some(10)));
    Ok(())
}

fn configure_polars_display() {
    env::set_var("POLARS_FMT_MAX_COLS", "-1");
    env::set_var("POLARS_FMT_MAX_ROWS", "20");
}
