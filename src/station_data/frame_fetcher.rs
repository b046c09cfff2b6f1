use crate::station_data::data_loader::StationDataLoader;
use crate::station_data::error::StationDataError;
use polars::prelude::LazyFrame;
use std::collections::{hash_map::Entry, HashMap};
use tokio::sync::Mutex;

/// Memoises the lazy frame of each station so repeated requests share one parquet scan.
pub struct FrameFetcher {
    loader: StationDataLoader,
    lazyframe_cache: Mutex<HashMap<String, LazyFrame>>,
}

impl FrameFetcher {
    pub fn new(loader: StationDataLoader) -> Self {
        Self {
            loader,
            lazyframe_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn loader(&self) -> &StationDataLoader {
        &self.loader
    }

    pub async fn get_cache_lazyframe(&self, station: &str) -> Result<LazyFrame, StationDataError> {
        {
            let cache = self.lazyframe_cache.lock().await;
            if let Some(frame) = cache.get(station) {
                return Ok(frame.clone());
            }
        }

        // Loading may download, so it runs without the lock held.
        let loaded_frame = self.loader.get_frame(station).await?;

        let mut cache = self.lazyframe_cache.lock().await;
        match cache.entry(station.to_string()) {
            // another task finished first
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                entry.insert(loaded_frame.clone());
                Ok(loaded_frame)
            }
        }
    }

    pub async fn cached_stations(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lazyframe_cache.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
