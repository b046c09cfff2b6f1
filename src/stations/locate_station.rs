use crate::stations::error::LocateStationError;
use crate::stations::station_list::{fetch_station_list, StationFilter, STATION_LIST_URL};
use crate::types::station::GhcnhStation;
use bincode::config::{Configuration, Fixint, LittleEndian};
use haversine::{distance, Location as HaversineLocation, Units};
use log::{debug, info};
use ordered_float::OrderedFloat;
use reqwest::Client;
use rstar::RTree;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::Path;

const BINCODE_CACHE_FILE_NAME: &str = "ghcnh_stations.bin";
const BINCODE_CONFIG: Configuration<LittleEndian, Fixint> =
    bincode::config::standard().with_fixed_int_encoding();

/// Spatial index over the GHCNh station list.
#[derive(Debug, Clone)]
pub struct StationLocator {
    rtree: RTree<GhcnhStation>,
}

// Heap entry ordered by distance only.
struct StationCandidate<'a> {
    distance_km: OrderedFloat<f64>,
    station: &'a GhcnhStation,
}
impl PartialEq for StationCandidate<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.distance_km == other.distance_km
    }
}
impl Eq for StationCandidate<'_> {}
impl PartialOrd for StationCandidate<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for StationCandidate<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance_km.cmp(&other.distance_km)
    }
}

fn haversine_km(latitude: f64, longitude: f64, station: &GhcnhStation) -> f64 {
    distance(
        HaversineLocation {
            latitude,
            longitude,
        },
        HaversineLocation {
            latitude: station.location.latitude,
            longitude: station.location.longitude,
        },
        Units::Kilometers,
    )
}

impl StationLocator {
    /// Loads the station list from the bincode cache in `cache_dir`, downloading and caching it
    /// first if needed.
    pub async fn new(cache_dir: &Path) -> Result<Self, LocateStationError> {
        let cache_file = cache_dir.join(BINCODE_CACHE_FILE_NAME);

        let stations = if cache_file.exists() {
            let path_clone = cache_file.clone();
            tokio::task::spawn_blocking(move || Self::get_cached_stations(&path_clone)).await??
        } else {
            info!("Station cache not found, fetching {}", STATION_LIST_URL);
            let stations = fetch_station_list(&Client::new(), STATION_LIST_URL).await?;
            Self::cache_stations(stations.clone(), &cache_file).await?;
            stations
        };

        Ok(Self::from_stations(stations))
    }

    pub fn from_stations(stations: Vec<GhcnhStation>) -> Self {
        Self {
            rtree: RTree::bulk_load(stations),
        }
    }

    pub fn len(&self) -> usize {
        self.rtree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.rtree.size() == 0
    }

    pub fn get(&self, id: &str) -> Option<&GhcnhStation> {
        self.rtree.iter().find(|s| s.id == id)
    }

    /// All stations passing `filter`, sorted by ID.
    pub fn filtered(&self, filter: &StationFilter) -> Vec<GhcnhStation> {
        let mut stations: Vec<GhcnhStation> = self
            .rtree
            .iter()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        stations.sort_by(|a, b| a.id.cmp(&b.id));
        stations
    }

    fn get_cached_stations(cache_path: &Path) -> Result<Vec<GhcnhStation>, LocateStationError> {
        let bytes = std::fs::read(cache_path)
            .map_err(|e| LocateStationError::CacheRead(cache_path.to_path_buf(), e))?;
        let (stations, _) =
            bincode::serde::decode_from_slice::<Vec<GhcnhStation>, _>(&bytes, BINCODE_CONFIG)
                .map_err(|e| {
                    LocateStationError::CacheDecode(cache_path.to_path_buf(), Box::new(e))
                })?;
        debug!(
            "Loaded {} stations from {}",
            stations.len(),
            cache_path.display()
        );
        Ok(stations)
    }

    async fn cache_stations(
        stations: Vec<GhcnhStation>,
        cache_path: &Path,
    ) -> Result<(), LocateStationError> {
        let bincode_data = tokio::task::spawn_blocking(move || {
            bincode::serde::encode_to_vec(stations, BINCODE_CONFIG)
                .map_err(|e| LocateStationError::CacheEncode(Box::new(e)))
        })
        .await??;
        tokio::fs::write(cache_path, &bincode_data)
            .await
            .map_err(|e| LocateStationError::CacheWrite(cache_path.to_path_buf(), e))?;
        info!(
            "Wrote station cache ({} bytes) to {}",
            bincode_data.len(),
            cache_path.display()
        );
        Ok(())
    }

    /// Up to `n_results` stations within `max_distance_km`, nearest first, with their
    /// haversine distance in km.
    pub fn query(
        &self,
        latitude: f64,
        longitude: f64,
        n_results: usize,
        max_distance_km: f64,
        filter: Option<&StationFilter>,
    ) -> Vec<(GhcnhStation, f64)> {
        if n_results == 0 {
            return vec![];
        }
        match filter {
            None => self.fast_proximity_query(latitude, longitude, n_results, max_distance_km),
            Some(filter) => {
                self.filtered_heap_query(latitude, longitude, n_results, max_distance_km, filter)
            }
        }
    }

    fn fast_proximity_query(
        &self,
        latitude: f64,
        longitude: f64,
        n_results: usize,
        max_distance_km: f64,
    ) -> Vec<(GhcnhStation, f64)> {
        // R-tree order is planar, so look a little past n_results before re-sorting.
        let candidate_limit = (n_results * 2).max(20);

        let mut stations_with_dist: Vec<(GhcnhStation, f64)> = self
            .rtree
            .nearest_neighbor_iter(&[latitude, longitude])
            .take(candidate_limit)
            .filter_map(|station| {
                let dist_km = haversine_km(latitude, longitude, station);
                (dist_km <= max_distance_km).then(|| (station.clone(), dist_km))
            })
            .collect();

        stations_with_dist.sort_by(|a, b| a.1.total_cmp(&b.1));
        stations_with_dist.truncate(n_results);
        stations_with_dist
    }

    fn filtered_heap_query(
        &self,
        latitude: f64,
        longitude: f64,
        n_results: usize,
        max_distance_km: f64,
        filter: &StationFilter,
    ) -> Vec<(GhcnhStation, f64)> {
        let mut heap: BinaryHeap<StationCandidate<'_>> = BinaryHeap::with_capacity(n_results);
        let iteration_limit = n_results * 4;
        let mut items_checked = 0;

        for station in self.rtree.nearest_neighbor_iter(&[latitude, longitude]) {
            if !filter.matches(station) {
                continue;
            }
            items_checked += 1;

            let dist_km = haversine_km(latitude, longitude, station);
            if dist_km > max_distance_km * 2.0 {
                break;
            }
            if dist_km > max_distance_km {
                continue;
            }

            let candidate = StationCandidate {
                distance_km: OrderedFloat(dist_km),
                station,
            };
            if heap.len() < n_results {
                heap.push(candidate);
            } else if heap
                .peek()
                .is_some_and(|worst| candidate.distance_km < worst.distance_km)
            {
                heap.pop();
                heap.push(candidate);
            }

            if items_checked >= iteration_limit && heap.len() == n_results {
                break;
            }
        }

        heap.into_sorted_vec()
            .into_iter()
            .map(|c| (c.station.clone(), c.distance_km.into_inner()))
            .collect()
    }
}
