//! The GHCNh fixed-width station list and filtering of it.

use crate::stations::error::LocateStationError;
use crate::types::station::{GhcnhStation, Location};
use log::{info, warn};
use reqwest::Client;
use std::collections::HashSet;

pub const STATION_LIST_URL: &str =
    "https://www.ncei.noaa.gov/oa/global-historical-climatology-network/hourly/doc/ghcnh-station-list.txt";

// Character ranges of the fixed-width columns.
const ID: (usize, usize) = (0, 11);
const LATITUDE: (usize, usize) = (12, 20);
const LONGITUDE: (usize, usize) = (21, 30);
const ELEVATION: (usize, usize) = (31, 37);
const NAME: (usize, usize) = (38, 78);

/// Parses the station list. Lines without an ID or a parseable latitude/longitude are skipped;
/// blank elevations and names become `None`.
pub fn parse_station_list(text: &str) -> Vec<GhcnhStation> {
    let mut skipped = 0;
    let stations: Vec<GhcnhStation> = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let parsed = parse_line(line);
            if parsed.is_none() {
                skipped += 1;
            }
            parsed
        })
        .collect();
    if skipped > 0 {
        warn!("Skipped {} unparseable station list lines", skipped);
    }
    stations
}

fn parse_line(line: &str) -> Option<GhcnhStation> {
    let chars: Vec<char> = line.chars().collect();
    let field = |(start, end): (usize, usize)| -> Option<String> {
        let end = end.min(chars.len());
        if start >= end {
            return None;
        }
        let value: String = chars[start..end].iter().collect();
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    };
    let number = |span| field(span).and_then(|v| v.parse::<f64>().ok());

    Some(GhcnhStation {
        id: field(ID)?,
        name: field(NAME),
        location: Location {
            latitude: number(LATITUDE)?,
            longitude: number(LONGITUDE)?,
            elevation: number(ELEVATION),
        },
    })
}

pub async fn fetch_station_list(
    client: &Client,
    url: &str,
) -> Result<Vec<GhcnhStation>, LocateStationError> {
    info!("Fetching station list from {}", url);
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| LocateStationError::NetworkRequest(url.to_string(), e))?;
    let response = match response.error_for_status() {
        Ok(resp) => resp,
        Err(e) => {
            return Err(match e.status() {
                Some(status) => LocateStationError::HttpStatus {
                    url: url.to_string(),
                    status,
                    source: e,
                },
                None => LocateStationError::NetworkRequest(url.to_string(), e),
            })
        }
    };
    let text = response
        .text()
        .await
        .map_err(|e| LocateStationError::NetworkRequest(url.to_string(), e))?;

    let stations = tokio::task::spawn_blocking(move || parse_station_list(&text)).await?;
    if stations.is_empty() {
        return Err(LocateStationError::EmptyStationList(url.to_string()));
    }
    info!("Parsed {} stations", stations.len());
    Ok(stations)
}

/// Which stations to keep: an optional ID prefix (country code) minus known-bad IDs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationFilter {
    pub prefix: Option<String>,
    pub exclude_ids: HashSet<String>,
}

impl StationFilter {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    pub fn excluding<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn matches(&self, station: &GhcnhStation) -> bool {
        let prefix_ok = self
            .prefix
            .as_deref()
            .map_or(true, |p| station.id.starts_with(p));
        prefix_ok && !self.exclude_ids.contains(&station.id)
    }

    /// Keeps matching stations, preserving order.
    pub fn apply(&self, stations: &[GhcnhStation]) -> Vec<GhcnhStation> {
        stations
            .iter()
            .filter(|s| self.matches(s))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn line(id: &str, lat: &str, lon: &str, elev: &str, name: &str) -> String {
        format!("{id:<11} {lat:>8} {lon:>9} {elev:>6} {name:<40}")
    }

    pub(crate) fn sample_list() -> String {
        [
            line("SFM00068816", "-33.9648", "18.6017", "46.0", "CAPE TOWN INTL"),
            line("SFM00068368", "-26.1392", "28.2460", "1700.0", "JOHANNESBURG INTL"),
            line("SF000068588", "-29.6000", "31.1200", "", ""),
            line("ASN00066062", "-33.8607", "151.2050", "39.0", "SYDNEY"),
            line("BAD", "", "18.0", "", "NO LATITUDE"),
        ]
        .join("\n")
    }

    #[test]
    fn parses_fixed_width_columns() {
        let stations = parse_station_list(&sample_list());
        assert_eq!(stations.len(), 4);

        let cpt = &stations[0];
        assert_eq!(cpt.id, "SFM00068816");
        assert_eq!(cpt.name.as_deref(), Some("CAPE TOWN INTL"));
        assert_eq!(cpt.location.latitude, -33.9648);
        assert_eq!(cpt.location.longitude, 18.6017);
        assert_eq!(cpt.location.elevation, Some(46.0));
        assert_eq!(cpt.country_code(), "SF");

        let blank = &stations[2];
        assert_eq!(blank.location.elevation, None);
        assert_eq!(blank.name, None);
    }

    #[test]
    fn short_lines_do_not_panic() {
        assert!(parse_station_list("SFM0006881").is_empty());
        let stations = parse_station_list("SFM00068816 -33.9648   18.6017");
        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].name, None);
    }

    #[test]
    fn filter_by_prefix_and_exclusions() {
        let stations = parse_station_list(&sample_list());
        let filter = StationFilter::with_prefix("SF").excluding(["SFM00068368"]);
        let ids: Vec<_> = filter.apply(&stations).into_iter().map(|s| s.id).collect();
        assert_eq!(ids, ["SFM00068816", "SF000068588"]);

        assert_eq!(StationFilter::default().apply(&stations).len(), 4);
    }
}
