//! The subset of the STAC item and search schemas the pipeline reads.

use crate::types::datetime_range::DatetimeRange;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Body of a `POST /search` request. Also the `search` section of a raster source config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub collections: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime: Option<DatetimeRange>,
    /// STAC query extension, passed through as is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<serde_json::Value>,
    /// Page size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl SearchRequest {
    pub fn with_datetime(mut self, datetime: DatetimeRange) -> Self {
        self.datetime = Some(datetime);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub rel: String,
    pub href: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    /// When true, `body` is merged into the previous request body instead of replacing it.
    #[serde(default)]
    pub merge: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub href: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemProperties {
    #[serde(default)]
    pub datetime: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_datetime: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_datetime: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StacItem {
    pub id: String,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
    #[serde(default)]
    pub properties: ItemProperties,
    #[serde(default)]
    pub assets: BTreeMap<String, Asset>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
}

impl StacItem {
    /// The day the scene was captured: `start_datetime`, falling back to `datetime`.
    /// MODIS view times are hours relative to this date.
    pub fn acquisition_date(&self) -> Option<NaiveDate> {
        self.properties
            .start_datetime
            .or(self.properties.datetime)
            .map(|t| t.date_naive())
    }

    /// `(asset key, href)` for each requested asset the item has, in the requested order.
    pub fn asset_hrefs(&self, assets: &[String]) -> Vec<(String, String)> {
        assets
            .iter()
            .filter_map(|key| self.assets.get(key).map(|a| (key.clone(), a.href.clone())))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemCollection {
    #[serde(default)]
    pub features: Vec<StacItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
}

impl ItemCollection {
    pub fn next_link(&self) -> Option<&Link> {
        self.links.iter().find(|l| l.rel == "next")
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Items sorted by acquisition date, undated items last.
    pub fn sorted_by_date(mut self) -> Self {
        self.features
            .sort_by_key(|item| (item.acquisition_date().is_none(), item.acquisition_date()));
        self
    }
}
