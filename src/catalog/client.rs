use crate::catalog::error::CatalogError;
use crate::catalog::item::{ItemCollection, Link, SearchRequest, StacItem};
use chrono::{DateTime, Utc};
use log::{debug, info};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub const PLANETARY_COMPUTER_STAC_URL: &str = "https://planetarycomputer.microsoft.com/api/stac/v1";
pub const PLANETARY_COMPUTER_TOKEN_URL: &str =
    "https://planetarycomputer.microsoft.com/api/sas/v1/token";

/// How long a fetched SAS token is reused.
pub const TOKEN_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Deserialize)]
struct SasToken {
    token: String,
    #[serde(rename = "msft:expiry", default)]
    expiry: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    fetched: Instant,
}

/// Searches a STAC API and signs the returned assets with Planetary Computer SAS tokens.
pub struct StacClient {
    client: Client,
    stac_url: String,
    token_url: String,
    tokens: Mutex<HashMap<String, CachedToken>>,
}

impl Default for StacClient {
    fn default() -> Self {
        Self::new(PLANETARY_COMPUTER_STAC_URL, PLANETARY_COMPUTER_TOKEN_URL)
    }
}

async fn send<T: DeserializeOwned>(request: RequestBuilder, url: &str) -> Result<T, CatalogError> {
    let response: Response = request
        .send()
        .await
        .map_err(|e| CatalogError::NetworkRequest(url.to_string(), e))?;
    let response = match response.error_for_status() {
        Ok(resp) => resp,
        Err(e) => {
            return Err(match e.status() {
                Some(status) => CatalogError::HttpStatus {
                    url: url.to_string(),
                    status,
                    source: e,
                },
                None => CatalogError::NetworkRequest(url.to_string(), e),
            })
        }
    };
    response
        .json::<T>()
        .await
        .map_err(|e| CatalogError::Decode(url.to_string(), e))
}

fn merge_json(base: &mut serde_json::Value, patch: &serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                base.insert(key.clone(), value.clone());
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

/// Appends `token` as the query string of blob storage hrefs. Other hrefs are left alone.
fn sign_href(href: &str, token: &str) -> Option<String> {
    if !href.contains(".blob.core.windows.net") || href.contains("se=") {
        return None;
    }
    let separator = if href.contains('?') { '&' } else { '?' };
    Some(format!("{href}{separator}{token}"))
}

impl StacClient {
    pub fn new(stac_url: impl Into<String>, token_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            stac_url: stac_url.into().trim_end_matches('/').to_string(),
            token_url: token_url.into().trim_end_matches('/').to_string(),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Runs `request` and follows `next` links until the last page.
    pub async fn search(&self, request: &SearchRequest) -> Result<ItemCollection, CatalogError> {
        let url = format!("{}/search", self.stac_url);
        let mut body = serde_json::to_value(request).map_err(CatalogError::Encode)?;
        info!(
            "Searching {} for collections {:?} ({})",
            url,
            request.collections,
            request
                .datetime
                .map(|d| d.to_string())
                .unwrap_or_else(|| "any time".to_string())
        );

        let mut page: ItemCollection = send(self.client.post(&url).json(&body), &url).await?;
        let mut features = std::mem::take(&mut page.features);
        let mut visited = HashSet::new();

        while let Some(next) = page.next_link().cloned() {
            let key = format!("{}{}", next.href, next.body.clone().unwrap_or_default());
            if !visited.insert(key) {
                return Err(CatalogError::PagingLoop(next.href));
            }
            page = self.follow(&next, &mut body).await?;
            debug!("Fetched page with {} items", page.features.len());
            features.append(&mut page.features);
        }

        info!("Search returned {} items", features.len());
        Ok(ItemCollection {
            features,
            links: vec![],
        })
    }

    async fn follow(
        &self,
        link: &Link,
        body: &mut serde_json::Value,
    ) -> Result<ItemCollection, CatalogError> {
        let is_post = link
            .method
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case("POST"));
        if !is_post {
            return send(self.client.get(&link.href), &link.href).await;
        }
        if let Some(patch) = &link.body {
            if link.merge {
                merge_json(body, patch);
            } else {
                *body = patch.clone();
            }
        }
        send(self.client.post(&link.href).json(body), &link.href).await
    }

    /// SAS token for `collection`, fetched at most once per [`TOKEN_TTL`].
    pub async fn token(&self, collection: &str) -> Result<String, CatalogError> {
        let mut tokens = self.tokens.lock().await;
        if let Some(cached) = tokens.get(collection) {
            if cached.fetched.elapsed() < TOKEN_TTL {
                return Ok(cached.token.clone());
            }
        }

        let url = format!("{}/{}", self.token_url, collection);
        let sas: SasToken = send(self.client.get(&url), &url).await?;
        debug!(
            "Fetched token for {} (expires {:?})",
            collection, sas.expiry
        );
        tokens.insert(
            collection.to_string(),
            CachedToken {
                token: sas.token.clone(),
                fetched: Instant::now(),
            },
        );
        Ok(sas.token)
    }

    /// Signs every blob storage asset href of `items` in place.
    pub async fn sign_items(&self, items: &mut [StacItem]) -> Result<(), CatalogError> {
        for item in items.iter_mut() {
            let collection = item
                .collection
                .clone()
                .ok_or_else(|| CatalogError::MissingCollection(item.id.clone()))?;
            let token = self.token(&collection).await?;
            for asset in item.assets.values_mut() {
                if let Some(signed) = sign_href(&asset.href, &token) {
                    asset.href = signed;
                }
            }
        }
        Ok(())
    }

    /// [`search`](Self::search) followed by [`sign_items`](Self::sign_items).
    pub async fn search_signed(
        &self,
        request: &SearchRequest,
    ) -> Result<ItemCollection, CatalogError> {
        let mut collection = self.search(request).await?;
        self.sign_items(&mut collection.features).await?;
        Ok(collection.sorted_by_date())
    }
}
