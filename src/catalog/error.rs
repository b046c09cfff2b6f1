use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Network request failed for {0}")]
    NetworkRequest(String, #[source] reqwest::Error),

    #[error("HTTP request failed for {url} with status {status}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to decode response from {0}")]
    Decode(String, #[source] reqwest::Error),

    #[error("Failed to encode search request")]
    Encode(#[source] serde_json::Error),

    #[error("Item '{0}' has no collection, so it cannot be signed")]
    MissingCollection(String),

    #[error("Search paging revisited {0}")]
    PagingLoop(String),
}
