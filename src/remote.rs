//! HTTP client for the Pixabay image search API.

use crate::config::ApiConfig;
use crate::error::SearchError;
use crate::model::{ImageCounts, ImageDimensions, ImageId, ImageItem, ImageOwner, ImageUrls};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Query parameter carrying the API key
pub const API_KEY_QUERY_PARAM: &str = "key";

/// A page of search hits as returned by the API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    pub hits: Vec<ImageDto>,
    #[serde(default)]
    pub total: u64,
    #[serde(rename = "totalHits", default)]
    pub total_hits: u64,
}

/// Wire representation of a single hit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageDto {
    pub id: ImageId,
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub comments: i64,
    #[serde(default)]
    pub downloads: i64,
    #[serde(default)]
    pub likes: i64,
    #[serde(default)]
    pub views: i64,
    #[serde(rename = "imageWidth", default)]
    pub image_width: u32,
    #[serde(rename = "imageHeight", default)]
    pub image_height: u32,
    #[serde(rename = "previewURL", default)]
    pub preview_url: String,
    #[serde(rename = "largeImageURL", default)]
    pub large_image_url: Option<String>,
    #[serde(rename = "imageURL", default)]
    pub image_url: Option<String>,
    #[serde(rename = "userImageURL", default)]
    pub user_image_url: Option<String>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub user_id: i64,
}

impl ImageDto {
    /// Convert to the cached record, remembering the query that produced it
    pub fn into_item(self, query: &str) -> ImageItem {
        ImageItem {
            id: self.id,
            tags: self.tags,
            counts: ImageCounts {
                comments: self.comments,
                likes: self.likes,
                downloads: self.downloads,
                views: self.views,
            },
            dimensions: ImageDimensions {
                width: self.image_width,
                height: self.image_height,
            },
            urls: ImageUrls {
                thumbnail: self.preview_url,
                large: non_empty(self.large_image_url),
                full: non_empty(self.image_url),
                user_avatar: non_empty(self.user_image_url),
            },
            owner: ImageOwner {
                user_id: self.user_id,
                username: self.user,
            },
            search_query: Some(query.to_string()),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Source of remote search results
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch one page of hits. Stateless; repeating a call is safe.
    async fn fetch_page(
        &self,
        query: &str,
        page_size: u32,
        page: u32,
    ) -> Result<SearchResponse, SearchError>;
}

/// Append the API key unless the URL already carries one
pub fn ensure_api_key(url: &mut Url, api_key: &str) {
    if url.query_pairs().any(|(k, _)| k == API_KEY_QUERY_PARAM) {
        return;
    }
    url.query_pairs_mut().append_pair(API_KEY_QUERY_PARAM, api_key);
}

/// reqwest-backed [`RemoteSource`]
#[derive(Clone)]
pub struct PixabayClient {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl PixabayClient {
    pub fn new(config: &ApiConfig) -> Result<Self, SearchError> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            SearchError::Transport(format!("invalid base URL {:?}: {e}", config.base_url))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| SearchError::Transport(format!("failed to create HTTP client: {e}")))?;

        if config.api_key.is_empty() {
            warn!("No API key configured; requests will likely be rejected");
        }

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
        })
    }

    /// Full request URL for a search, API key included
    pub fn search_url(&self, query: &str, page_size: u32, page: u32) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("per_page", &page_size.to_string())
            .append_pair("page", &page.to_string());
        if !self.api_key.is_empty() {
            ensure_api_key(&mut url, &self.api_key);
        }
        url
    }
}

#[async_trait]
impl RemoteSource for PixabayClient {
    async fn fetch_page(
        &self,
        query: &str,
        page_size: u32,
        page: u32,
    ) -> Result<SearchResponse, SearchError> {
        let url = self.search_url(query, page_size, page);
        debug!("GET {} (query={:?}, page={})", self.base_url, query, page);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        let body = response.bytes().await.map_err(classify_request_error)?;

        if status.is_success() {
            return serde_json::from_slice::<SearchResponse>(&body)
                .map_err(|e| SearchError::MalformedResponse(e.to_string()));
        }

        let message = String::from_utf8_lossy(&body).trim().to_string();
        if status.is_client_error() {
            Err(SearchError::ClientRequest {
                status: status.as_u16(),
                message,
            })
        } else {
            Err(SearchError::Transport(format!("API error ({status}): {message}")))
        }
    }
}

fn classify_request_error(e: reqwest::Error) -> SearchError {
    if e.is_timeout() {
        SearchError::Timeout(e.to_string())
    } else if e.is_connect() {
        SearchError::NoConnectivity(e.to_string())
    } else if e.is_decode() {
        SearchError::MalformedResponse(e.to_string())
    } else {
        SearchError::Transport(e.to_string())
    }
}
