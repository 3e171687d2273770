//! Image records and page types

use serde::{Deserialize, Serialize};

/// Remote identifier of an image, stable across queries
pub type ImageId = i64;

/// Image record as stored in the cache and handed to the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageItem {
    pub id: ImageId,

    /// Comma-separated tag list as delivered by the API ("cat, animal, pet")
    pub tags: String,

    pub counts: ImageCounts,

    pub dimensions: ImageDimensions,

    pub urls: ImageUrls,

    pub owner: ImageOwner,

    /// Query that caused this record to be ingested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
}

impl ImageItem {
    /// Individual tags, for the detail view
    pub fn tag_list(&self) -> Vec<&str> {
        self.tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCounts {
    pub comments: i64,
    pub likes: i64,
    pub downloads: i64,
    pub views: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrls {
    /// Small preview used in the result grid
    pub thumbnail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_avatar: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageOwner {
    pub user_id: i64,
    pub username: String,
}

/// One page of results returned by the pagination engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<ImageItem>,
    /// No further pages should be requested for this query
    pub is_last_page: bool,
}

impl Page {
    pub fn new(items: Vec<ImageItem>, is_last_page: bool) -> Self {
        Self {
            items,
            is_last_page,
        }
    }

    /// The empty terminal page used when the remote reports the page is out of range
    pub fn end() -> Self {
        Self::new(Vec::new(), true)
    }
}

/// Records that an item belongs to a query's page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageMembership {
    pub query: String,
    pub page: u32,
    pub image_id: ImageId,
}
