//! Cache-first pagination over the remote image search.
//!
//! For every (query, page) the engine serves cached results when membership
//! rows exist, and otherwise fetches from the remote source and writes the page
//! through to the cache before returning it.

use crate::error::SearchError;
use crate::model::{ImageId, ImageItem, Page, PageMembership};
use crate::remote::RemoteSource;
use crate::storage::{CacheStats, Storage};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Results requested per page unless configured otherwise
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Operations the UI layer needs from the pipeline
#[async_trait]
pub trait ImageRepository: Send + Sync {
    /// Load one page of results for a query (pages are 1-based)
    async fn load_page(&self, query: &str, page: u32) -> Result<Page, SearchError>;

    /// Look up a previously ingested image
    async fn get_item_by_id(&self, id: ImageId) -> Result<Option<ImageItem>, SearchError>;
}

/// Whether a freshly fetched page is the last one for its query
pub fn is_last_remote_page(total_hits: u64, page: u32, page_size: u32, returned: usize) -> bool {
    total_hits <= u64::from(page) * u64::from(page_size) || returned < page_size as usize
}

pub struct PaginationEngine {
    remote: Arc<dyn RemoteSource>,
    storage: Arc<Mutex<Storage>>,
    page_size: u32,
    /// Evict older queries after each write when set
    max_cached_queries: Option<usize>,
}

impl PaginationEngine {
    pub fn new(remote: Arc<dyn RemoteSource>, storage: Storage) -> Self {
        Self {
            remote,
            storage: Arc::new(Mutex::new(storage)),
            page_size: DEFAULT_PAGE_SIZE,
            max_cached_queries: None,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Bound the number of cached queries. The query just written always
    /// survives, so a limit of 0 behaves like 1.
    pub fn with_max_cached_queries(mut self, max_queries: Option<usize>) -> Self {
        self.max_cached_queries = max_queries.map(|keep| keep.max(1));
        self
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub async fn stats(&self) -> Result<CacheStats, SearchError> {
        let storage = self.storage.lock().await;
        Ok(storage.stats()?)
    }

    /// Membership rows cached for (query, page)
    pub async fn memberships(
        &self,
        query: &str,
        page: u32,
    ) -> Result<Vec<PageMembership>, SearchError> {
        let storage = self.storage.lock().await;
        Ok(storage.memberships(query, page)?)
    }

    async fn load_page_inner(&self, query: &str, page: u32) -> Result<Page, SearchError> {
        let cached = {
            let storage = self.storage.lock().await;
            storage.has_page(query, page)?
        };

        if !cached {
            return self.fetch_and_cache(query, page).await;
        }

        let storage = self.storage.lock().await;
        let items = storage.get_items(query, page)?;
        let is_last_page = !storage.has_next_page(query, page)?;
        debug!(
            "Cache hit: {:?} page {} ({} items, last={})",
            query,
            page,
            items.len(),
            is_last_page
        );

        Ok(Page::new(items, is_last_page))
    }

    async fn fetch_and_cache(&self, query: &str, page: u32) -> Result<Page, SearchError> {
        info!("Cache miss, fetching: {:?} page {}", query, page);
        let response = self.remote.fetch_page(query, self.page_size, page).await?;

        let returned = response.hits.len();
        let total_hits = response.total_hits;
        let items: Vec<ImageItem> = response
            .hits
            .into_iter()
            .map(|dto| dto.into_item(query))
            .collect();

        // No await between taking the lock and committing, so an aborted load
        // either wrote the whole page or nothing.
        {
            let mut storage = self.storage.lock().await;
            storage.put_page(query, page, &items)?;
            if let Some(keep) = self.max_cached_queries {
                if let Err(e) = storage.evict_queries(keep) {
                    warn!("Cache eviction failed after caching {:?} page {}: {}", query, page, e);
                }
            }
        }

        let is_last_page = is_last_remote_page(total_hits, page, self.page_size, returned);
        debug!(
            "Fetched {:?} page {}: {} items of {} hits (last={})",
            query, page, returned, total_hits, is_last_page
        );

        Ok(Page::new(items, is_last_page))
    }
}

#[async_trait]
impl ImageRepository for PaginationEngine {
    async fn load_page(&self, query: &str, page: u32) -> Result<Page, SearchError> {
        match self.load_page_inner(query, page).await {
            Ok(page) => Ok(page),
            Err(e) if e.is_page_out_of_range() => {
                info!("{:?} page {} is past the last result", query, page);
                Ok(Page::end())
            }
            Err(e) => Err(e),
        }
    }

    async fn get_item_by_id(&self, id: ImageId) -> Result<Option<ImageItem>, SearchError> {
        let storage = self.storage.lock().await;
        Ok(storage.get_item_by_id(id)?)
    }
}
