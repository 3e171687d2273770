//! Search session state and the transitions driven by UI events.
//!
//! [`SessionMachine`] is a plain reducer: events go in, fetch requests come
//! out, and fetch outcomes are folded back into the [`SearchSession`] the UI
//! renders. It does no I/O; the controller runs it on a single task.

use crate::error::SearchError;
use crate::model::{ImageId, ImageItem, Page};
use std::sync::Arc;
use tracing::debug;

/// Render state of one fetched (or fetching) page
#[derive(Debug, Clone)]
pub enum PageState {
    Loading,
    Success(Vec<ImageItem>),
    /// The first page came back with no results
    EmptyResult,
    Error(Arc<SearchError>),
    NoConnectivity,
}

impl PageState {
    fn list_items(&self) -> Vec<ListItem> {
        match self {
            PageState::Loading => vec![ListItem::Loading],
            PageState::Success(items) => items.iter().cloned().map(ListItem::Image).collect(),
            PageState::EmptyResult => vec![ListItem::EmptyResult],
            PageState::Error(cause) => vec![ListItem::Error(cause.to_string())],
            PageState::NoConnectivity => vec![ListItem::NoConnectivity],
        }
    }
}

/// One displayable row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListItem {
    Image(ImageItem),
    Loading,
    Error(String),
    NoConnectivity,
    EmptyResult,
}

/// UI events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SetQuery(String),
    LoadNextPage,
    Retry,
    SelectItem(Option<ImageId>),
}

/// A page load the caller must perform and report back with [`SessionMachine::apply`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub generation: u64,
    pub query: String,
    pub page: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    /// No query has been issued yet
    Idle,
    Fetching { query: String, page: u32 },
    Settled,
    Errored,
}

/// Everything the UI needs to render the result list
#[derive(Debug, Clone)]
pub struct SearchSession {
    pub query: String,
    /// Page states in fetch order
    pub pages: Vec<PageState>,
    /// Next 1-based page to request
    pub next_page: u32,
    pub is_end_of_list: bool,
    pub selected_item: Option<ImageId>,
}

impl Default for SearchSession {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl SearchSession {
    pub fn new(query: String) -> Self {
        Self {
            query,
            pages: Vec::new(),
            next_page: 1,
            is_end_of_list: false,
            selected_item: None,
        }
    }

    pub fn list_items(&self) -> Vec<ListItem> {
        self.pages.iter().flat_map(PageState::list_items).collect()
    }

    pub fn is_loading(&self) -> bool {
        self.pages.iter().any(|p| matches!(p, PageState::Loading))
    }

    pub fn is_error(&self) -> bool {
        self.pages.iter().any(|p| matches!(p, PageState::Error(_)))
    }

    pub fn can_load_more(&self) -> bool {
        !self.is_loading() && !self.is_end_of_list
    }

    /// Number of image rows loaded so far
    pub fn image_count(&self) -> usize {
        self.pages
            .iter()
            .map(|p| match p {
                PageState::Success(items) => items.len(),
                _ => 0,
            })
            .sum()
    }

    /// The selected image, if it is part of the loaded pages
    pub fn selected(&self) -> Option<&ImageItem> {
        let id = self.selected_item?;
        self.pages.iter().find_map(|p| match p {
            PageState::Success(items) => items.iter().find(|i| i.id == id),
            _ => None,
        })
    }
}

/// Single-writer state machine behind a search screen
#[derive(Debug, Default)]
pub struct SessionMachine {
    session: SearchSession,
    generation: u64,
    in_flight: Option<FetchRequest>,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> &SearchSession {
        &self.session
    }

    pub fn in_flight(&self) -> Option<&FetchRequest> {
        self.in_flight.as_ref()
    }

    pub fn phase(&self) -> SessionPhase {
        if let Some(request) = &self.in_flight {
            return SessionPhase::Fetching {
                query: request.query.clone(),
                page: request.page,
            };
        }
        match self.session.pages.last() {
            None if self.session.query.is_empty() => SessionPhase::Idle,
            Some(PageState::Error(_)) | Some(PageState::NoConnectivity) => SessionPhase::Errored,
            _ => SessionPhase::Settled,
        }
    }

    /// Apply a UI event. Returns the fetch to start, if any; starting it
    /// supersedes whatever fetch was in flight.
    pub fn handle(&mut self, event: SessionEvent) -> Option<FetchRequest> {
        match event {
            SessionEvent::SetQuery(query) => {
                if query == self.session.query && self.phase() != SessionPhase::Idle {
                    return None;
                }
                debug!("New query {:?}, resetting session", query);
                self.session = SearchSession::new(query);
                Some(self.dispatch())
            }
            SessionEvent::LoadNextPage => {
                if self.phase() == SessionPhase::Idle || !self.session.can_load_more() {
                    return None;
                }
                Some(self.dispatch())
            }
            SessionEvent::Retry => {
                if self.phase() != SessionPhase::Errored || !self.session.can_load_more() {
                    return None;
                }
                Some(self.dispatch())
            }
            SessionEvent::SelectItem(id) => {
                self.session.selected_item = id;
                None
            }
        }
    }

    fn dispatch(&mut self) -> FetchRequest {
        self.generation += 1;

        // Banners from earlier attempts go away; exactly one Loading row remains
        self.session
            .pages
            .retain(|p| matches!(p, PageState::Success(_)));
        self.session.pages.push(PageState::Loading);

        let request = FetchRequest {
            generation: self.generation,
            query: self.session.query.clone(),
            page: self.session.next_page,
        };
        self.in_flight = Some(request.clone());
        request
    }

    /// Fold a fetch outcome into the session. Returns false, leaving state
    /// untouched, when the request has been superseded.
    pub fn apply(&mut self, request: &FetchRequest, result: Result<Page, SearchError>) -> bool {
        if self.in_flight.as_ref() != Some(request) {
            debug!(
                "Discarding stale result for {:?} page {} (generation {}, current {})",
                request.query, request.page, request.generation, self.generation
            );
            return false;
        }
        self.in_flight = None;
        self.session
            .pages
            .retain(|p| !matches!(p, PageState::Loading));

        match result {
            Ok(page) => {
                let state = if page.items.is_empty() && request.page == 1 {
                    PageState::EmptyResult
                } else {
                    PageState::Success(page.items)
                };
                self.session.pages.push(state);
                self.session.is_end_of_list = page.is_last_page;
                match self.session.next_page.checked_add(1) {
                    Some(next) => self.session.next_page = next,
                    None => self.session.is_end_of_list = true,
                }
            }
            Err(e) if e.is_no_connectivity() => {
                self.session.pages.push(PageState::NoConnectivity);
            }
            Err(e) => {
                self.session.pages.push(PageState::Error(Arc::new(e)));
            }
        }
        true
    }
}
