//! Runs a [`SessionMachine`] on its own task.
//!
//! UI events arrive on an mpsc channel, page loads run on spawned tasks, and
//! their outcomes come back on a second channel, so the machine has exactly
//! one writer. Every change is published as a [`SearchSession`] snapshot on a
//! watch channel.

use crate::engine::ImageRepository;
use crate::error::SearchError;
use crate::model::{ImageId, ImageItem, Page};
use crate::session::{FetchRequest, SearchSession, SessionEvent, SessionMachine};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Error, Debug)]
#[error("search session has shut down")]
pub struct SessionClosed;

struct Loaded {
    request: FetchRequest,
    result: Result<Page, SearchError>,
}

/// Owner of the session state
pub struct SessionController {
    machine: SessionMachine,
    repository: Arc<dyn ImageRepository>,
    state_tx: watch::Sender<SearchSession>,
    loaded_tx: mpsc::Sender<Loaded>,
    in_flight: Option<JoinHandle<()>>,
}

impl SessionController {
    /// Start a controller task and return the handle the UI talks to
    pub fn spawn(repository: Arc<dyn ImageRepository>) -> SessionHandle {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (loaded_tx, loaded_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(SearchSession::default());

        let controller = SessionController {
            machine: SessionMachine::new(),
            repository: Arc::clone(&repository),
            state_tx,
            loaded_tx,
            in_flight: None,
        };
        let task = tokio::spawn(controller.run(event_rx, loaded_rx));

        SessionHandle {
            events: event_tx,
            state: state_rx,
            repository,
            task,
        }
    }

    async fn run(
        mut self,
        mut events: mpsc::Receiver<SessionEvent>,
        mut loaded: mpsc::Receiver<Loaded>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    debug!("Session event: {:?}", event);
                    if let Some(request) = self.machine.handle(event) {
                        self.dispatch(request);
                    }
                }
                Some(Loaded { request, result }) = loaded.recv() => {
                    if !self.machine.apply(&request, result) {
                        continue;
                    }
                    self.in_flight = None;
                }
            }
            self.state_tx.send_replace(self.machine.session().clone());
        }

        if let Some(task) = self.in_flight.take() {
            task.abort();
        }
        info!("Search session closed");
    }

    fn dispatch(&mut self, request: FetchRequest) {
        if let Some(previous) = self.in_flight.take() {
            if !previous.is_finished() {
                debug!("Cancelling in-flight page load");
            }
            previous.abort();
        }

        info!("Loading {:?} page {}", request.query, request.page);
        let repository = Arc::clone(&self.repository);
        let loaded_tx = self.loaded_tx.clone();
        self.in_flight = Some(tokio::spawn(async move {
            let result = repository.load_page(&request.query, request.page).await;
            // The controller may already be gone; nothing left to update then
            let _ = loaded_tx.send(Loaded { request, result }).await;
        }));
    }
}

/// UI-side handle to a running session
pub struct SessionHandle {
    events: mpsc::Sender<SessionEvent>,
    state: watch::Receiver<SearchSession>,
    repository: Arc<dyn ImageRepository>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub async fn send(&self, event: SessionEvent) -> Result<(), SessionClosed> {
        self.events.send(event).await.map_err(|_| SessionClosed)
    }

    pub async fn set_query(&self, query: impl Into<String>) -> Result<(), SessionClosed> {
        self.send(SessionEvent::SetQuery(query.into())).await
    }

    pub async fn load_next_page(&self) -> Result<(), SessionClosed> {
        self.send(SessionEvent::LoadNextPage).await
    }

    pub async fn retry(&self) -> Result<(), SessionClosed> {
        self.send(SessionEvent::Retry).await
    }

    pub async fn select_item(&self, id: Option<ImageId>) -> Result<(), SessionClosed> {
        self.send(SessionEvent::SelectItem(id)).await
    }

    /// Latest published state
    pub fn snapshot(&self) -> SearchSession {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchSession> {
        self.state.clone()
    }

    /// Wait until the published state satisfies `predicate`
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&SearchSession) -> bool,
    ) -> Result<SearchSession, SessionClosed> {
        let mut rx = self.state.clone();
        let state = rx.wait_for(predicate).await.map_err(|_| SessionClosed)?;
        Ok(state.clone())
    }

    /// Detail lookup for the image screen
    pub async fn item_details(&self, id: ImageId) -> Result<Option<ImageItem>, SearchError> {
        self.repository.get_item_by_id(id).await
    }

    /// Stop the controller and wait for it to exit
    pub async fn shutdown(self) {
        let SessionHandle { events, task, .. } = self;
        drop(events);
        let _ = task.await;
    }
}
