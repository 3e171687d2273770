//! Image Search Library
//!
//! Paginated image search against the Pixabay API with a local SQLite cache.
//! Pages already seen are served from the cache; new pages are fetched and
//! written through before they reach the UI.

pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod model;
pub mod remote;
pub mod session;
pub mod storage;

pub use config::Config;
pub use controller::{SessionClosed, SessionController, SessionHandle};
pub use engine::{ImageRepository, PaginationEngine};
pub use error::SearchError;
pub use model::{ImageId, ImageItem, Page};
pub use remote::{PixabayClient, RemoteSource, SearchResponse};
pub use session::{ListItem, PageState, SearchSession, SessionEvent, SessionPhase};
pub use storage::Storage;
