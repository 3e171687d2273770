//! Failure taxonomy for the search pipeline

use crate::storage::StorageError;
use thiserror::Error;

/// HTTP status the image API answers with when a page is past the end of the results
pub const PAGE_OUT_OF_RANGE_STATUS: u16 = 400;

#[derive(Error, Debug)]
pub enum SearchError {
    /// Host could not be reached (DNS failure, no route, connection refused)
    #[error("No connectivity: {0}")]
    NoConnectivity(String),

    /// The API rejected the request
    #[error("Client request error (HTTP {status}): {message}")]
    ClientRequest { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Plain I/O failure that is not a connectivity problem
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Cache error: {0}")]
    Storage(#[from] StorageError),
}

impl SearchError {
    /// The remote signalled that the requested page lies past the last result
    pub fn is_page_out_of_range(&self) -> bool {
        matches!(
            self,
            SearchError::ClientRequest { status, .. } if *status == PAGE_OUT_OF_RANGE_STATUS
        )
    }

    pub fn is_no_connectivity(&self) -> bool {
        matches!(self, SearchError::NoConnectivity(_))
    }
}
