//! Error types for backends and the sync client.

use thiserror::Error;

use folio_crdt::{CommandError, TreeError};
use folio_types::DocId;

/// Errors reported by a [`Backend`](crate::Backend).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("document not found: {0}")]
    NotFound(DocId),
    #[error("backend rejected the batch: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors from the sync client.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Operation needs an open document.
    #[error("no document is open")]
    NotOpen,

    /// Snapshot fetch failed; nothing was opened.
    #[error("failed to open document: {0}")]
    Open(#[source] BackendError),

    /// Fetched snapshot violates tree invariants.
    #[error("invalid snapshot: {0}")]
    Snapshot(#[from] TreeError),

    /// The backend rejected a flushed batch. Not retried.
    #[error("flush failed: {0}")]
    Flush(#[source] BackendError),

    /// Snapshot re-fetch failed; the tree keeps its previous state.
    #[error("resync failed: {0}")]
    Resync(#[source] BackendError),

    #[error(transparent)]
    Command(#[from] CommandError),

    /// The session was closed while the operation was in flight.
    #[error("operation cancelled by close")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, SyncError>;
