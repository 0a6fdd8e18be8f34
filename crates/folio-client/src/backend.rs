//! The seam between the client and whatever stores documents.
//!
//! A [`Backend`] serves snapshots, accepts action batches and pushes
//! [`DocumentUpdated`] notifications into a [`NotificationSink`]. The
//! per-document event bus is modelled as [`Backend::subscribe`] returning a
//! [`Subscription`] whose disposer runs exactly once.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use folio_types::{Action, ClientId, Delta, DocId, DocumentSnapshot, TextId};

use crate::error::BackendError;

// ============================================================================
// Notifications
// ============================================================================

/// One normalized change inside a notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteUpdate {
    /// A text was replaced.
    #[serde(rename_all = "camelCase")]
    Text { text_id: TextId, delta: Delta },
    /// Structural actions, applied as one batch.
    Block { actions: Vec<Action> },
    /// Local state can no longer be patched; re-fetch the snapshot.
    Reset,
}

/// Notification pushed on a document's channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentUpdated {
    pub doc_id: DocId,
    /// Client whose flush produced this, if any.
    #[serde(default)]
    pub origin: Option<ClientId>,
    pub updates: Vec<RemoteUpdate>,
}

impl DocumentUpdated {
    pub fn new(doc_id: DocId, origin: Option<ClientId>, updates: Vec<RemoteUpdate>) -> Self {
        Self {
            doc_id,
            origin,
            updates,
        }
    }
}

/// Where a backend delivers notifications for one subscriber.
///
/// Delivery never blocks; it returns `false` once the receiver is gone.
#[derive(Clone)]
pub struct NotificationSink {
    deliver: Arc<dyn Fn(DocumentUpdated) -> bool + Send + Sync>,
}

impl NotificationSink {
    pub fn new(deliver: impl Fn(DocumentUpdated) -> bool + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    pub fn deliver(&self, update: DocumentUpdated) -> bool {
        (self.deliver)(update)
    }
}

impl fmt::Debug for NotificationSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NotificationSink")
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Handle to an active channel subscription.
///
/// The disposer runs once, on [`dispose`](Self::dispose) or on drop,
/// whichever comes first.
pub struct Subscription {
    disposer: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(disposer: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            disposer: Some(Box::new(disposer)),
        }
    }

    pub fn dispose(&mut self) {
        if let Some(disposer) = self.disposer.take() {
            disposer();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposer.is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ============================================================================
// Backend
// ============================================================================

/// Document storage and change fan-out.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Fetch the whole document.
    async fn open_document(&self, doc_id: &DocId) -> Result<DocumentSnapshot, BackendError>;

    /// Apply a batch on behalf of `client_id`. Never called with an empty batch.
    async fn apply_actions(
        &self,
        doc_id: &DocId,
        client_id: &ClientId,
        actions: &[Action],
    ) -> Result<(), BackendError>;

    /// Start delivering notifications for `doc_id` into `sink`.
    fn subscribe(&self, doc_id: &DocId, sink: NotificationSink) -> Subscription;

    /// Release server-side resources. Best-effort.
    async fn close_document(&self, doc_id: &DocId) -> Result<(), BackendError>;
}
