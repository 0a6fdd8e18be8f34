//! In-process [`Backend`] for tests, demos and the CLI.
//!
//! Holds each document as a [`BlockTree`], applies flushed batches to it and
//! echoes them to every subscriber with the flushing client as origin.
//! Failures and latency can be injected to exercise the client's error paths.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use folio_crdt::{BlockTree, TreeConfig};
use folio_types::{Action, ClientId, DocId, DocumentSnapshot};

use crate::backend::{Backend, DocumentUpdated, NotificationSink, RemoteUpdate, Subscription};
use crate::error::BackendError;

#[derive(Default)]
struct Inner {
    docs: HashMap<DocId, BlockTree>,
    subscribers: HashMap<DocId, Vec<(u64, NotificationSink)>>,
    next_subscription: u64,
    applied: Vec<(DocId, ClientId, Vec<Action>)>,
    closed: Vec<DocId>,
    open_calls: usize,
    fail_applies: usize,
    fail_opens: usize,
    apply_delay: Option<Duration>,
    open_delay: Option<Duration>,
}

/// Documents kept in memory; cheap to clone and share.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store (or overwrite) a document.
    pub fn insert_document(&self, doc_id: DocId, snapshot: DocumentSnapshot) -> Result<(), BackendError> {
        let tree = BlockTree::from_snapshot(snapshot, TreeConfig::default())
            .map_err(|e| BackendError::Rejected(e.to_string()))?;
        self.inner.lock().docs.insert(doc_id, tree);
        Ok(())
    }

    /// Current server-side state of a document.
    pub fn snapshot(&self, doc_id: &DocId) -> Option<DocumentSnapshot> {
        self.inner.lock().docs.get(doc_id).map(|t| t.snapshot().clone())
    }

    /// Apply a batch as another client would, and fan it out.
    pub fn apply_remote(&self, doc_id: &DocId, origin: ClientId, actions: Vec<Action>) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        let tree = inner
            .docs
            .get_mut(doc_id)
            .ok_or_else(|| BackendError::NotFound(doc_id.clone()))?;
        tree.apply(&actions);
        let update = DocumentUpdated::new(doc_id.clone(), Some(origin), vec![RemoteUpdate::Block { actions }]);
        Self::fan_out(&inner, update);
        Ok(())
    }

    /// Push a raw notification to every subscriber of its document.
    ///
    /// Returns how many sinks accepted it.
    pub fn publish(&self, update: DocumentUpdated) -> usize {
        let inner = self.inner.lock();
        Self::fan_out(&inner, update)
    }

    /// Reject the next `count` flushes.
    pub fn fail_next_applies(&self, count: usize) {
        self.inner.lock().fail_applies = count;
    }

    /// Reject the next `count` snapshot fetches.
    pub fn fail_next_opens(&self, count: usize) {
        self.inner.lock().fail_opens = count;
    }

    /// Delay every flush by `delay` before it is applied.
    pub fn set_apply_delay(&self, delay: Option<Duration>) {
        self.inner.lock().apply_delay = delay;
    }

    /// Delay every snapshot fetch by `delay` before the document is read.
    pub fn set_open_delay(&self, delay: Option<Duration>) {
        self.inner.lock().open_delay = delay;
    }

    /// Batches accepted for `doc_id`, in arrival order.
    pub fn applied_batches(&self, doc_id: &DocId) -> Vec<Vec<Action>> {
        self.inner
            .lock()
            .applied
            .iter()
            .filter(|(d, _, _)| d == doc_id)
            .map(|(_, _, actions)| actions.clone())
            .collect()
    }

    pub fn subscriber_count(&self, doc_id: &DocId) -> usize {
        self.inner.lock().subscribers.get(doc_id).map_or(0, Vec::len)
    }

    pub fn closed_documents(&self) -> Vec<DocId> {
        self.inner.lock().closed.clone()
    }

    pub fn open_calls(&self) -> usize {
        self.inner.lock().open_calls
    }

    fn fan_out(inner: &Inner, update: DocumentUpdated) -> usize {
        let Some(sinks) = inner.subscribers.get(&update.doc_id) else {
            return 0;
        };
        sinks
            .iter()
            .filter(|(_, sink)| sink.deliver(update.clone()))
            .count()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn open_document(&self, doc_id: &DocId) -> Result<DocumentSnapshot, BackendError> {
        let delay = {
            let mut inner = self.inner.lock();
            inner.open_calls += 1;
            inner.open_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock();
        if inner.fail_opens > 0 {
            inner.fail_opens -= 1;
            return Err(BackendError::Transport("injected open failure".into()));
        }
        inner
            .docs
            .get(doc_id)
            .map(|t| t.snapshot().clone())
            .ok_or_else(|| BackendError::NotFound(doc_id.clone()))
    }

    async fn apply_actions(
        &self,
        doc_id: &DocId,
        client_id: &ClientId,
        actions: &[Action],
    ) -> Result<(), BackendError> {
        let delay = self.inner.lock().apply_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock();
        if inner.fail_applies > 0 {
            inner.fail_applies -= 1;
            return Err(BackendError::Rejected("injected apply failure".into()));
        }
        let tree = inner
            .docs
            .get_mut(doc_id)
            .ok_or_else(|| BackendError::NotFound(doc_id.clone()))?;
        let report = tree.apply(actions);
        if report.dropped > 0 {
            warn!(doc_id = %doc_id, ?report, "Server dropped actions from batch");
        }
        inner
            .applied
            .push((doc_id.clone(), client_id.clone(), actions.to_vec()));

        let echo = DocumentUpdated::new(
            doc_id.clone(),
            Some(client_id.clone()),
            vec![RemoteUpdate::Block {
                actions: actions.to_vec(),
            }],
        );
        Self::fan_out(&inner, echo);
        Ok(())
    }

    fn subscribe(&self, doc_id: &DocId, sink: NotificationSink) -> Subscription {
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.next_subscription;
            inner.next_subscription += 1;
            inner.subscribers.entry(doc_id.clone()).or_default().push((id, sink));
            id
        };
        debug!(doc_id = %doc_id, subscription = id, "Subscribed");

        let weak = Arc::downgrade(&self.inner);
        let doc_id = doc_id.clone();
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = inner.lock();
                if let Some(sinks) = inner.subscribers.get_mut(&doc_id) {
                    sinks.retain(|(sid, _)| *sid != id);
                }
                debug!(doc_id = %doc_id, subscription = id, "Unsubscribed");
            }
        })
    }

    async fn close_document(&self, doc_id: &DocId) -> Result<(), BackendError> {
        info!(doc_id = %doc_id, "Document closed");
        self.inner.lock().closed.push(doc_id.clone());
        Ok(())
    }
}
