//! Per-document sync session.
//!
//! [`SyncClient`] owns at most one open document. Opening fetches the
//! snapshot, builds the [`BlockTree`], subscribes to the document's channel
//! and starts two workers:
//!
//! - an inbound [`SingleFlightQueue`] applying notifications (and snapshot
//!   re-fetches) strictly in arrival order, one at a time;
//! - an outbound flush worker sending action batches in enqueue order, one
//!   in flight.
//!
//! The tree sits behind a `parking_lot::Mutex` that is never held across an
//! `.await`, so local edits and inbound applies never interleave within a
//! mutation. Local batches are tracked in an [`Outbox`] until the server
//! echoes them, so an echo is only skipped while its batch is still in the
//! tree. Closing (or dropping) the session stops notifications, disposes
//! the subscription and cancels in-flight work.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use folio_crdt::{BlockTree, EditCommand, EditableNode, to_tree};
use folio_index::{LayoutSync, Rect, RegionGrid};
use folio_types::{Action, BlockId, ClientId, Delta, DocId, DocumentSnapshot, TextId};

use crate::backend::{Backend, DocumentUpdated, NotificationSink, RemoteUpdate, Subscription};
use crate::config::ClientConfig;
use crate::constants::{CLOSE_TIMEOUT, MAX_UNCONFIRMED_BATCHES};
use crate::error::{Result, SyncError};
use crate::flush::{FlushHandle, SettleHook, spawn_flush_worker};
use crate::outbox::{Echo, Outbox};
use crate::queue::SingleFlightQueue;
use crate::subscriptions::{ChangeEvent, SessionState, UpdateEvent};

// ============================================================================
// Session internals
// ============================================================================

/// Work for the inbound queue.
enum Inbound {
    Remote(DocumentUpdated),
    Resync(Option<oneshot::Sender<Result<()>>>),
}

/// State shared between the client and its worker tasks.
struct Shared {
    doc_id: DocId,
    client_id: ClientId,
    backend: Arc<dyn Backend>,
    tree: Mutex<BlockTree>,
    /// Locked after `tree` when both are needed.
    outbox: Mutex<Outbox>,
    layout: Mutex<RegionGrid>,
    /// Cleared synchronously on close; late notifications are dropped.
    accepting: AtomicBool,
    /// A flush was rejected and the tree may hold edits the server lacks.
    stale: AtomicBool,
    cancel: CancellationToken,
    changes: broadcast::Sender<ChangeEvent>,
    updates: broadcast::Sender<UpdateEvent>,
}

impl Shared {
    async fn handle(self: Arc<Self>, item: Inbound) {
        match item {
            Inbound::Remote(update) => self.handle_remote(update).await,
            Inbound::Resync(reply) => {
                let result = self.resync().await;
                if let Err(e) = &result {
                    warn!(doc_id = %self.doc_id, error = %e, "Resync failed");
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
        }
    }

    async fn handle_remote(&self, update: DocumentUpdated) {
        if update.doc_id != self.doc_id {
            warn!(doc_id = %self.doc_id, got = %update.doc_id, "Notification for another document, ignoring");
            return;
        }
        if update.origin.as_ref() == Some(&self.client_id) {
            let echoed: Vec<Action> = update
                .updates
                .iter()
                .filter_map(|u| match u {
                    RemoteUpdate::Block { actions } => Some(actions.iter().cloned()),
                    _ => None,
                })
                .flatten()
                .collect();
            match self.outbox.lock().match_echo(&echoed) {
                Echo::InTree => {
                    trace!(doc_id = %self.doc_id, "Skipping echo of own flush");
                    return;
                }
                Echo::Replaced => {
                    debug!(doc_id = %self.doc_id, "Own batch lost to a snapshot replace, applying echo");
                }
                Echo::Unknown => {
                    debug!(doc_id = %self.doc_id, "Unmatched echo of own origin, applying");
                }
            }
        }

        for change in update.updates {
            match change {
                RemoteUpdate::Text { text_id, delta } => {
                    self.apply_text(text_id, delta, update.origin.clone());
                }
                RemoteUpdate::Block { actions } => {
                    self.apply_actions(actions, update.origin.clone());
                }
                RemoteUpdate::Reset => {
                    if let Err(e) = self.resync().await {
                        warn!(doc_id = %self.doc_id, error = %e, "Reset re-fetch failed");
                    }
                }
            }
        }
    }

    fn apply_text(&self, text_id: TextId, delta: Delta, origin: Option<ClientId>) {
        self.tree.lock().set_text(text_id.clone(), delta.clone());
        let _ = self.changes.send(ChangeEvent {
            doc_id: self.doc_id.clone(),
            text_id,
            delta,
            origin,
        });
    }

    fn apply_actions(&self, actions: Vec<Action>, origin: Option<ClientId>) {
        if actions.is_empty() {
            return;
        }
        let report = {
            let mut tree = self.tree.lock();
            let report = tree.apply(&actions);
            if actions.iter().any(|a| matches!(a, Action::Delete { .. })) {
                let dropped = self.layout.lock().retain(|id| tree.contains(id));
                trace!(dropped, "Pruned layout after delete");
            }
            report
        };
        if report.dropped > 0 || report.expired > 0 {
            warn!(doc_id = %self.doc_id, ?report, "Remote batch partially discarded");
        }
        let _ = self.updates.send(UpdateEvent::Applied {
            doc_id: self.doc_id.clone(),
            origin,
            actions,
            report,
        });
    }

    /// Replace the tree with a fresh snapshot.
    async fn resync(&self) -> Result<()> {
        let fetch = self.backend.open_document(&self.doc_id);
        let snapshot = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
            result = fetch => result.map_err(SyncError::Resync)?,
        };

        let version = {
            let mut tree = self.tree.lock();
            tree.replace(snapshot)?;
            self.outbox.lock().replaced();
            tree.version()
        };
        self.layout.lock().clear();
        self.stale.store(false, Ordering::Release);
        info!(doc_id = %self.doc_id, version, "Resynced from snapshot");

        let _ = self.updates.send(UpdateEvent::Reset {
            doc_id: self.doc_id.clone(),
            version,
        });
        Ok(())
    }
}

struct Session {
    shared: Arc<Shared>,
    inbound: SingleFlightQueue<Inbound>,
    flush: FlushHandle,
    flush_task: JoinHandle<()>,
    subscription: Subscription,
    stopped: bool,
}

impl Session {
    /// Synchronous teardown. Returns `false` if it already ran.
    fn stop(&mut self) -> bool {
        if self.stopped {
            return false;
        }
        self.stopped = true;
        self.shared.accepting.store(false, Ordering::Release);
        self.subscription.dispose();
        self.shared.cancel.cancel();
        self.inbound.close();
        self.flush_task.abort();
        true
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.stop() {
            return;
        }
        // Dropped without close(): still release the document if we can.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let backend = self.shared.backend.clone();
                let doc_id = self.shared.doc_id.clone();
                handle.spawn(async move { close_document(backend, doc_id).await });
            }
            Err(_) => debug!(doc_id = %self.shared.doc_id, "No runtime on drop, skipping close_document"),
        }
    }
}

async fn close_document(backend: Arc<dyn Backend>, doc_id: DocId) {
    match tokio::time::timeout(CLOSE_TIMEOUT, backend.close_document(&doc_id)).await {
        Ok(Ok(())) => debug!(doc_id = %doc_id, "close_document acknowledged"),
        Ok(Err(e)) => warn!(doc_id = %doc_id, error = %e, "close_document failed"),
        Err(_) => warn!(doc_id = %doc_id, timeout = ?CLOSE_TIMEOUT, "close_document timed out"),
    }
}

// ============================================================================
// SyncClient
// ============================================================================

/// Mirrors one document and keeps it in sync with a [`Backend`].
pub struct SyncClient {
    backend: Arc<dyn Backend>,
    config: ClientConfig,
    client_id: ClientId,
    state: SessionState,
    session: Option<Session>,
    changes: broadcast::Sender<ChangeEvent>,
    updates: broadcast::Sender<UpdateEvent>,
}

impl SyncClient {
    pub fn new(backend: Arc<dyn Backend>, config: ClientConfig) -> Self {
        let capacity = config.event_capacity.max(1);
        let (changes, _) = broadcast::channel(capacity);
        let (updates, _) = broadcast::channel(capacity);
        Self {
            backend,
            config,
            client_id: ClientId::new(),
            state: SessionState::Closed,
            session: None,
            changes,
            updates,
        }
    }

    /// Use a fixed client id instead of a random one.
    pub fn with_client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = client_id;
        self
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Open `doc_id`, closing any document already open.
    ///
    /// On failure the client is back in `Closed` and holds no tree.
    pub async fn open(&mut self, doc_id: DocId) -> Result<()> {
        if self.session.is_some() {
            self.close().await;
        }
        self.state = SessionState::Opening;
        info!(doc_id = %doc_id, client_id = %self.client_id, "Opening document");

        match self.start_session(doc_id.clone()).await {
            Ok(session) => {
                let blocks = session.shared.tree.lock().block_count();
                self.session = Some(session);
                self.state = SessionState::Open;
                info!(doc_id = %doc_id, blocks, "Document open");
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Closed;
                warn!(doc_id = %doc_id, error = %e, "Open failed");
                Err(e)
            }
        }
    }

    async fn start_session(&self, doc_id: DocId) -> Result<Session> {
        let snapshot = self
            .backend
            .open_document(&doc_id)
            .await
            .map_err(SyncError::Open)?;
        let tree = BlockTree::from_snapshot(snapshot, self.config.tree.clone())?;

        let cancel = CancellationToken::new();
        let shared = Arc::new(Shared {
            doc_id: doc_id.clone(),
            client_id: self.client_id.clone(),
            backend: self.backend.clone(),
            tree: Mutex::new(tree),
            outbox: Mutex::new(Outbox::new(MAX_UNCONFIRMED_BATCHES)),
            layout: Mutex::new(RegionGrid::new(self.config.region_cell_size)),
            accepting: AtomicBool::new(true),
            stale: AtomicBool::new(false),
            cancel: cancel.clone(),
            changes: self.changes.clone(),
            updates: self.updates.clone(),
        });

        let handler_shared = shared.clone();
        let inbound = SingleFlightQueue::spawn(cancel.child_token(), move |item| {
            handler_shared.clone().handle(item)
        });

        let on_settle = settle_hook(&shared, &inbound, self.config.resync_on_flush_failure);
        let (flush, flush_task) = spawn_flush_worker(
            self.backend.clone(),
            doc_id.clone(),
            self.client_id.clone(),
            cancel.child_token(),
            on_settle,
        );

        let sink_shared = Arc::downgrade(&shared);
        let sink_inbound = inbound.sender();
        let sink = NotificationSink::new(move |update| match sink_shared.upgrade() {
            Some(shared) if shared.accepting.load(Ordering::Acquire) => {
                sink_inbound.enqueue(Inbound::Remote(update))
            }
            _ => false,
        });
        let subscription = self.backend.subscribe(&doc_id, sink);

        Ok(Session {
            shared,
            inbound,
            flush,
            flush_task,
            subscription,
            stopped: false,
        })
    }

    /// Tear the session down. Safe to call when nothing is open.
    ///
    /// `close_document` is best-effort: failures are logged, not returned.
    pub async fn close(&mut self) {
        let Some(mut session) = self.session.take() else {
            self.state = SessionState::Closed;
            return;
        };
        self.state = SessionState::Closing;
        let doc_id = session.shared.doc_id.clone();
        if session.stop() {
            close_document(session.shared.backend.clone(), doc_id.clone()).await;
        }
        drop(session);
        self.state = SessionState::Closed;
        info!(doc_id = %doc_id, "Document closed");
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn doc_id(&self) -> Option<&DocId> {
        self.session.as_ref().map(|s| &s.shared.doc_id)
    }

    /// Whether a rejected flush left the tree ahead of the server.
    pub fn is_stale(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.shared.stale.load(Ordering::Acquire))
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<UpdateEvent> {
        self.updates.subscribe()
    }

    fn session(&self) -> Result<&Session> {
        match (&self.session, self.state) {
            (Some(session), SessionState::Open) => Ok(session),
            _ => Err(SyncError::NotOpen),
        }
    }

    /// Read the tree under its lock.
    pub fn with_tree<R>(&self, f: impl FnOnce(&BlockTree) -> R) -> Result<R> {
        let session = self.session()?;
        let tree = session.shared.tree.lock();
        Ok(f(&tree))
    }

    pub fn snapshot(&self) -> Result<DocumentSnapshot> {
        self.with_tree(|tree| tree.snapshot().clone())
    }

    /// The editable element tree for the current state.
    pub fn editable_tree(&self, include_root: bool) -> Result<Vec<EditableNode>> {
        self.with_tree(|tree| to_tree(tree.snapshot(), include_root))
    }

    // ── Outbound ─────────────────────────────────────────────────────────

    /// Run a command against the tree and flush the resulting actions.
    ///
    /// The edit is applied locally before the flush; a rejected flush does
    /// not roll it back (see [`is_stale`](Self::is_stale)).
    pub async fn edit(&self, command: &EditCommand) -> Result<Vec<Action>> {
        let session = self.session()?;
        let shared = &session.shared;
        let (actions, report, seq) = {
            let mut tree = shared.tree.lock();
            let actions = command.plan(&tree)?;
            if actions.is_empty() {
                debug!(block_id = %command.target(), ?command, "Edit is a no-op");
                return Ok(actions);
            }
            let report = tree.apply(&actions);
            let seq = shared.outbox.lock().record(actions.clone());
            (actions, report, seq)
        };
        if report.dropped > 0 || report.buffered > 0 {
            warn!(?command, ?report, "Local edit did not apply cleanly");
        }
        let _ = shared.updates.send(UpdateEvent::Applied {
            doc_id: shared.doc_id.clone(),
            origin: Some(self.client_id.clone()),
            actions: actions.clone(),
            report,
        });

        session.flush.flush(seq, actions.clone()).await?;
        Ok(actions)
    }

    /// Send a batch that is already reflected in the local tree.
    ///
    /// Batches go out in call order, one at a time. Empty batches return
    /// immediately.
    pub async fn flush(&self, actions: Vec<Action>) -> Result<()> {
        let session = self.session()?;
        if actions.is_empty() {
            return Ok(());
        }
        let seq = {
            let _tree = session.shared.tree.lock();
            session.shared.outbox.lock().record(actions.clone())
        };
        session.flush.flush(seq, actions).await
    }

    // ── Inbound ──────────────────────────────────────────────────────────

    /// Re-fetch the snapshot and replace the tree, in line with inbound updates.
    pub async fn resync(&self) -> Result<()> {
        self.schedule_resync()?.await
    }

    /// Queue a re-fetch behind the inbound work received so far.
    ///
    /// The returned future resolves once it ran; it does not borrow the
    /// client, and resolves to [`SyncError::Cancelled`] if the session is
    /// closed first.
    pub fn schedule_resync(&self) -> Result<impl Future<Output = Result<()>> + Send + use<>> {
        let session = self.session()?;
        let (reply, rx) = oneshot::channel();
        let queued = session.inbound.enqueue(Inbound::Resync(Some(reply)));
        Ok(async move {
            if !queued {
                return Err(SyncError::Cancelled);
            }
            rx.await.map_err(|_| SyncError::Cancelled)?
        })
    }

    /// Wait until every notification received so far has been applied.
    pub async fn drain_inbound(&self) -> Result<()> {
        let session = self.session()?;
        if session.inbound.drained().await {
            Ok(())
        } else {
            Err(SyncError::Cancelled)
        }
    }

    // ── Layout ───────────────────────────────────────────────────────────

    /// Feed a layout pass into the region grid, keyed to the tree version.
    pub fn sync_layout(&self, layouts: impl IntoIterator<Item = (BlockId, Rect)>) -> Result<LayoutSync> {
        let session = self.session()?;
        let version = session.shared.tree.lock().version();
        Ok(session.shared.layout.lock().sync_layout(version, layouts))
    }

    /// Blocks whose last known layout intersects `rect`.
    pub fn blocks_in(&self, rect: &Rect) -> Result<Vec<BlockId>> {
        let session = self.session()?;
        Ok(session.shared.layout.lock().get_intersecting_blocks(rect))
    }
}

/// Settles batches in the outbox. A rejection also marks the session stale
/// and, if configured, schedules a snapshot re-fetch behind pending inbound
/// work.
fn settle_hook(shared: &Arc<Shared>, inbound: &SingleFlightQueue<Inbound>, resync: bool) -> SettleHook {
    let shared = Arc::downgrade(shared);
    let inbound = inbound.sender();
    Arc::new(move |seq, outcome| {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        shared.outbox.lock().settle(seq, outcome.is_ok());
        if let Err(error) = outcome {
            shared.stale.store(true, Ordering::Release);
            warn!(doc_id = %shared.doc_id, %error, resync, "Session stale after rejected flush");
            if resync {
                inbound.enqueue(Inbound::Resync(None));
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use folio_types::{BlockKind, InsertPayload};

    use super::*;
    use crate::memory::MemoryBackend;

    fn doc() -> DocId {
        DocId::from("doc")
    }

    async fn open_client(backend: &MemoryBackend) -> SyncClient {
        backend
            .insert_document(doc(), DocumentSnapshot::empty())
            .unwrap();
        let mut client = SyncClient::new(Arc::new(backend.clone()), ClientConfig::default());
        client.open(doc()).await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_open_unknown_document_leaves_client_closed() {
        let backend = MemoryBackend::new();
        let mut client = SyncClient::new(Arc::new(backend.clone()), ClientConfig::default());
        let err = client.open(doc()).await.unwrap_err();
        assert!(matches!(err, SyncError::Open(_)));
        assert_eq!(client.state(), SessionState::Closed);
        assert!(client.snapshot().is_err());
        assert_eq!(backend.subscriber_count(&doc()), 0);
    }

    #[tokio::test]
    async fn test_operations_require_open_document() {
        let client = SyncClient::new(Arc::new(MemoryBackend::new()), ClientConfig::default());
        assert!(matches!(client.flush(Vec::new()).await, Err(SyncError::NotOpen)));
        assert!(matches!(client.resync().await, Err(SyncError::NotOpen)));
        assert!(matches!(
            client.blocks_in(&Rect::default()),
            Err(SyncError::NotOpen)
        ));
    }

    #[tokio::test]
    async fn test_reopen_closes_previous_document() {
        let backend = MemoryBackend::new();
        let mut client = open_client(&backend).await;
        backend
            .insert_document(DocId::from("other"), DocumentSnapshot::empty())
            .unwrap();

        client.open(DocId::from("other")).await.unwrap();
        assert_eq!(client.doc_id(), Some(&DocId::from("other")));
        assert_eq!(backend.closed_documents(), vec![doc()]);
        assert_eq!(backend.subscriber_count(&doc()), 0);
        assert_eq!(backend.subscriber_count(&DocId::from("other")), 1);
    }

    #[tokio::test]
    async fn test_layout_pruned_when_remote_delete_arrives() {
        let backend = MemoryBackend::new();
        let client = open_client(&backend).await;
        let root = client.with_tree(|t| t.root_id().clone()).unwrap();

        let block_id = BlockId::new();
        let insert = Action::Insert {
            block_id: block_id.clone(),
            parent_id: root.clone(),
            prev_id: None,
            payload: InsertPayload::new(BlockKind::Paragraph),
        };
        backend
            .apply_remote(&doc(), ClientId::from("peer"), vec![insert])
            .unwrap();
        client.drain_inbound().await.unwrap();

        let rect = Rect::new(0.0, 0.0, 200.0, 24.0);
        client.sync_layout([(block_id.clone(), rect)]).unwrap();
        assert_eq!(client.blocks_in(&rect).unwrap(), vec![block_id.clone()]);

        let delete = Action::Delete {
            block_id: block_id.clone(),
            parent_id: Some(root),
        };
        backend
            .apply_remote(&doc(), ClientId::from("peer"), vec![delete])
            .unwrap();
        client.drain_inbound().await.unwrap();
        assert!(client.blocks_in(&rect).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_edit_announced_with_own_origin() {
        let backend = MemoryBackend::new();
        let client = open_client(&backend).await;
        let mut updates = client.subscribe_updates();
        let root = client.with_tree(|t| t.root_id().clone()).unwrap();

        let command = EditCommand::InsertAfter {
            block_id: BlockId::new(),
            after: root.clone(),
            payload: InsertPayload::new(BlockKind::Paragraph),
        };
        // The root has no parent, so this is rejected before anything is sent.
        assert!(matches!(
            client.edit(&command).await,
            Err(SyncError::Command(_))
        ));

        let first = BlockId::new();
        let insert = Action::Insert {
            block_id: first.clone(),
            parent_id: root,
            prev_id: None,
            payload: InsertPayload::new(BlockKind::Paragraph),
        };
        backend
            .apply_remote(&doc(), ClientId::from("peer"), vec![insert])
            .unwrap();
        client.drain_inbound().await.unwrap();
        let remote = updates.recv().await.unwrap();
        assert!(matches!(remote, UpdateEvent::Applied { origin: Some(ref o), .. } if o.as_str() == "peer"));

        let actions = client
            .edit(&EditCommand::insert_after(first, BlockKind::Quote))
            .await
            .unwrap();
        assert_eq!(actions.len(), 1);
        match updates.recv().await.unwrap() {
            UpdateEvent::Applied { origin, .. } => assert_eq!(origin.as_ref(), Some(client.client_id())),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(backend.applied_batches(&doc()), vec![actions]);
    }
}
