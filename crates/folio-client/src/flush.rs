//! Outbound flush worker.
//!
//! Batches handed to [`FlushHandle::flush`] go over an mpsc channel to a
//! worker task that calls [`Backend::apply_actions`] one batch at a time,
//! in enqueue order, and answers through a oneshot.
//!
//! ```text
//!   FlushHandle (Clone)      mpsc      FlushWorker (tokio task)
//!   ┌──────────────────┐  ────────▶  ┌──────────────────────────┐
//!   │ .flush(actions)  │             │ backend.apply_actions()  │
//!   │                  │  ◀────────  │ one batch in flight      │
//!   └──────────────────┘   oneshot   └──────────────────────────┘
//! ```
//!
//! Every answer is reported to the session's settle hook under the batch's
//! sequence number, and failures are also returned to the caller. Batches
//! are never retried or coalesced.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use folio_types::{Action, ClientId, DocId};

use crate::backend::Backend;
use crate::error::{BackendError, SyncError};

/// Called on the worker task once the backend answered for batch `seq`.
pub(crate) type SettleHook = Arc<dyn Fn(u64, Result<(), &BackendError>) + Send + Sync>;

struct FlushCommand {
    seq: u64,
    actions: Vec<Action>,
    reply: oneshot::Sender<Result<(), SyncError>>,
}

/// Send side of the flush worker.
#[derive(Clone)]
pub(crate) struct FlushHandle {
    tx: mpsc::UnboundedSender<FlushCommand>,
}

impl FlushHandle {
    /// Queue a batch and wait for the backend's answer.
    pub(crate) async fn flush(&self, seq: u64, actions: Vec<Action>) -> Result<(), SyncError> {
        if actions.is_empty() {
            return Ok(());
        }
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(FlushCommand { seq, actions, reply })
            .map_err(|_| SyncError::Cancelled)?;
        rx.await.map_err(|_| SyncError::Cancelled)?
    }
}

struct FlushWorker {
    backend: Arc<dyn Backend>,
    doc_id: DocId,
    client_id: ClientId,
    cancel: CancellationToken,
    on_settle: SettleHook,
}

impl FlushWorker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<FlushCommand>) {
        loop {
            let command = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                command = rx.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            let result = self.send(command.seq, &command.actions).await;
            let _ = command.reply.send(result);
        }
        debug!(doc_id = %self.doc_id, "Flush worker shutting down");
    }

    async fn send(&self, seq: u64, actions: &[Action]) -> Result<(), SyncError> {
        trace!(doc_id = %self.doc_id, seq, count = actions.len(), "Flushing batch");
        let call = self.backend.apply_actions(&self.doc_id, &self.client_id, actions);
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
            result = call => result,
        };
        match result {
            Ok(()) => {
                (self.on_settle)(seq, Ok(()));
                Ok(())
            }
            Err(e) => {
                warn!(doc_id = %self.doc_id, seq, count = actions.len(), error = %e, "Flush rejected");
                (self.on_settle)(seq, Err(&e));
                Err(SyncError::Flush(e))
            }
        }
    }
}

/// Spawn the worker for one document session.
pub(crate) fn spawn_flush_worker(
    backend: Arc<dyn Backend>,
    doc_id: DocId,
    client_id: ClientId,
    cancel: CancellationToken,
    on_settle: SettleHook,
) -> (FlushHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let worker = FlushWorker {
        backend,
        doc_id,
        client_id,
        cancel,
        on_settle,
    };
    let task = tokio::spawn(worker.run(rx));
    (FlushHandle { tx }, task)
}
