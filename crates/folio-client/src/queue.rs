//! FIFO single-flight queue.
//!
//! Items are handled one at a time, strictly in enqueue order: the next
//! handler call starts only after the previous future resolved. Enqueueing
//! never blocks and never awaits, so callbacks from a backend can feed the
//! queue directly.
//!
//! ```text
//!   QueueSender (Clone)     mpsc      worker task
//!   ┌────────────────┐  ────────▶  ┌────────────────────────┐
//!   │ .enqueue(item) │             │ handler(item).await    │
//!   └────────────────┘             │ one at a time, in FIFO │
//!                                  └────────────────────────┘
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

enum Slot<T> {
    Item(T),
    /// Resolves once everything enqueued before it was handled.
    Barrier(oneshot::Sender<()>),
}

/// Cloneable enqueue side of a [`SingleFlightQueue`].
pub struct QueueSender<T> {
    tx: mpsc::UnboundedSender<Slot<T>>,
    queued: Arc<AtomicUsize>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            queued: self.queued.clone(),
        }
    }
}

impl<T> QueueSender<T> {
    /// Queue an item. Returns `false` once the worker has stopped.
    pub fn enqueue(&self, item: T) -> bool {
        self.queued.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(Slot::Item(item)).is_err() {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }
}

/// Serializes async work items through a single worker task.
pub struct SingleFlightQueue<T> {
    sender: QueueSender<T>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> SingleFlightQueue<T> {
    /// Spawn the worker. Cancelling `cancel` abandons the in-flight item and
    /// everything still queued.
    pub fn spawn<F, Fut>(cancel: CancellationToken, mut handler: F) -> Self
    where
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Slot<T>>();
        let queued = Arc::new(AtomicUsize::new(0));

        let worker_cancel = cancel.clone();
        let worker_queued = queued.clone();
        let task = tokio::spawn(async move {
            loop {
                let slot = tokio::select! {
                    biased;
                    _ = worker_cancel.cancelled() => break,
                    slot = rx.recv() => match slot {
                        Some(slot) => slot,
                        None => break,
                    },
                };
                match slot {
                    Slot::Barrier(done) => {
                        let _ = done.send(());
                    }
                    Slot::Item(item) => {
                        worker_queued.fetch_sub(1, Ordering::AcqRel);
                        tokio::select! {
                            biased;
                            _ = worker_cancel.cancelled() => break,
                            _ = handler(item) => {}
                        }
                    }
                }
            }
            debug!("Single-flight queue stopped");
        });

        Self {
            sender: QueueSender { tx, queued },
            cancel,
            task,
        }
    }

    pub fn sender(&self) -> QueueSender<T> {
        self.sender.clone()
    }

    pub fn enqueue(&self, item: T) -> bool {
        self.sender.enqueue(item)
    }

    /// Items waiting to start (the in-flight one excluded).
    pub fn len(&self) -> usize {
        self.sender.queued.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until every item enqueued so far has been handled.
    ///
    /// Returns `false` if the worker stopped first.
    pub async fn drained(&self) -> bool {
        let (done, rx) = oneshot::channel();
        if self.sender.tx.send(Slot::Barrier(done)).is_err() {
            return false;
        }
        rx.await.is_ok()
    }

    /// Stop the worker; queued items are dropped unhandled.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.task.is_finished()
    }
}

impl<T> Drop for SingleFlightQueue<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}
