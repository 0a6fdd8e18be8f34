//! Folio document sync client.
//!
//! Keeps a local [`BlockTree`](folio_crdt::BlockTree) of one document in
//! sync with a [`Backend`]: snapshot on open, remote notifications applied
//! in arrival order, local edits applied optimistically and flushed in
//! order. Consumers observe the document through two broadcast channels.
//!
//! ```ignore
//! let backend = Arc::new(MemoryBackend::new());
//! let mut client = SyncClient::new(backend, ClientConfig::default());
//! client.open(doc_id).await?;
//! let mut updates = client.subscribe_updates();
//! client.edit(&EditCommand::Indent { block_id }).await?;
//! ```

pub mod backend;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
mod flush;
pub mod memory;
mod outbox;
pub mod queue;
pub mod subscriptions;

pub use backend::{Backend, DocumentUpdated, NotificationSink, RemoteUpdate, Subscription};
pub use client::SyncClient;
pub use config::{ClientConfig, ConfigError};
pub use error::{BackendError, SyncError};
pub use memory::MemoryBackend;
pub use queue::{QueueSender, SingleFlightQueue};
pub use subscriptions::{ChangeEvent, SessionState, UpdateEvent};
