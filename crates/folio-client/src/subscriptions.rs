//! Events the client pushes to its consumers, and session lifecycle state.
//!
//! Two typed broadcast channels replace string-keyed event names:
//! [`ChangeEvent`] for text replacements and [`UpdateEvent`] for structural
//! batches and resets. Subscribe via
//! [`SyncClient::subscribe_changes`](crate::SyncClient::subscribe_changes) and
//! [`SyncClient::subscribe_updates`](crate::SyncClient::subscribe_updates).

use serde::Serialize;
use strum::Display;

use folio_crdt::ApplyReport;
use folio_types::{Action, ClientId, Delta, DocId, TextId};

/// Lifecycle of the client's document session.
///
/// ```text
/// Closed ──open()──▶ Opening ──snapshot ok──▶ Open ──close()──▶ Closing ──▶ Closed
///                       └──────fetch failed──────────────────────────────▶ Closed
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Closed,
    Opening,
    Open,
    Closing,
}

/// A text was replaced by a remote update.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    pub doc_id: DocId,
    pub text_id: TextId,
    pub delta: Delta,
    pub origin: Option<ClientId>,
}

/// The block tree changed structurally.
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateEvent {
    /// A batch went through [`BlockTree::apply`](folio_crdt::BlockTree::apply).
    ///
    /// Local edits carry this client's id as `origin`.
    Applied {
        doc_id: DocId,
        origin: Option<ClientId>,
        actions: Vec<Action>,
        report: ApplyReport,
    },
    /// The tree was replaced by a freshly fetched snapshot.
    Reset { doc_id: DocId, version: u64 },
}
