//! Client configuration constants.
//!
//! Centralizes defaults for [`ClientConfig`](crate::ClientConfig) and the
//! session lifecycle.

use std::time::Duration;

/// Capacity of the `change` and `update` broadcast channels.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Re-exported so config defaults and the grid agree.
pub const DEFAULT_REGION_CELL_SIZE: f64 = folio_index::DEFAULT_CELL_SIZE;

/// Upper bound on the best-effort `close_document` call during teardown.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Local batches remembered while waiting for their echo. Oldest are
/// forgotten first; a forgotten batch's echo is applied like a remote one.
pub const MAX_UNCONFIRMED_BATCHES: usize = 1024;
