//! Error types for the block tree and editing commands.

use thiserror::Error;

use folio_types::BlockId;

/// Reasons a snapshot is rejected or a single action is discarded.
///
/// Action-level variants never cross the public `apply` API; they are
/// logged and counted in the [`ApplyReport`](crate::ApplyReport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// Snapshot has no block for its root id.
    #[error("root block missing: {0:?}")]
    MissingRoot(BlockId),

    /// Block not found in the tree.
    #[error("block not found: {0:?}")]
    BlockNotFound(BlockId),

    /// Parent of an insert or move is unknown.
    #[error("parent not found: {0:?}")]
    ParentNotFound(BlockId),

    /// Duplicate block ID.
    #[error("block already exists: {0:?}")]
    DuplicateBlock(BlockId),

    /// The root can be updated but never moved or deleted.
    #[error("root block cannot be moved or deleted: {0:?}")]
    RootImmutable(BlockId),

    /// Applying the action would make a block its own ancestor.
    #[error("moving {block:?} under {parent:?} would create a cycle")]
    Cycle { block: BlockId, parent: BlockId },

    /// Parent chain longer than the configured bound.
    #[error("block {0:?} exceeds the maximum tree depth")]
    DepthExceeded(BlockId),

    /// Block store and list store disagree.
    #[error("inconsistent tree: {0}")]
    Inconsistent(String),
}

/// Errors from planning an editing command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Block not found in the tree.
    #[error("block not found: {0:?}")]
    BlockNotFound(BlockId),

    /// The command does not apply to the document root.
    #[error("operation not supported on the root block {0:?}")]
    RootBlock(BlockId),

    /// Tree state the command relies on is broken.
    #[error(transparent)]
    Tree(#[from] TreeError),
}
