//! Block tree document model for Folio.
//!
//! A document is a tree of blocks. Each block owns an ordered child list
//! and, for text-bearing kinds, a rich-text [`Delta`](folio_types::Delta)
//! stored beside it by text id.
//!
//! # Layers
//!
//! - [`BlockTree`]: the in-memory mirror. Applies [`Action`](folio_types::Action)
//!   batches from any source and keeps the structure valid (single parent,
//!   no cycles, bounded depth). Inserts whose parent has not arrived yet are
//!   parked and replayed once it does.
//! - [`bridge`]: converts between the delta form used on the wire and the
//!   nested element form an editor renders (formulas and mentions become one
//!   element per character).
//! - [`EditCommand`]: structural edits (merge, indent, outdent, enter...)
//!   planned into actions against the current tree.
//!
//! # Concurrency
//!
//! None here. The tree is a plain value; the sync client serializes access.

pub mod bridge;
mod commands;
mod error;
mod tree;

pub use bridge::{
    EditableElement, EditableNode, InlineNode, TextLeaf, TextNode, from_tree, to_delta,
    to_editable_children, to_tree,
};
pub use commands::EditCommand;
pub use error::{CommandError, TreeError};
pub use tree::{
    ApplyReport, BlockTree, DEFAULT_MAX_PENDING_INSERTS, DEFAULT_PENDING_INSERT_TTL,
    MAX_TREE_DEPTH, TreeConfig,
};

/// Result type for tree operations.
pub type Result<T> = std::result::Result<T, TreeError>;
