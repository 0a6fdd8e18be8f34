//! Shared identity, block, delta and action types for Folio.
//!
//! This crate is the vocabulary every other Folio crate speaks. It has
//! **no internal folio dependencies**; it is a pure leaf crate.
//!
//! # Entity-Relationship Overview
//!
//! ```text
//! Document (DocId)
//!     └── root Block (BlockId, kind = page)
//!           └── childListId → ordered list of BlockIds (ListId)
//!           └── externalTextId → Delta (TextId)
//!
//! Action ← atomic mutation exchanged with the backend
//!     └── Insert / Update / Delete / Move, anchored by prevId
//! ```
//!
//! # Key Types
//!
//! |----------------------|----------------------------------------------|
//! | Type                 | Purpose                                      |
//! |----------------------|----------------------------------------------|
//! | [`BlockId`]          | Block identity                               |
//! | [`ListId`]           | Key into the ordered child-list store        |
//! | [`TextId`]           | Key into the text delta store                |
//! | [`Block`]            | One node of the document tree                |
//! | [`Delta`]            | Ordered insert operations with attributes    |
//! | [`Action`]           | Backend-directed mutation                    |
//! | [`DocumentSnapshot`] | Blocks + child lists + deltas at one instant |
//! |----------------------|----------------------------------------------|

pub mod action;
pub mod block;
pub mod delta;
pub mod ids;
pub mod snapshot;

// Re-export primary types at crate root for convenience.
pub use action::{Action, BlockPatch, InsertPayload};
pub use block::{Block, BlockKind, JsonMap};
pub use delta::{Attributes, Delta, TextOp};
pub use ids::{BlockId, ClientId, DocId, ListId, TextId};
pub use snapshot::DocumentSnapshot;
