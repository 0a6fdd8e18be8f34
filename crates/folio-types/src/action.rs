//! Actions, the atomic mutations exchanged with the backend.
//!
//! Ordering is anchored by `prev_id` rather than an index, so an insert or
//! move stays meaningful even when concurrently applied actions change the
//! number of siblings.
//!
//! Wire shape:
//!
//! ```text
//! {"type": "insert"|"update"|"delete"|"move",
//!  "blockId": "…", "parentId"?: "…", "prevId"?: "…", "payload"?: {…}}
//! ```

use serde::{Deserialize, Serialize};

use crate::block::{BlockKind, JsonMap};
use crate::delta::Delta;
use crate::ids::{BlockId, ListId, TextId};

/// Content of a newly inserted block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertPayload {
    #[serde(rename = "type")]
    pub kind: BlockKind,
    #[serde(default)]
    pub data: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_text_id: Option<TextId>,
    /// Minted by the receiver when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_list_id: Option<ListId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<Delta>,
}

impl InsertPayload {
    /// Payload for an empty block of `kind`.
    pub fn new(kind: BlockKind) -> Self {
        Self {
            kind,
            data: JsonMap::new(),
            external_text_id: kind.has_text().then(TextId::new),
            child_list_id: Some(ListId::new()),
            delta: None,
        }
    }

    pub fn with_data(mut self, data: JsonMap) -> Self {
        self.data = data;
        self
    }

    pub fn with_delta(mut self, delta: Delta) -> Self {
        self.delta = Some(delta);
        self
    }
}

/// Partial update of an existing block. Absent fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockPatch {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<BlockKind>,
    /// Replaces the block's data wholesale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonMap>,
    /// Replaces the block's text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<Delta>,
}

impl BlockPatch {
    pub fn delta(delta: Delta) -> Self {
        Self {
            delta: Some(delta),
            ..Self::default()
        }
    }

    pub fn kind(kind: BlockKind, data: JsonMap) -> Self {
        Self {
            kind: Some(kind),
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.kind.is_none() && self.data.is_none() && self.delta.is_none()
    }
}

/// Atomic, backend-directed mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Action {
    /// Create a block under `parent_id`, after `prev_id` (None = first child).
    #[serde(rename_all = "camelCase")]
    Insert {
        block_id: BlockId,
        parent_id: BlockId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prev_id: Option<BlockId>,
        payload: InsertPayload,
    },

    /// Patch content of an existing block.
    #[serde(rename_all = "camelCase")]
    Update {
        block_id: BlockId,
        payload: BlockPatch,
    },

    /// Remove a block together with any descendants still attached to it.
    #[serde(rename_all = "camelCase")]
    Delete {
        block_id: BlockId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<BlockId>,
    },

    /// Reposition a block under `parent_id`, after `prev_id` (None = first child).
    #[serde(rename_all = "camelCase")]
    Move {
        block_id: BlockId,
        parent_id: BlockId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prev_id: Option<BlockId>,
    },
}

impl Action {
    /// Get the block ID this action targets.
    pub fn block_id(&self) -> &BlockId {
        match self {
            Action::Insert { block_id, .. }
            | Action::Update { block_id, .. }
            | Action::Delete { block_id, .. }
            | Action::Move { block_id, .. } => block_id,
        }
    }

    /// Wire tag.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Action::Insert { .. } => "insert",
            Action::Update { .. } => "update",
            Action::Delete { .. } => "delete",
            Action::Move { .. } => "move",
        }
    }

    /// Check if this action changes tree shape (not just content).
    pub fn is_structural(&self) -> bool {
        !matches!(self, Action::Update { .. })
    }
}
