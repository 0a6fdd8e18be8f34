//! Whole-document snapshot as fetched when a document is opened.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::block::{Block, BlockKind};
use crate::delta::Delta;
use crate::ids::{BlockId, ListId, TextId};

/// Blocks, child lists and deltas of one document at one instant.
///
/// Maps are ordered so two snapshots of the same content compare and
/// serialize identically.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSnapshot {
    pub root_id: BlockId,
    pub blocks: BTreeMap<BlockId, Block>,
    #[serde(default)]
    pub children_by_list: BTreeMap<ListId, Vec<BlockId>>,
    #[serde(default)]
    pub deltas_by_text_id: BTreeMap<TextId, Delta>,
}

impl DocumentSnapshot {
    /// A document holding only a fresh `page` root.
    pub fn empty() -> Self {
        let root = Block::new(BlockKind::Page, None);
        let root_id = root.id.clone();
        let mut children_by_list = BTreeMap::new();
        children_by_list.insert(root.child_list_id.clone(), Vec::new());
        let mut blocks = BTreeMap::new();
        blocks.insert(root_id.clone(), root);
        Self {
            root_id,
            blocks,
            children_by_list,
            deltas_by_text_id: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> Option<&Block> {
        self.blocks.get(&self.root_id)
    }

    /// Ordered children of a block (empty when the block or list is unknown).
    pub fn children_of(&self, id: &BlockId) -> &[BlockId] {
        self.blocks
            .get(id)
            .and_then(|b| self.children_by_list.get(&b.child_list_id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Text of a block, if it owns one.
    pub fn delta_of(&self, id: &BlockId) -> Option<&Delta> {
        self.blocks
            .get(id)
            .and_then(|b| b.external_text_id.as_ref())
            .and_then(|t| self.deltas_by_text_id.get(t))
    }
}
