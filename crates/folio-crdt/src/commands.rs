//! Editing commands: tree mutations invoked by the editor adapter.
//!
//! A command is planned against the current [`BlockTree`] into a list of
//! [`Action`]s; [`BlockTree::execute`] then applies them optimistically and
//! hands them back for flushing. Planning is pure. When a command's
//! precondition does not hold the plan is empty (a no-op); only unknown
//! blocks and misuse of the root are errors.
//!
//! Actions in a plan apply in order, so each `prev_id` is chosen against
//! the tree as it will look after the preceding actions.

use tracing::{debug, warn};

use folio_types::{Action, Block, BlockId, BlockKind, BlockPatch, Delta, InsertPayload, JsonMap};

use crate::error::CommandError;
use crate::tree::BlockTree;

/// A tree-mutating operation.
#[derive(Clone, Debug, PartialEq)]
pub enum EditCommand {
    /// Backspace at the start of a block: fold it into the previous text.
    MergeIntoPrevious { block_id: BlockId },
    /// Lift a block to become the next sibling of its parent.
    Outdent { block_id: BlockId },
    /// Tab: nest a block under its previous sibling.
    Indent { block_id: BlockId },
    /// Shift+Tab.
    TabBackward { block_id: BlockId },
    /// Enter at `offset` (chars) within the block's text.
    InsertBreak { block_id: BlockId, offset: usize },
    /// Insert a new block right after `after`.
    InsertAfter {
        block_id: BlockId,
        after: BlockId,
        payload: InsertPayload,
    },
    /// Remove a block and its subtree.
    Delete { block_id: BlockId },
    /// Replace a block's text.
    SetText { block_id: BlockId, delta: Delta },
    /// Change a block's kind.
    TurnInto { block_id: BlockId, kind: BlockKind },
}

impl EditCommand {
    /// Insert an empty block of `kind` after `after`, minting its ids.
    pub fn insert_after(after: BlockId, kind: BlockKind) -> Self {
        Self::InsertAfter {
            block_id: BlockId::new(),
            after,
            payload: InsertPayload::new(kind),
        }
    }

    /// The block the command starts from.
    pub fn target(&self) -> &BlockId {
        match self {
            EditCommand::MergeIntoPrevious { block_id }
            | EditCommand::Outdent { block_id }
            | EditCommand::Indent { block_id }
            | EditCommand::TabBackward { block_id }
            | EditCommand::InsertBreak { block_id, .. }
            | EditCommand::Delete { block_id }
            | EditCommand::SetText { block_id, .. }
            | EditCommand::TurnInto { block_id, .. } => block_id,
            EditCommand::InsertAfter { after, .. } => after,
        }
    }

    /// Plan the command into actions without touching the tree.
    pub fn plan(&self, tree: &BlockTree) -> Result<Vec<Action>, CommandError> {
        match self {
            EditCommand::MergeIntoPrevious { block_id } => plan_merge(tree, block_id),
            EditCommand::Outdent { block_id } => plan_outdent(tree, block_id),
            EditCommand::Indent { block_id } => plan_indent(tree, block_id),
            EditCommand::TabBackward { block_id } => plan_tab_backward(tree, block_id),
            EditCommand::InsertBreak { block_id, offset } => plan_insert_break(tree, block_id, *offset),
            EditCommand::InsertAfter {
                block_id,
                after,
                payload,
            } => {
                let parent = require_parent(tree, after)?;
                Ok(vec![Action::Insert {
                    block_id: block_id.clone(),
                    parent_id: parent.clone(),
                    prev_id: Some(after.clone()),
                    payload: payload.clone(),
                }])
            }
            EditCommand::Delete { block_id } => {
                let parent = require_parent(tree, block_id)?;
                Ok(vec![Action::Delete {
                    block_id: block_id.clone(),
                    parent_id: Some(parent.clone()),
                }])
            }
            EditCommand::SetText { block_id, delta } => {
                require(tree, block_id)?;
                Ok(vec![Action::Update {
                    block_id: block_id.clone(),
                    payload: BlockPatch::delta(delta.clone()),
                }])
            }
            EditCommand::TurnInto { block_id, kind } => plan_turn_into(tree, block_id, *kind),
        }
    }
}

impl BlockTree {
    /// Plan `command`, apply it optimistically, and return the actions to flush.
    pub fn execute(&mut self, command: &EditCommand) -> Result<Vec<Action>, CommandError> {
        let actions = command.plan(self)?;
        if actions.is_empty() {
            debug!(?command, "Command is a no-op");
            return Ok(actions);
        }
        let report = self.apply(&actions);
        if report.dropped > 0 || report.buffered > 0 {
            warn!(?command, ?report, "Planned actions did not apply cleanly");
        }
        Ok(actions)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn require<'a>(tree: &'a BlockTree, id: &BlockId) -> Result<&'a Block, CommandError> {
    tree.get_node(id)
        .ok_or_else(|| CommandError::BlockNotFound(id.clone()))
}

/// Parent of a non-root block.
fn require_parent<'a>(tree: &'a BlockTree, id: &BlockId) -> Result<&'a BlockId, CommandError> {
    require(tree, id)?;
    tree.parent_of(id)
        .ok_or_else(|| CommandError::RootBlock(id.clone()))
}

/// Moves relocating `ids` (in order) under `parent`, the first after `prev`.
fn chain_moves(ids: &[BlockId], parent: &BlockId, prev: Option<BlockId>) -> Vec<Action> {
    let mut prev = prev;
    ids.iter()
        .map(|id| Action::Move {
            block_id: id.clone(),
            parent_id: parent.clone(),
            prev_id: prev.replace(id.clone()),
        })
        .collect()
}

// ============================================================================
// Merge
// ============================================================================

/// Nearest block before `id` in document order owning a non-empty text.
fn merge_target<'a>(tree: &'a BlockTree, id: &BlockId) -> Option<&'a BlockId> {
    let mut cursor = tree.previous_in_order(id);
    let mut steps = 0;
    while let Some(candidate) = cursor {
        if candidate == tree.root_id() || steps > tree.block_count() {
            return None;
        }
        if tree.delta_of(candidate).is_some_and(|d| !d.is_empty()) {
            return Some(candidate);
        }
        steps += 1;
        cursor = tree.previous_in_order(candidate);
    }
    None
}

fn plan_merge(tree: &BlockTree, id: &BlockId) -> Result<Vec<Action>, CommandError> {
    let parent = require_parent(tree, id)?;
    let Some(target) = merge_target(tree, id) else {
        debug!(block_id = %id, "No preceding text to merge into");
        return Ok(Vec::new());
    };
    let target_block = require(tree, target)?;

    let empty = Delta::new();
    let merged = tree
        .delta_of(target)
        .unwrap_or(&empty)
        .concat(tree.delta_of(id).unwrap_or(&empty));

    let mut actions = vec![Action::Update {
        block_id: target.clone(),
        payload: BlockPatch::delta(merged),
    }];

    let children = tree.get_children(id);
    if !children.is_empty() {
        if target_block.kind.allows_children() {
            // A parent target keeps the children where the merged block was.
            let prev = if parent == target {
                tree.prev_sibling(id).cloned()
            } else {
                tree.get_children(target).last().cloned()
            };
            actions.extend(chain_moves(children, target, prev));
        } else {
            let target_parent = require_parent(tree, target)?;
            actions.extend(chain_moves(children, target_parent, Some(target.clone())));
        }
    }

    actions.push(Action::Delete {
        block_id: id.clone(),
        parent_id: Some(parent.clone()),
    });
    Ok(actions)
}

// ============================================================================
// Nesting
// ============================================================================

fn plan_outdent(tree: &BlockTree, id: &BlockId) -> Result<Vec<Action>, CommandError> {
    let parent = require_parent(tree, id)?;
    let Some(grandparent) = tree.parent_of(parent) else {
        debug!(block_id = %id, "Already at top level, nothing to outdent");
        return Ok(Vec::new());
    };
    let block = require(tree, id)?;
    let younger = tree.younger_siblings(id);

    let mut actions = vec![Action::Move {
        block_id: id.clone(),
        parent_id: grandparent.clone(),
        prev_id: Some(parent.clone()),
    }];
    if !younger.is_empty() {
        if block.kind.allows_children() {
            let prev = tree.get_children(id).last().cloned();
            actions.extend(chain_moves(younger, id, prev));
        } else {
            actions.extend(chain_moves(younger, grandparent, Some(id.clone())));
        }
    }
    Ok(actions)
}

fn plan_indent(tree: &BlockTree, id: &BlockId) -> Result<Vec<Action>, CommandError> {
    require_parent(tree, id)?;
    let Some(prev) = tree.prev_sibling(id) else {
        return Ok(Vec::new());
    };
    let prev_block = require(tree, prev)?;
    if !prev_block.kind.allows_children() {
        debug!(block_id = %id, prev = %prev, kind = %prev_block.kind, "Previous sibling cannot nest");
        return Ok(Vec::new());
    }
    Ok(vec![Action::Move {
        block_id: id.clone(),
        parent_id: prev.clone(),
        prev_id: tree.get_children(prev).last().cloned(),
    }])
}

fn plan_tab_backward(tree: &BlockTree, id: &BlockId) -> Result<Vec<Action>, CommandError> {
    let parent = require_parent(tree, id)?;
    if parent == tree.root_id() {
        return Ok(Vec::new());
    }
    let block = require(tree, id)?;
    if block.kind != BlockKind::Paragraph {
        // One step at a time: lose the block's richness before its nesting.
        return Ok(vec![Action::Update {
            block_id: id.clone(),
            payload: BlockPatch::kind(BlockKind::Paragraph, JsonMap::new()),
        }]);
    }
    plan_outdent(tree, id)
}

// ============================================================================
// Enter
// ============================================================================

fn plan_insert_break(tree: &BlockTree, id: &BlockId, offset: usize) -> Result<Vec<Action>, CommandError> {
    let parent = require_parent(tree, id)?;
    let block = require(tree, id)?;

    if !block.kind.has_text() {
        return Ok(vec![Action::Insert {
            block_id: BlockId::new(),
            parent_id: parent.clone(),
            prev_id: Some(id.clone()),
            payload: InsertPayload::new(BlockKind::Paragraph),
        }]);
    }

    let empty = Delta::new();
    let delta = tree.delta_of(id).unwrap_or(&empty);

    if delta.is_empty() {
        let depth = tree.depth(id).unwrap_or(1);
        if depth > 1 && tree.next_sibling(id).is_none() {
            return plan_outdent(tree, id);
        }
        if block.kind != BlockKind::Paragraph {
            return Ok(vec![Action::Update {
                block_id: id.clone(),
                payload: BlockPatch::kind(BlockKind::Paragraph, JsonMap::new()),
            }]);
        }
    }

    let (left, right) = delta.split_at(offset);
    let (kind, data) = if block.kind.is_list_like() {
        (block.kind, block.data.clone())
    } else {
        (BlockKind::Paragraph, JsonMap::new())
    };

    let mut actions = Vec::with_capacity(2);
    if !right.is_empty() {
        actions.push(Action::Update {
            block_id: id.clone(),
            payload: BlockPatch::delta(left),
        });
    }
    actions.push(Action::Insert {
        block_id: BlockId::new(),
        parent_id: parent.clone(),
        prev_id: Some(id.clone()),
        payload: InsertPayload::new(kind).with_data(data).with_delta(right),
    });
    Ok(actions)
}

// ============================================================================
// Kind changes
// ============================================================================

fn plan_turn_into(tree: &BlockTree, id: &BlockId, kind: BlockKind) -> Result<Vec<Action>, CommandError> {
    let parent = require_parent(tree, id)?;
    let block = require(tree, id)?;
    if block.kind == kind {
        return Ok(Vec::new());
    }

    let mut actions = vec![Action::Update {
        block_id: id.clone(),
        payload: BlockPatch {
            kind: Some(kind),
            ..BlockPatch::default()
        },
    }];
    // Children of a kind that cannot nest follow it as siblings instead.
    let children = tree.get_children(id);
    if !kind.allows_children() && !children.is_empty() {
        actions.extend(chain_moves(children, parent, Some(id.clone())));
    }
    Ok(actions)
}

#[cfg(test)]
mod tests {
    use folio_types::DocumentSnapshot;
    use serde_json::json;

    use super::*;
    use crate::tree::tests::{add_block, ids, sample_snapshot, sample_tree};
    use crate::tree::TreeConfig;

    fn b(id: &str) -> BlockId {
        BlockId::from(id)
    }

    fn tree_from(snap: DocumentSnapshot) -> BlockTree {
        BlockTree::from_snapshot(snap, TreeConfig::default()).unwrap()
    }

    fn text(tree: &BlockTree, id: &str) -> String {
        tree.delta_of(&b(id)).map(|d| d.to_plain_text()).unwrap_or_default()
    }

    fn node<'a>(tree: &'a BlockTree, id: &str) -> &'a Block {
        tree.get_node(&b(id)).unwrap()
    }

    // ── Merge ───────────────────────────────────────────────────────────

    #[test]
    fn test_merge_empty_block_into_previous() {
        let mut tree = sample_tree();
        let actions = tree
            .execute(&EditCommand::MergeIntoPrevious { block_id: b("p2") })
            .unwrap();

        assert_eq!(
            actions,
            vec![
                Action::Update {
                    block_id: b("p1"),
                    payload: BlockPatch::delta(Delta::plain("Hello")),
                },
                Action::Delete {
                    block_id: b("p2"),
                    parent_id: Some(b("root")),
                },
            ]
        );
        assert_eq!(ids(&tree, "root"), vec!["p1"]);
        assert_eq!(text(&tree, "p1"), "Hello");
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_merge_concatenates_text() {
        let mut snap = sample_snapshot();
        add_block(&mut snap, "p3", Some("root"), BlockKind::Paragraph, Some(" world"));
        let mut tree = tree_from(snap);
        tree.execute(&EditCommand::MergeIntoPrevious { block_id: b("p3") })
            .unwrap();
        // p2 is empty and skipped.
        assert_eq!(text(&tree, "p1"), "Hello world");
        assert_eq!(ids(&tree, "root"), vec!["p1", "p2"]);
    }

    #[test]
    fn test_merge_moves_children_into_container_target() {
        let mut snap = sample_snapshot();
        add_block(&mut snap, "p3", Some("root"), BlockKind::Paragraph, Some("tail"));
        add_block(&mut snap, "c1", Some("p3"), BlockKind::Paragraph, Some("one"));
        add_block(&mut snap, "c2", Some("p3"), BlockKind::Paragraph, Some("two"));
        let mut tree = tree_from(snap);
        let before = tree.get_children(&b("p1")).len();

        tree.execute(&EditCommand::MergeIntoPrevious { block_id: b("p3") })
            .unwrap();

        assert!(!tree.contains(&b("p3")));
        assert_eq!(tree.get_children(&b("p1")).len(), before + 2);
        assert_eq!(ids(&tree, "p1"), vec!["c1", "c2"]);
        assert_eq!(text(&tree, "p1"), "Hellotail");
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_merge_children_follow_non_container_target() {
        let mut snap = sample_snapshot();
        add_block(&mut snap, "h", Some("root"), BlockKind::Heading, Some("Title"));
        add_block(&mut snap, "p3", Some("root"), BlockKind::Paragraph, Some("x"));
        add_block(&mut snap, "c1", Some("p3"), BlockKind::Paragraph, Some("one"));
        let mut tree = tree_from(snap);

        tree.execute(&EditCommand::MergeIntoPrevious { block_id: b("p3") })
            .unwrap();

        assert_eq!(text(&tree, "h"), "Titlex");
        assert_eq!(ids(&tree, "root"), vec!["p1", "p2", "h", "c1"]);
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_merge_into_parent_keeps_children_in_place() {
        let mut snap = sample_snapshot();
        add_block(&mut snap, "c1", Some("p1"), BlockKind::Paragraph, Some("first"));
        add_block(&mut snap, "gc", Some("c1"), BlockKind::Paragraph, Some("deep"));
        add_block(&mut snap, "c2", Some("p1"), BlockKind::Paragraph, Some("second"));
        let mut tree = tree_from(snap);

        tree.execute(&EditCommand::MergeIntoPrevious { block_id: b("c1") })
            .unwrap();

        assert_eq!(text(&tree, "p1"), "Hellofirst");
        assert_eq!(ids(&tree, "p1"), vec!["gc", "c2"]);
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_merge_without_previous_text_is_noop() {
        let mut tree = sample_tree();
        let actions = tree
            .execute(&EditCommand::MergeIntoPrevious { block_id: b("p1") })
            .unwrap();
        assert!(actions.is_empty());
        assert_eq!(tree.block_count(), 3);
    }

    #[test]
    fn test_merge_root_is_error() {
        let tree = sample_tree();
        assert!(matches!(
            EditCommand::MergeIntoPrevious { block_id: b("root") }.plan(&tree),
            Err(CommandError::RootBlock(_))
        ));
        assert!(matches!(
            EditCommand::MergeIntoPrevious { block_id: b("ghost") }.plan(&tree),
            Err(CommandError::BlockNotFound(_))
        ));
    }

    // ── Outdent / indent ────────────────────────────────────────────────

    /// root → [p1 → [a, x, y, z]]
    fn nested(kind_of_x: BlockKind) -> BlockTree {
        let mut snap = sample_snapshot();
        for (id, kind) in [("a", BlockKind::Paragraph), ("x", kind_of_x), ("y", BlockKind::Paragraph), ("z", BlockKind::Paragraph)] {
            add_block(&mut snap, id, Some("p1"), kind, Some(id));
        }
        tree_from(snap)
    }

    #[test]
    fn test_outdent_adopts_younger_siblings() {
        let mut tree = nested(BlockKind::BulletedList);
        let count = tree.block_count();
        tree.execute(&EditCommand::Outdent { block_id: b("x") }).unwrap();

        assert_eq!(ids(&tree, "root"), vec!["p1", "x", "p2"]);
        assert_eq!(ids(&tree, "p1"), vec!["a"]);
        assert_eq!(ids(&tree, "x"), vec!["y", "z"]);
        assert_eq!(tree.block_count(), count);
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_outdent_non_container_keeps_siblings_after_it() {
        let mut tree = nested(BlockKind::Heading);
        let count = tree.block_count();
        tree.execute(&EditCommand::Outdent { block_id: b("x") }).unwrap();

        assert_eq!(ids(&tree, "root"), vec!["p1", "x", "y", "z", "p2"]);
        assert_eq!(ids(&tree, "p1"), vec!["a"]);
        assert_eq!(tree.block_count(), count);
        for id in ["y", "z"] {
            assert_eq!(tree.parent_of(&b(id)), Some(&b("root")));
        }
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_outdent_top_level_is_noop() {
        let mut tree = sample_tree();
        assert!(tree.execute(&EditCommand::Outdent { block_id: b("p1") }).unwrap().is_empty());
    }

    #[test]
    fn test_indent_requires_container_previous_sibling() {
        let mut tree = sample_tree();
        tree.execute(&EditCommand::Indent { block_id: b("p2") }).unwrap();
        assert_eq!(ids(&tree, "p1"), vec!["p2"]);

        let mut snap = sample_snapshot();
        add_block(&mut snap, "h", Some("root"), BlockKind::Heading, Some("H"));
        add_block(&mut snap, "p3", Some("root"), BlockKind::Paragraph, Some("x"));
        let mut tree = tree_from(snap);
        let actions = tree.execute(&EditCommand::Indent { block_id: b("p3") }).unwrap();
        assert!(actions.is_empty());
        assert_eq!(tree.parent_of(&b("p3")), Some(&b("root")));
    }

    #[test]
    fn test_indent_first_child_is_noop() {
        let mut tree = sample_tree();
        assert!(tree.execute(&EditCommand::Indent { block_id: b("p1") }).unwrap().is_empty());
    }

    #[test]
    fn test_indent_appends_after_existing_children() {
        let mut snap = sample_snapshot();
        add_block(&mut snap, "c1", Some("p1"), BlockKind::Paragraph, Some("c"));
        let mut tree = tree_from(snap);
        tree.execute(&EditCommand::Indent { block_id: b("p2") }).unwrap();
        assert_eq!(ids(&tree, "p1"), vec!["c1", "p2"]);
    }

    #[test]
    fn test_tab_backward_demotes_before_lifting() {
        let mut tree = nested(BlockKind::TodoList);
        tree.execute(&EditCommand::TabBackward { block_id: b("x") }).unwrap();
        assert_eq!(node(&tree, "x").kind, BlockKind::Paragraph);
        assert_eq!(tree.parent_of(&b("x")), Some(&b("p1")));

        tree.execute(&EditCommand::TabBackward { block_id: b("x") }).unwrap();
        assert_eq!(tree.parent_of(&b("x")), Some(&b("root")));
    }

    #[test]
    fn test_tab_backward_top_level_is_noop() {
        let mut snap = sample_snapshot();
        add_block(&mut snap, "h", Some("root"), BlockKind::Heading, Some("H"));
        let mut tree = tree_from(snap);
        assert!(tree.execute(&EditCommand::TabBackward { block_id: b("h") }).unwrap().is_empty());
        assert_eq!(node(&tree, "h").kind, BlockKind::Heading);
    }

    // ── Enter ───────────────────────────────────────────────────────────

    #[test]
    fn test_insert_break_splits_text() {
        let mut tree = sample_tree();
        let actions = tree
            .execute(&EditCommand::InsertBreak { block_id: b("p1"), offset: 2 })
            .unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(text(&tree, "p1"), "He");

        let new_id = tree.next_sibling(&b("p1")).unwrap().clone();
        assert_eq!(tree.delta_of(&new_id).unwrap().to_plain_text(), "llo");
        assert_eq!(tree.get_node(&new_id).unwrap().kind, BlockKind::Paragraph);
        assert_eq!(tree.get_children(&b("root")).len(), 3);
    }

    #[test]
    fn test_insert_break_at_end_only_inserts() {
        let mut tree = sample_tree();
        let actions = tree
            .execute(&EditCommand::InsertBreak { block_id: b("p1"), offset: 5 })
            .unwrap();
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], Action::Insert { .. }));
        assert_eq!(text(&tree, "p1"), "Hello");
    }

    #[test]
    fn test_insert_break_carries_list_payload() {
        let mut snap = sample_snapshot();
        add_block(&mut snap, "t", Some("root"), BlockKind::TodoList, Some("task"));
        let mut tree = tree_from(snap);
        let update = Action::Update {
            block_id: b("t"),
            payload: BlockPatch {
                data: Some(json!({"checked": false}).as_object().unwrap().clone()),
                ..BlockPatch::default()
            },
        };
        tree.apply(&[update]);

        tree.execute(&EditCommand::InsertBreak { block_id: b("t"), offset: 4 })
            .unwrap();
        let new_id = tree.next_sibling(&b("t")).unwrap().clone();
        let new_block = tree.get_node(&new_id).unwrap();
        assert_eq!(new_block.kind, BlockKind::TodoList);
        assert_eq!(new_block.data.get("checked"), Some(&json!(false)));
    }

    #[test]
    fn test_insert_break_does_not_carry_heading() {
        let mut snap = sample_snapshot();
        add_block(&mut snap, "h", Some("root"), BlockKind::Heading, Some("Title"));
        let mut tree = tree_from(snap);
        tree.apply(&[Action::Update {
            block_id: b("h"),
            payload: BlockPatch {
                data: Some(json!({"level": 2}).as_object().unwrap().clone()),
                ..BlockPatch::default()
            },
        }]);

        tree.execute(&EditCommand::InsertBreak { block_id: b("h"), offset: 5 })
            .unwrap();
        let new_id = tree.next_sibling(&b("h")).unwrap().clone();
        let new_block = tree.get_node(&new_id).unwrap();
        assert_eq!(new_block.kind, BlockKind::Paragraph);
        assert!(new_block.data.is_empty());
    }

    #[test]
    fn test_insert_break_on_empty_nested_last_item_outdents() {
        let mut snap = sample_snapshot();
        add_block(&mut snap, "item", Some("p1"), BlockKind::BulletedList, Some(""));
        let mut tree = tree_from(snap);
        let count = tree.block_count();

        tree.execute(&EditCommand::InsertBreak { block_id: b("item"), offset: 0 })
            .unwrap();
        assert_eq!(tree.parent_of(&b("item")), Some(&b("root")));
        assert_eq!(tree.block_count(), count);
    }

    #[test]
    fn test_insert_break_on_empty_list_item_converts_to_paragraph() {
        let mut snap = sample_snapshot();
        add_block(&mut snap, "item", Some("root"), BlockKind::NumberedList, Some(""));
        let mut tree = tree_from(snap);
        let count = tree.block_count();

        tree.execute(&EditCommand::InsertBreak { block_id: b("item"), offset: 0 })
            .unwrap();
        assert_eq!(node(&tree, "item").kind, BlockKind::Paragraph);
        assert_eq!(tree.block_count(), count);
    }

    #[test]
    fn test_insert_break_on_empty_paragraph_splits() {
        let mut tree = sample_tree();
        tree.execute(&EditCommand::InsertBreak { block_id: b("p2"), offset: 0 })
            .unwrap();
        assert_eq!(tree.get_children(&b("root")).len(), 3);
    }

    // ── Misc ────────────────────────────────────────────────────────────

    #[test]
    fn test_turn_into_non_container_releases_children() {
        let mut snap = sample_snapshot();
        add_block(&mut snap, "c1", Some("p1"), BlockKind::Paragraph, Some("c"));
        let mut tree = tree_from(snap);
        tree.execute(&EditCommand::TurnInto { block_id: b("p1"), kind: BlockKind::Heading })
            .unwrap();
        assert_eq!(node(&tree, "p1").kind, BlockKind::Heading);
        assert_eq!(ids(&tree, "root"), vec!["p1", "c1", "p2"]);
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_insert_after_and_delete() {
        let mut tree = sample_tree();
        let cmd = EditCommand::insert_after(b("p1"), BlockKind::Quote);
        let new_id = match &cmd {
            EditCommand::InsertAfter { block_id, .. } => block_id.clone(),
            _ => unreachable!(),
        };
        tree.execute(&cmd).unwrap();
        assert_eq!(tree.index_in_parent(&new_id), Some(1));

        tree.execute(&EditCommand::Delete { block_id: new_id.clone() }).unwrap();
        assert!(!tree.contains(&new_id));
        assert!(EditCommand::Delete { block_id: b("root") }.plan(&tree).is_err());
    }

    #[test]
    fn test_set_text() {
        let mut tree = sample_tree();
        tree.execute(&EditCommand::SetText {
            block_id: b("p2"),
            delta: Delta::plain("now"),
        })
        .unwrap();
        assert_eq!(text(&tree, "p2"), "now");
    }

    // ── Randomized invariants ───────────────────────────────────────────

    #[test]
    fn test_random_commands_preserve_invariants() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(7);
        let mut tree = sample_tree();
        for _ in 0..400 {
            let all: Vec<BlockId> = tree.descendants(tree.root_id());
            if all.is_empty() {
                tree.execute(&EditCommand::insert_after(b("p1"), BlockKind::Paragraph)).ok();
                continue;
            }
            let target = all[rng.gen_range(0..all.len())].clone();
            let before = tree.block_count();
            let cmd = match rng.gen_range(0..6) {
                0 => EditCommand::Indent { block_id: target },
                1 => EditCommand::Outdent { block_id: target },
                2 => EditCommand::TabBackward { block_id: target },
                3 => EditCommand::InsertBreak { block_id: target, offset: rng.gen_range(0..4) },
                4 => EditCommand::MergeIntoPrevious { block_id: target },
                _ => EditCommand::insert_after(target, BlockKind::BulletedList),
            };
            let is_outdent = matches!(cmd, EditCommand::Outdent { .. });
            tree.execute(&cmd).unwrap();
            tree.check_invariants().unwrap();
            if is_outdent {
                assert_eq!(tree.block_count(), before);
            }
        }
    }
}
