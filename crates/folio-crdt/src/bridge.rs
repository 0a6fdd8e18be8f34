//! Delta bridge between text deltas and the editable tree.
//!
//! The editor adapter renders [`EditableNode`]s: each block mirrored with a
//! synthesized leading [`TextNode`] holding its inline children. Inline
//! entities (formulas, mentions) are exploded into one wrapper per
//! character, because the editor anchors selection per character rather
//! than per logical span.
//!
//! Everything here is pure. Converting an unchanged snapshot twice yields
//! equal trees, and [`from_tree`] inverts [`to_tree`].

use serde::{Deserialize, Serialize};
use tracing::warn;

use folio_types::delta::{FORMULA_ATTR, MENTION_ATTR, prune_attributes};
use folio_types::{
    Attributes, Block, BlockId, BlockKind, Delta, DocumentSnapshot, JsonMap, ListId, TextId,
    TextOp,
};

use crate::tree::MAX_TREE_DEPTH;

/// A run of text with its marks.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TextLeaf {
    pub text: String,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub marks: Attributes,
}

impl TextLeaf {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            marks: Attributes::new(),
        }
    }
}

/// One inline child of a text node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InlineNode {
    Text(TextLeaf),
    /// One character of an inline formula.
    Formula { formula: String, leaf: TextLeaf },
    /// One character of an inline mention.
    Mention {
        mention: serde_json::Value,
        leaf: TextLeaf,
    },
}

impl InlineNode {
    pub fn leaf(&self) -> &TextLeaf {
        match self {
            InlineNode::Text(leaf)
            | InlineNode::Formula { leaf, .. }
            | InlineNode::Mention { leaf, .. } => leaf,
        }
    }
}

/// The synthesized text owner at the head of each block node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextNode {
    pub text_id: Option<TextId>,
    pub children: Vec<InlineNode>,
}

impl TextNode {
    /// Text node for a delta; always holds at least one (possibly empty) leaf
    /// so the editor has a caret position.
    fn from_delta(text_id: Option<TextId>, delta: Option<&Delta>) -> Self {
        let mut children = delta.map(to_editable_children).unwrap_or_default();
        if children.is_empty() {
            children.push(InlineNode::Text(TextLeaf::default()));
        }
        Self { text_id, children }
    }
}

/// Element of a block node: its text node or a child block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum EditableElement {
    Text(TextNode),
    Block(EditableNode),
}

/// A block as the editor sees it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditableNode {
    pub id: BlockId,
    #[serde(rename = "type")]
    pub kind: BlockKind,
    #[serde(default)]
    pub data: JsonMap,
    pub child_list_id: ListId,
    pub children: Vec<EditableElement>,
}

impl EditableNode {
    /// The leading text node, if the block owns text.
    pub fn text_node(&self) -> Option<&TextNode> {
        match self.children.first() {
            Some(EditableElement::Text(t)) => Some(t),
            _ => None,
        }
    }

    /// Child block nodes in order.
    pub fn child_blocks(&self) -> impl Iterator<Item = &EditableNode> {
        self.children.iter().filter_map(|e| match e {
            EditableElement::Block(b) => Some(b),
            EditableElement::Text(_) => None,
        })
    }
}

// ============================================================================
// Delta → inline nodes
// ============================================================================

/// Convert a delta into inline editor nodes.
///
/// Formula and mention ops become one wrapper per character sharing the
/// payload; other ops become text leaves. Attribute values that are `""`
/// or `false` are pruned.
pub fn to_editable_children(delta: &Delta) -> Vec<InlineNode> {
    let mut out = Vec::with_capacity(delta.ops().len());
    for op in delta.ops() {
        if op.insert.is_empty() {
            continue;
        }
        let mut marks = op.attributes.as_ref().map(prune_attributes).unwrap_or_default();
        let formula = marks.remove(FORMULA_ATTR);
        let mention = marks.remove(MENTION_ATTR);

        match (formula, mention) {
            (Some(formula), _) => {
                let formula = match formula {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                out.extend(op.insert.chars().map(|c| InlineNode::Formula {
                    formula: formula.clone(),
                    leaf: TextLeaf {
                        text: c.to_string(),
                        marks: marks.clone(),
                    },
                }));
            }
            (None, Some(mention)) => {
                out.extend(op.insert.chars().map(|c| InlineNode::Mention {
                    mention: mention.clone(),
                    leaf: TextLeaf {
                        text: c.to_string(),
                        marks: marks.clone(),
                    },
                }));
            }
            (None, None) => out.push(InlineNode::Text(TextLeaf {
                text: op.insert.clone(),
                marks,
            })),
        }
    }
    out
}

/// Inverse of [`to_editable_children`].
///
/// Each text leaf becomes one op; runs of entity wrappers sharing a payload
/// and marks are folded back into a single op. Empty leaves are skipped.
pub fn to_delta(children: &[InlineNode]) -> Delta {
    let mut ops: Vec<TextOp> = Vec::with_capacity(children.len());
    // Whether the last op came from entity wrappers (and may absorb more).
    let mut entity_run = false;

    for node in children {
        let leaf = node.leaf();
        if leaf.text.is_empty() {
            continue;
        }
        let entity = match node {
            InlineNode::Text(_) => None,
            InlineNode::Formula { formula, .. } => Some((FORMULA_ATTR, serde_json::Value::String(formula.clone()))),
            InlineNode::Mention { mention, .. } => Some((MENTION_ATTR, mention.clone())),
        };

        match entity {
            None => {
                ops.push(TextOp::with_attributes(leaf.text.clone(), leaf.marks.clone()));
                entity_run = false;
            }
            Some((key, value)) => {
                let mut attributes = leaf.marks.clone();
                attributes.insert(key.to_string(), value);
                match ops.last_mut() {
                    Some(last) if entity_run && last.attributes.as_ref() == Some(&attributes) => {
                        last.insert.push_str(&leaf.text);
                    }
                    _ => ops.push(TextOp::with_attributes(leaf.text.clone(), attributes)),
                }
                entity_run = true;
            }
        }
    }
    Delta::from(ops)
}

// ============================================================================
// Snapshot → editable tree
// ============================================================================

/// Build the editable tree depth-first from the snapshot's root.
///
/// With `include_root` the root itself is returned, wrapped with a single
/// empty text leaf so the outer editor has a top-level text owner;
/// otherwise the root's children are returned.
pub fn to_tree(snapshot: &DocumentSnapshot, include_root: bool) -> Vec<EditableNode> {
    let Some(root) = snapshot.root() else {
        warn!(root_id = %snapshot.root_id, "to_tree: snapshot has no root block");
        return Vec::new();
    };

    let children = build_children(snapshot, &root.id, 1);
    if include_root {
        let mut elements = Vec::with_capacity(children.len() + 1);
        elements.push(EditableElement::Text(TextNode {
            text_id: root.external_text_id.clone(),
            children: vec![InlineNode::Text(TextLeaf::default())],
        }));
        elements.extend(children.into_iter().map(EditableElement::Block));
        vec![EditableNode {
            id: root.id.clone(),
            kind: root.kind,
            data: root.data.clone(),
            child_list_id: root.child_list_id.clone(),
            children: elements,
        }]
    } else {
        children
    }
}

fn build_children(snapshot: &DocumentSnapshot, parent: &BlockId, depth: usize) -> Vec<EditableNode> {
    if depth > MAX_TREE_DEPTH {
        warn!(block_id = %parent, "to_tree: depth limit reached, truncating");
        return Vec::new();
    }
    snapshot
        .children_of(parent)
        .iter()
        .filter_map(|id| match snapshot.blocks.get(id) {
            Some(block) => Some(build_node(snapshot, block, depth)),
            None => {
                warn!(block_id = %id, "to_tree: child list references unknown block");
                None
            }
        })
        .collect()
}

fn build_node(snapshot: &DocumentSnapshot, block: &Block, depth: usize) -> EditableNode {
    let mut children = Vec::new();
    if let Some(text_id) = &block.external_text_id {
        children.push(EditableElement::Text(TextNode::from_delta(
            Some(text_id.clone()),
            snapshot.deltas_by_text_id.get(text_id),
        )));
    }
    children.extend(
        build_children(snapshot, &block.id, depth + 1)
            .into_iter()
            .map(EditableElement::Block),
    );
    EditableNode {
        id: block.id.clone(),
        kind: block.kind,
        data: block.data.clone(),
        child_list_id: block.child_list_id.clone(),
        children,
    }
}

// ============================================================================
// Editable tree → snapshot
// ============================================================================

/// Inverse of [`to_tree`] with `include_root = true`.
///
/// The root's text is not represented in the editable tree, so the rebuilt
/// snapshot carries no delta for it.
pub fn from_tree(root: &EditableNode) -> DocumentSnapshot {
    let mut snapshot = DocumentSnapshot {
        root_id: root.id.clone(),
        blocks: Default::default(),
        children_by_list: Default::default(),
        deltas_by_text_id: Default::default(),
    };
    collect(&mut snapshot, root, None, true);
    snapshot
}

fn collect(snapshot: &mut DocumentSnapshot, node: &EditableNode, parent: Option<&BlockId>, is_root: bool) {
    let text = node.text_node();
    let external_text_id = text.and_then(|t| t.text_id.clone());
    if let (false, Some(text_id), Some(text)) = (is_root, &external_text_id, text) {
        snapshot
            .deltas_by_text_id
            .insert(text_id.clone(), to_delta(&text.children));
    }

    let child_ids: Vec<BlockId> = node.child_blocks().map(|c| c.id.clone()).collect();
    snapshot
        .children_by_list
        .insert(node.child_list_id.clone(), child_ids);
    snapshot.blocks.insert(
        node.id.clone(),
        Block {
            id: node.id.clone(),
            kind: node.kind,
            parent_id: parent.cloned(),
            child_list_id: node.child_list_id.clone(),
            data: node.data.clone(),
            external_text_id,
        },
    );
    for child in node.child_blocks() {
        collect(snapshot, child, Some(&node.id), false);
    }
}
