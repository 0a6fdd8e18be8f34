//! Block nodes and block kinds.
//!
//! A [`Block`] never embeds its children or its text. Children live in a
//! separate ordered-list store keyed by `child_list_id`, and text lives in a
//! delta store keyed by `external_text_id`. That indirection lets concurrent
//! inserts into one parent patch the list without rewriting the parent, and
//! lets the text be merged independently of the block's identity.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::ids::{BlockId, ListId, TextId};

/// Free-form block payload (heading level, todo `checked`, code language, …).
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// What a block *is*.
///
/// The kind decides three structural questions: whether the block may nest
/// children, whether it continues as a list on Enter, and whether it owns
/// inline text at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum BlockKind {
    /// Document root.
    Page,
    #[default]
    Paragraph,
    Heading,
    #[strum(serialize = "todo_list", serialize = "todo")]
    TodoList,
    #[strum(serialize = "bulleted_list", serialize = "bulleted")]
    BulletedList,
    #[strum(serialize = "numbered_list", serialize = "numbered")]
    NumberedList,
    ToggleList,
    Quote,
    Callout,
    Code,
    Divider,
    Image,
    MathEquation,
}

impl BlockKind {
    /// Parse from string (case-insensitive, accepts short list aliases).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Page => "page",
            BlockKind::Paragraph => "paragraph",
            BlockKind::Heading => "heading",
            BlockKind::TodoList => "todo_list",
            BlockKind::BulletedList => "bulleted_list",
            BlockKind::NumberedList => "numbered_list",
            BlockKind::ToggleList => "toggle_list",
            BlockKind::Quote => "quote",
            BlockKind::Callout => "callout",
            BlockKind::Code => "code",
            BlockKind::Divider => "divider",
            BlockKind::Image => "image",
            BlockKind::MathEquation => "math_equation",
        }
    }

    /// Container-like kinds that accept nested children.
    pub fn allows_children(&self) -> bool {
        matches!(
            self,
            BlockKind::Page
                | BlockKind::Paragraph
                | BlockKind::TodoList
                | BlockKind::BulletedList
                | BlockKind::NumberedList
                | BlockKind::ToggleList
                | BlockKind::Quote
                | BlockKind::Callout
        )
    }

    /// Kinds whose payload continues onto the next line on Enter.
    pub fn is_list_like(&self) -> bool {
        matches!(
            self,
            BlockKind::TodoList | BlockKind::BulletedList | BlockKind::NumberedList
        )
    }

    /// Whether the block owns inline text.
    pub fn has_text(&self) -> bool {
        !matches!(self, BlockKind::Divider | BlockKind::Image)
    }
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One node of the document tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: BlockId,
    #[serde(rename = "type")]
    pub kind: BlockKind,
    /// `None` only for the document root.
    #[serde(default)]
    pub parent_id: Option<BlockId>,
    pub child_list_id: ListId,
    #[serde(default)]
    pub data: JsonMap,
    #[serde(default)]
    pub external_text_id: Option<TextId>,
}

impl Block {
    /// A fresh block with newly minted list and text ids.
    ///
    /// Kinds without inline text get no text id.
    pub fn new(kind: BlockKind, parent_id: Option<BlockId>) -> Self {
        Self {
            id: BlockId::new(),
            kind,
            parent_id,
            child_list_id: ListId::new(),
            data: JsonMap::new(),
            external_text_id: kind.has_text().then(TextId::new),
        }
    }

    /// Check if this is the document root (no parent).
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}
