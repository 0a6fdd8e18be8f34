//! Text deltas: the CRDT-addressable form of a block's inline text.
//!
//! A delta here is insert-only: an ordered list of `{insert, attributes?}`
//! operations describing the whole text. The collaborative text type behind
//! it is opaque; this module only composes operation lists.
//!
//! Offsets are counted in Unicode scalar values (`char`s), matching how the
//! editor anchors selection.

use serde::{Deserialize, Serialize};

/// Inline marks and entity payloads (`bold: true`, `href: "…"`,
/// `formula: "x^2"`, `mention: {…}`).
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// Attribute key carrying an inline formula.
pub const FORMULA_ATTR: &str = "formula";

/// Attribute key carrying an inline mention object.
pub const MENTION_ATTR: &str = "mention";

/// One insert operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextOp {
    pub insert: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
}

impl TextOp {
    /// An op without attributes.
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            insert: text.into(),
            attributes: None,
        }
    }

    /// An op with attributes (an empty map is stored as `None`).
    pub fn with_attributes(text: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            insert: text.into(),
            attributes: (!attributes.is_empty()).then_some(attributes),
        }
    }

    /// Length in chars.
    pub fn char_len(&self) -> usize {
        self.insert.chars().count()
    }

    /// Look up one attribute.
    pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.as_ref().and_then(|a| a.get(key))
    }
}

/// Whether an attribute value is a diff artifact rather than a real mark.
///
/// Empty strings and `false` show up when a mark is cleared; they must not
/// leak into the editable model.
pub fn is_empty_attribute(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::String(s) => s.is_empty(),
        serde_json::Value::Bool(b) => !b,
        serde_json::Value::Null => true,
        _ => false,
    }
}

/// Copy of `attributes` without empty values.
pub fn prune_attributes(attributes: &Attributes) -> Attributes {
    attributes
        .iter()
        .filter(|(_, v)| !is_empty_attribute(v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// An ordered sequence of insert operations.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Delta(Vec<TextOp>);

impl Delta {
    /// An empty delta.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// A single unformatted op (empty text yields an empty delta).
    pub fn plain(text: impl Into<String>) -> Self {
        let text = text.into();
        if text.is_empty() {
            Self::new()
        } else {
            Self(vec![TextOp::plain(text)])
        }
    }

    pub fn ops(&self) -> &[TextOp] {
        &self.0
    }

    pub fn push(&mut self, op: TextOp) {
        self.0.push(op);
    }

    /// True when the delta carries no characters at all.
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|op| op.insert.is_empty())
    }

    /// Length in chars.
    pub fn char_len(&self) -> usize {
        self.0.iter().map(TextOp::char_len).sum()
    }

    /// Concatenated text without attributes.
    pub fn to_plain_text(&self) -> String {
        self.0.iter().map(|op| op.insert.as_str()).collect()
    }

    /// Canonical form: no empty inserts, no empty attribute values, adjacent
    /// ops with equal attributes merged.
    pub fn normalize(&self) -> Delta {
        let mut out: Vec<TextOp> = Vec::with_capacity(self.0.len());
        for op in &self.0 {
            if op.insert.is_empty() {
                continue;
            }
            let attributes = op
                .attributes
                .as_ref()
                .map(prune_attributes)
                .filter(|a| !a.is_empty());
            match out.last_mut() {
                Some(last) if last.attributes == attributes => last.insert.push_str(&op.insert),
                _ => out.push(TextOp {
                    insert: op.insert.clone(),
                    attributes,
                }),
            }
        }
        Delta(out)
    }

    /// `self` followed by `other`, normalized.
    pub fn concat(&self, other: &Delta) -> Delta {
        let mut ops = self.0.clone();
        ops.extend(other.0.iter().cloned());
        Delta(ops).normalize()
    }

    /// Split at a char offset. Offsets past the end clamp to the end.
    pub fn split_at(&self, offset: usize) -> (Delta, Delta) {
        let mut left = Vec::new();
        let mut right = Vec::new();
        let mut remaining = offset;
        for op in &self.0 {
            let len = op.char_len();
            if remaining >= len {
                left.push(op.clone());
                remaining -= len;
            } else if remaining == 0 {
                right.push(op.clone());
            } else {
                let byte = op
                    .insert
                    .char_indices()
                    .nth(remaining)
                    .map(|(i, _)| i)
                    .unwrap_or(op.insert.len());
                left.push(TextOp {
                    insert: op.insert[..byte].to_string(),
                    attributes: op.attributes.clone(),
                });
                right.push(TextOp {
                    insert: op.insert[byte..].to_string(),
                    attributes: op.attributes.clone(),
                });
                remaining = 0;
            }
        }
        (Delta(left).normalize(), Delta(right).normalize())
    }
}

impl From<Vec<TextOp>> for Delta {
    fn from(ops: Vec<TextOp>) -> Self {
        Self(ops)
    }
}

impl FromIterator<TextOp> for Delta {
    fn from_iter<I: IntoIterator<Item = TextOp>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
