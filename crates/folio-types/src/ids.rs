//! Typed identifiers for blocks, child lists, texts, documents and clients.
//!
//! The backend owns the id format, so every id is an opaque string on the
//! wire. Locally minted ids are random UUIDv4 in simple (hyphen-less) form.
//! The `short()` form is for human-facing output only, never a lookup key.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A block identifier.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(String);

/// Key into the ordered child-list store.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListId(String);

/// Key into the text delta store.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TextId(String);

/// A document identifier.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

/// Identifies one client session; used to recognize echoes of our own flushes.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

// ── Shared behavior ─────────────────────────────────────────────────────────

macro_rules! impl_typed_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// Mint a fresh random id.
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4().as_simple().to_string())
            }

            /// The raw string form.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// First 8 characters, for human display only.
            pub fn short(&self) -> &str {
                match self.0.char_indices().nth(8) {
                    Some((idx, _)) => &self.0[..idx],
                    None => &self.0,
                }
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<&str> for $T {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $T {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $T {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.short())
            }
        }
    };
}

impl_typed_id!(BlockId, "BlockId");
impl_typed_id!(ListId, "ListId");
impl_typed_id!(TextId, "TextId");
impl_typed_id!(DocId, "DocId");
impl_typed_id!(ClientId, "ClientId");
