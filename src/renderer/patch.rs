//! Patch types - sparse descriptions of what changed between two trees.
//!
//! A [`Patch`] maps hole indices to [`SlotPatch`]es and omits every index
//! whose content did not change. Statics ride along only when the client
//! cannot know them yet. Serialization lives in `encode.rs`.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::types::Handle;

/// Sparse patch of one rendered tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    /// Present on first render or when the template behind the tree changed.
    pub statics: Option<Arc<[String]>>,
    pub slots: BTreeMap<usize, SlotPatch>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nothing to send.
    pub fn is_empty(&self) -> bool {
        self.statics.is_none() && self.slots.is_empty()
    }

    /// Number of changed slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, index: usize) -> Option<&SlotPatch> {
        self.slots.get(&index)
    }
}

/// What changed at one hole.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotPatch {
    /// New scalar value (also sent when a conditional renders nothing).
    Scalar(String),
    /// Nested tree, full or sparse.
    Tree(Patch),
    Comprehension(ComprehensionPatch),
    Stream(StreamPatch),
    /// Component handle; the component's own patch is keyed by it.
    Component(Handle),
}

impl SlotPatch {
    /// Scalar content, if this is a scalar patch.
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            SlotPatch::Scalar(value) => Some(value),
            _ => None,
        }
    }
}

// =============================================================================
// Comprehensions
// =============================================================================

/// Changed entries of a comprehension. Entry patches never carry statics;
/// the body's statics are hoisted to `statics`.
#[derive(Debug, Clone, PartialEq)]
pub struct ComprehensionPatch {
    pub statics: Option<Arc<[String]>>,
    pub entries: EntriesPatch,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntriesPatch {
    /// The entry list changed length: every entry, in order.
    Replace(Vec<Patch>),
    /// Same length: only the entries that changed, by position.
    Update(BTreeMap<usize, Patch>),
}

// =============================================================================
// Streams
// =============================================================================

/// A stream hole's operations for this pass plus the rendered inserts.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamPatch {
    pub statics: Option<Arc<[String]>>,
    pub ops: Option<StreamOps>,
    /// One entry per insert, same order.
    pub entries: Vec<Patch>,
}

/// Stream operations as the client applies them: deletes, then inserts.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamOps {
    pub reference: u32,
    pub inserts: Vec<InsertOp>,
    pub deletes: Vec<String>,
    pub reset: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertOp {
    pub dom_id: String,
    pub at: i64,
    pub limit: Option<i64>,
    pub update_only: bool,
}
