//! Patch wire shape (serde).
//!
//! ```text
//! {"0": "A", "1": {...nested patch...}, "s": ["Hello ", ""]}
//! comprehension: {"s": [...], "d": [["a"], ["b"]]}        entries replaced
//!                {"d": {"1": {"0": "x"}}}                  sparse by position
//! stream:        {"s": [...], "d": [[...]], "stream": [ref, [[dom_id, at, limit, update_only]], [deletes], reset]}
//! component:     3                                          handle
//! ```

use std::collections::BTreeMap;

use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::Serialize;

use super::patch::{ComprehensionPatch, EntriesPatch, InsertOp, Patch, SlotPatch, StreamOps, StreamPatch};

pub(crate) const STATICS: &str = "s";
pub(crate) const DYNAMICS: &str = "d";
pub(crate) const STREAM: &str = "stream";

impl Patch {
    /// Write this patch's entries into an already open map.
    pub(crate) fn serialize_entries<M: SerializeMap>(&self, map: &mut M) -> Result<(), M::Error> {
        for (index, slot) in &self.slots {
            map.serialize_entry(&index.to_string(), slot)?;
        }
        if let Some(statics) = &self.statics {
            map.serialize_entry(STATICS, &statics[..])?;
        }
        Ok(())
    }
}

impl Serialize for Patch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        self.serialize_entries(&mut map)?;
        map.end()
    }
}

impl Serialize for SlotPatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SlotPatch::Scalar(value) => serializer.serialize_str(value),
            SlotPatch::Tree(patch) => patch.serialize(serializer),
            SlotPatch::Comprehension(patch) => patch.serialize(serializer),
            SlotPatch::Stream(patch) => patch.serialize(serializer),
            SlotPatch::Component(handle) => handle.serialize(serializer),
        }
    }
}

/// A full entry as a positional array of its slots.
struct Row<'a>(&'a Patch);

impl Serialize for Row<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.slots.len()))?;
        for slot in self.0.slots.values() {
            seq.serialize_element(slot)?;
        }
        seq.end()
    }
}

struct Rows<'a>(&'a [Patch]);

impl Serialize for Rows<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter().map(Row))
    }
}

impl Serialize for ComprehensionPatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        match &self.entries {
            EntriesPatch::Replace(entries) => map.serialize_entry(DYNAMICS, &Rows(entries))?,
            EntriesPatch::Update(changed) => map.serialize_entry(DYNAMICS, &ByPosition(changed))?,
        }
        if let Some(statics) = &self.statics {
            map.serialize_entry(STATICS, &statics[..])?;
        }
        map.end()
    }
}

/// Sparse entries keyed by their position.
struct ByPosition<'a>(&'a BTreeMap<usize, Patch>);

impl Serialize for ByPosition<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(index, patch)| (index.to_string(), patch)))
    }
}

impl Serialize for StreamPatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry(DYNAMICS, &Rows(&self.entries))?;
        if let Some(statics) = &self.statics {
            map.serialize_entry(STATICS, &statics[..])?;
        }
        if let Some(ops) = &self.ops {
            map.serialize_entry(STREAM, ops)?;
        }
        map.end()
    }
}

impl Serialize for StreamOps {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.reference, &self.inserts, &self.deletes, self.reset).serialize(serializer)
    }
}

impl Serialize for InsertOp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.dom_id, self.at, self.limit, self.update_only).serialize(serializer)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::types::Handle;
    use serde_json::json;

    fn statics(parts: &[&str]) -> Option<Arc<[String]>> {
        Some(parts.iter().map(|s| s.to_string()).collect())
    }

    fn scalars(values: &[&str]) -> Patch {
        Patch {
            statics: None,
            slots: values
                .iter()
                .enumerate()
                .map(|(i, v)| (i, SlotPatch::Scalar(v.to_string())))
                .collect(),
        }
    }

    #[test]
    fn test_full_patch() {
        let patch = Patch {
            statics: statics(&["Hello ", ""]),
            ..scalars(&["A"])
        };
        assert_eq!(serde_json::to_value(&patch).unwrap(), json!({"0": "A", "s": ["Hello ", ""]}));
    }

    #[test]
    fn test_sparse_patch() {
        let mut patch = Patch::new();
        patch.slots.insert(2, SlotPatch::Scalar("B".into()));
        patch.slots.insert(4, SlotPatch::Component(Handle(1)));
        assert_eq!(serde_json::to_value(&patch).unwrap(), json!({"2": "B", "4": 1}));
        assert_eq!(serde_json::to_value(Patch::new()).unwrap(), json!({}));
    }

    #[test]
    fn test_comprehension() {
        let replaced = SlotPatch::Comprehension(ComprehensionPatch {
            statics: statics(&["<li>", "</li>"]),
            entries: EntriesPatch::Replace(vec![scalars(&["a"]), scalars(&["b"])]),
        });
        assert_eq!(
            serde_json::to_value(&replaced).unwrap(),
            json!({"d": [["a"], ["b"]], "s": ["<li>", "</li>"]})
        );

        let updated = SlotPatch::Comprehension(ComprehensionPatch {
            statics: None,
            entries: EntriesPatch::Update(BTreeMap::from([(1, scalars(&["x"]))])),
        });
        assert_eq!(serde_json::to_value(&updated).unwrap(), json!({"d": {"1": {"0": "x"}}}));
    }

    #[test]
    fn test_stream() {
        let patch = SlotPatch::Stream(StreamPatch {
            statics: None,
            ops: Some(StreamOps {
                reference: 0,
                inserts: vec![InsertOp {
                    dom_id: "songs-2".into(),
                    at: -1,
                    limit: None,
                    update_only: false,
                }],
                deletes: vec!["songs-1".into()],
                reset: false,
            }),
            entries: vec![scalars(&["two"])],
        });
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            json!({"d": [["two"]], "stream": [0, [["songs-2", -1, null, false]], ["songs-1"], false]})
        );
    }
}
