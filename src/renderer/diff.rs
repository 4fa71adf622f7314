//! Diff Engine - compares the previous tree to the new one.
//!
//! The diff walks both trees' dynamics pairwise and emits only what changed.
//! This sparseness is the whole point: diffing a tree against itself always
//! yields an empty patch.
//!
//! # Algorithm
//!
//! 1. No previous tree, or a different template: emit everything, statics included
//! 2. Otherwise for each hole index:
//!    - Equal scalars: skip
//!    - Same branch: recurse (may produce nothing)
//!    - Comprehension: skip when shared, sparse by position when the length
//!      is equal, replace all entries when it changed
//!    - Stream: emit this pass's operations, if any
//!    - Component: skip when the handle is the same (its own patch is keyed by handle)
//!    - Anything else: emit the new value in full

use std::collections::BTreeMap;
use std::sync::Arc;

use super::patch::{ComprehensionPatch, EntriesPatch, InsertOp, Patch, SlotPatch, StreamOps, StreamPatch};
use super::tree::{Comprehension, Dynamic, Rendered, StreamSlot};
use crate::error::Result;

/// Diff `new` against the tree last sent to the client.
///
/// # Arguments
///
/// * `old` - Previously emitted tree, `None` on first render
/// * `new` - Freshly rendered tree
pub fn diff(old: Option<&Rendered>, new: &Rendered) -> Result<Patch> {
    new.check_arity()?;

    let old = match old {
        Some(old) if old.template().same_as(new.template()) => old,
        _ => return Ok(full(new)),
    };
    new.template().check_arity(old.dynamics().len())?;

    let mut patch = Patch::new();
    for (index, (before, after)) in old.dynamics().iter().zip(new.dynamics()).enumerate() {
        if let Some(slot) = diff_dynamic(before, after)? {
            patch.slots.insert(index, slot);
        }
    }
    Ok(patch)
}

fn diff_dynamic(old: &Dynamic, new: &Dynamic) -> Result<Option<SlotPatch>> {
    let slot = match (old, new) {
        (Dynamic::Scalar(before), Dynamic::Scalar(after)) => {
            (before != after).then(|| SlotPatch::Scalar(after.clone()))
        }

        (Dynamic::Branch { branch: before, tree: old_tree }, Dynamic::Branch { branch: after, tree: new_tree }) => {
            match (old_tree, new_tree) {
                (None, None) => None,
                (Some(_), None) => Some(SlotPatch::Scalar(String::new())),
                (Some(old_tree), Some(new_tree)) if before == after => {
                    let patch = diff(Some(&**old_tree), new_tree)?;
                    (!patch.is_empty()).then_some(SlotPatch::Tree(patch))
                }
                (_, Some(new_tree)) => Some(SlotPatch::Tree(full(new_tree))),
            }
        }

        (Dynamic::Comprehension(before), Dynamic::Comprehension(after)) => diff_comprehension(before, after)?,

        (Dynamic::Stream(before), Dynamic::Stream(after)) => {
            let body_changed = !before.body.same_as(&after.body);
            (body_changed || after.flush.is_some()).then(|| SlotPatch::Stream(stream_patch(after, body_changed)))
        }

        (Dynamic::Component(before), Dynamic::Component(after)) => {
            (before.handle != after.handle).then_some(SlotPatch::Component(after.handle))
        }

        (_, new) => Some(full_dynamic(new)),
    };
    Ok(slot)
}

fn diff_comprehension(old: &Comprehension, new: &Comprehension) -> Result<Option<SlotPatch>> {
    if Arc::ptr_eq(&old.entries, &new.entries) {
        return Ok(None);
    }

    let body_changed = !old.body.same_as(&new.body);
    if body_changed || old.entries.len() != new.entries.len() {
        return Ok(Some(SlotPatch::Comprehension(ComprehensionPatch {
            statics: body_changed.then(|| new.body.statics().clone()),
            entries: EntriesPatch::Replace(new.entries.iter().map(full_entry).collect()),
        })));
    }

    let mut changed = BTreeMap::new();
    for (index, (before, after)) in old.entries.iter().zip(new.entries.iter()).enumerate() {
        let patch = diff(Some(before), after)?;
        if !patch.is_empty() {
            changed.insert(index, patch);
        }
    }

    if changed.is_empty() {
        return Ok(None);
    }
    Ok(Some(SlotPatch::Comprehension(ComprehensionPatch {
        statics: None,
        entries: EntriesPatch::Update(changed),
    })))
}

// =============================================================================
// Full Patches
// =============================================================================

/// Every slot of a tree plus its statics.
pub fn full(tree: &Rendered) -> Patch {
    Patch {
        statics: Some(tree.template().statics().clone()),
        ..full_entry(tree)
    }
}

/// Every slot of a tree, statics left to the enclosing comprehension/stream.
fn full_entry(tree: &Rendered) -> Patch {
    Patch {
        statics: None,
        slots: tree
            .dynamics()
            .iter()
            .enumerate()
            .map(|(index, dynamic)| (index, full_dynamic(dynamic)))
            .collect(),
    }
}

fn full_dynamic(dynamic: &Dynamic) -> SlotPatch {
    match dynamic {
        Dynamic::Scalar(value) => SlotPatch::Scalar(value.clone()),
        Dynamic::Branch { tree: None, .. } => SlotPatch::Scalar(String::new()),
        Dynamic::Branch { tree: Some(tree), .. } => SlotPatch::Tree(full(tree)),
        Dynamic::Comprehension(comprehension) => SlotPatch::Comprehension(ComprehensionPatch {
            statics: Some(comprehension.body.statics().clone()),
            entries: EntriesPatch::Replace(comprehension.entries.iter().map(full_entry).collect()),
        }),
        Dynamic::Stream(stream) => SlotPatch::Stream(stream_patch(stream, true)),
        Dynamic::Component(slot) => SlotPatch::Component(slot.handle),
    }
}

fn stream_patch(stream: &StreamSlot, with_statics: bool) -> StreamPatch {
    let ops = stream.flush.as_ref().map(|flush| StreamOps {
        reference: flush.reference,
        inserts: flush
            .inserts
            .iter()
            .map(|insert| InsertOp {
                dom_id: insert.dom_id.clone(),
                at: insert.at,
                limit: insert.limit,
                update_only: insert.update_only,
            })
            .collect(),
        deletes: flush.deletes.clone(),
        reset: flush.reset,
    });

    StreamPatch {
        statics: with_statics.then(|| stream.body.statics().clone()),
        ops,
        entries: stream.entries.iter().map(full_entry).collect(),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{CompiledTemplate, TemplateBuilder};
    use crate::renderer::ComponentSlot;
    use crate::types::Handle;

    fn hello() -> Arc<CompiledTemplate> {
        TemplateBuilder::new().text("Hello ").assign("name").build().unwrap()
    }

    fn scalar_tree(template: &Arc<CompiledTemplate>, values: &[&str]) -> Rendered {
        Rendered::new(
            template.clone(),
            values.iter().map(|v| Dynamic::Scalar(v.to_string())).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_first_render_is_full() {
        let template = hello();
        let patch = diff(None, &scalar_tree(&template, &["A"])).unwrap();

        assert_eq!(&patch.statics.unwrap()[..], ["Hello ", ""]);
        assert_eq!(patch.slots[&0], SlotPatch::Scalar("A".into()));
    }

    #[test]
    fn test_identical_trees_diff_empty() {
        let template = hello();
        let a = scalar_tree(&template, &["A"]);
        let b = scalar_tree(&template, &["A"]);
        assert!(diff(Some(&a), &b).unwrap().is_empty());
        assert!(diff(Some(&b), &b).unwrap().is_empty());
    }

    #[test]
    fn test_changed_scalar_only() {
        let template = TemplateBuilder::new().assign("a").assign("b").build().unwrap();
        let old = scalar_tree(&template, &["1", "2"]);
        let new = scalar_tree(&template, &["1", "3"]);

        let patch = diff(Some(&old), &new).unwrap();
        assert!(patch.statics.is_none());
        assert_eq!(patch.len(), 1);
        assert_eq!(patch.get(1).and_then(SlotPatch::as_scalar), Some("3"));
    }

    #[test]
    fn test_different_template_resends_statics() {
        let a = hello();
        let b = TemplateBuilder::new().text("Bye ").assign("name").build().unwrap();
        let patch = diff(Some(&scalar_tree(&a, &["A"])), &scalar_tree(&b, &["A"])).unwrap();
        assert!(patch.statics.is_some());
    }

    #[test]
    fn test_branch_switches() {
        let body = TemplateBuilder::new().text("<i>").assign("x").text("</i>").build().unwrap();
        let template = TemplateBuilder::new()
            .show(["on"], |_scope| Ok(true), body.clone())
            .build()
            .unwrap();

        let off = Rendered::new(template.clone(), vec![Dynamic::Branch { branch: None, tree: None }]).unwrap();
        let on = Rendered::new(
            template.clone(),
            vec![Dynamic::Branch {
                branch: Some(0),
                tree: Some(Box::new(scalar_tree(&body, &["1"]))),
            }],
        )
        .unwrap();

        match diff(Some(&off), &on).unwrap().slots.get(&0) {
            Some(SlotPatch::Tree(patch)) => assert!(patch.statics.is_some()),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(diff(Some(&on), &off).unwrap().slots[&0], SlotPatch::Scalar(String::new()));
        assert!(diff(Some(&on), &on.clone()).unwrap().is_empty());
    }

    #[test]
    fn test_comprehension_sparse_and_replace() {
        let body = TemplateBuilder::new().text("<li>").local("item").text("</li>").build().unwrap();
        let template = TemplateBuilder::new().each_assign("items", "item", body.clone()).build().unwrap();

        let list = |values: &[&str]| {
            Rendered::new(
                template.clone(),
                vec![Dynamic::Comprehension(Comprehension {
                    body: body.clone(),
                    entries: Arc::new(values.iter().map(|v| scalar_tree(&body, &[*v])).collect()),
                })],
            )
            .unwrap()
        };

        let patch = diff(Some(&list(&["a", "b", "c"])), &list(&["a", "x", "c"])).unwrap();
        match &patch.slots[&0] {
            SlotPatch::Comprehension(ComprehensionPatch {
                statics: None,
                entries: EntriesPatch::Update(changed),
            }) => {
                assert_eq!(changed.keys().copied().collect::<Vec<_>>(), vec![1]);
                assert!(changed[&1].statics.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }

        let patch = diff(Some(&list(&["a", "b"])), &list(&["a", "b", "c"])).unwrap();
        match &patch.slots[&0] {
            SlotPatch::Comprehension(ComprehensionPatch {
                entries: EntriesPatch::Replace(entries),
                ..
            }) => assert_eq!(entries.len(), 3),
            other => panic!("unexpected {other:?}"),
        }

        assert!(diff(Some(&list(&["a"])), &list(&["a"])).unwrap().is_empty());
    }

    #[test]
    fn test_component_slot() {
        let template = TemplateBuilder::new().text("<div>").untracked(|_scope| Ok("".into())).build().unwrap();
        let with = |handle: u32, changed: bool| {
            Rendered::new(
                template.clone(),
                vec![Dynamic::Component(ComponentSlot {
                    handle: Handle(handle),
                    changed,
                })],
            )
            .unwrap()
        };

        assert!(diff(Some(&with(0, false)), &with(0, true)).unwrap().is_empty());
        assert_eq!(diff(Some(&with(0, false)), &with(1, true)).unwrap().slots[&0], SlotPatch::Component(Handle(1)));
    }

    #[test]
    fn test_stream_emits_only_with_flush() {
        let body = TemplateBuilder::new().text("<li>").local("item.id").text("</li>").build().unwrap();
        let template = TemplateBuilder::new().stream("songs", "item", body.clone()).build().unwrap();
        let slot = |flush: Option<crate::engine::StreamFlush>| {
            Rendered::new(
                template.clone(),
                vec![Dynamic::Stream(StreamSlot {
                    body: body.clone(),
                    flush,
                    entries: Vec::new(),
                })],
            )
            .unwrap()
        };

        assert!(diff(Some(&slot(None)), &slot(None)).unwrap().is_empty());

        let flush = crate::engine::StreamFlush {
            name: "songs".into(),
            reference: 0,
            deletes: vec!["songs-1".into()],
            ..Default::default()
        };
        match &diff(Some(&slot(None)), &slot(Some(flush))).unwrap().slots[&0] {
            SlotPatch::Stream(patch) => {
                assert!(patch.statics.is_none());
                assert_eq!(patch.ops.as_ref().unwrap().deletes, vec!["songs-1"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
