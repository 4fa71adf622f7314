//! Rendered Tree - one render pass worth of filled holes.
//!
//! A [`Rendered`] keeps a reference to its template (statics are shared,
//! never copied) and one [`Dynamic`] per hole. The view keeps exactly one
//! generation around: the tree last sent to the client.

use std::collections::HashSet;
use std::sync::Arc;

use crate::engine::{ComponentRegistry, StreamFlush};
use crate::error::Result;
use crate::template::CompiledTemplate;
use crate::types::Handle;

// =============================================================================
// Dynamics
// =============================================================================

/// Rendered content of one hole.
#[derive(Debug, Clone)]
pub enum Dynamic {
    /// HTML-safe string.
    Scalar(String),
    /// Conditional: the chosen branch and its tree, `None` when nothing rendered.
    Branch {
        branch: Option<usize>,
        tree: Option<Box<Rendered>>,
    },
    /// Positional loop result.
    Comprehension(Comprehension),
    /// Stream body rendered for this pass's inserts.
    Stream(StreamSlot),
    /// Marker for a component rendered by the registry.
    Component(ComponentSlot),
}

/// Entries of a comprehension.
///
/// Entries are behind an `Arc` so an unchanged comprehension is carried into
/// the next tree without copying, and the diff can skip it by pointer.
#[derive(Debug, Clone)]
pub struct Comprehension {
    pub body: Arc<CompiledTemplate>,
    pub entries: Arc<Vec<Rendered>>,
}

/// A stream hole. Only holds what is sent in this pass.
#[derive(Debug, Clone)]
pub struct StreamSlot {
    pub body: Arc<CompiledTemplate>,
    pub flush: Option<StreamFlush>,
    /// One tree per entry of `flush.inserts`.
    pub entries: Vec<Rendered>,
}

/// A component reference. The parent never inlines the component's dynamics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentSlot {
    pub handle: Handle,
    /// Whether the component re-renders in this pass.
    pub changed: bool,
}

// =============================================================================
// Rendered
// =============================================================================

/// Snapshot of a template rendered against an assign set.
#[derive(Debug, Clone)]
pub struct Rendered {
    template: Arc<CompiledTemplate>,
    dynamics: Vec<Dynamic>,
}

impl Rendered {
    /// Wrap dynamics, checking they match the template's holes.
    pub fn new(template: Arc<CompiledTemplate>, dynamics: Vec<Dynamic>) -> Result<Self> {
        template.check_arity(dynamics.len())?;
        Ok(Self { template, dynamics })
    }

    pub fn template(&self) -> &Arc<CompiledTemplate> {
        &self.template
    }

    pub fn dynamics(&self) -> &[Dynamic] {
        &self.dynamics
    }

    /// Re-check arity against the template. A failure is a cache consistency bug.
    pub fn check_arity(&self) -> Result<()> {
        self.template.check_arity(self.dynamics.len())
    }

    /// Push the handle of every component slot in this tree onto `out`.
    ///
    /// Stops at component slots: a component's own tree is not part of its parent's.
    pub(crate) fn collect_components(&self, out: &mut Vec<Handle>) {
        for dynamic in &self.dynamics {
            match dynamic {
                Dynamic::Component(slot) => out.push(slot.handle),
                Dynamic::Branch { tree: Some(tree), .. } => tree.collect_components(out),
                Dynamic::Comprehension(comprehension) => {
                    for entry in comprehension.entries.iter() {
                        entry.collect_components(out);
                    }
                }
                Dynamic::Stream(stream) => {
                    for entry in &stream.entries {
                        entry.collect_components(out);
                    }
                }
                _ => {}
            }
        }
    }

    fn references_any(&self, handles: &HashSet<Handle>) -> bool {
        let mut found = Vec::new();
        self.collect_components(&mut found);
        found.iter().any(|handle| handles.contains(handle))
    }

    /// Turn slots pointing at `handles` into empty scalars.
    pub(crate) fn blank_components(&mut self, handles: &HashSet<Handle>) {
        for dynamic in &mut self.dynamics {
            let blank = matches!(dynamic, Dynamic::Component(slot) if handles.contains(&slot.handle));
            if blank {
                *dynamic = Dynamic::Scalar(String::new());
                continue;
            }
            match dynamic {
                Dynamic::Branch { tree: Some(tree), .. } => tree.blank_components(handles),
                Dynamic::Comprehension(comprehension) => {
                    // Entries may be shared with the previous tree.
                    if comprehension.entries.iter().any(|entry| entry.references_any(handles)) {
                        for entry in Arc::make_mut(&mut comprehension.entries) {
                            entry.blank_components(handles);
                        }
                    }
                }
                Dynamic::Stream(stream) => {
                    for entry in &mut stream.entries {
                        entry.blank_components(handles);
                    }
                }
                _ => {}
            }
        }
    }

    // =========================================================================
    // HTML
    // =========================================================================

    /// Materialize the tree, components inlined, as one HTML string.
    pub fn to_html(&self, components: &ComponentRegistry) -> String {
        let mut out = String::new();
        self.write_html(components, &mut out);
        out
    }

    fn write_html(&self, components: &ComponentRegistry, out: &mut String) {
        let statics = self.template.statics();
        for (index, fragment) in statics.iter().enumerate() {
            out.push_str(fragment);
            if let Some(dynamic) = self.dynamics.get(index) {
                write_dynamic(dynamic, components, out);
            }
        }
    }
}

fn write_dynamic(dynamic: &Dynamic, components: &ComponentRegistry, out: &mut String) {
    match dynamic {
        Dynamic::Scalar(value) => out.push_str(value),
        Dynamic::Branch { tree, .. } => {
            if let Some(tree) = tree {
                tree.write_html(components, out);
            }
        }
        Dynamic::Comprehension(comprehension) => {
            for entry in comprehension.entries.iter() {
                entry.write_html(components, out);
            }
        }
        Dynamic::Stream(stream) => {
            for entry in &stream.entries {
                entry.write_html(components, out);
            }
        }
        Dynamic::Component(slot) => {
            if let Some(tree) = components.rendered(slot.handle) {
                tree.write_html(components, out);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateBuilder;

    #[test]
    fn test_new_checks_arity() {
        let template = TemplateBuilder::new().text("a").assign("x").text("b").build().unwrap();
        assert!(Rendered::new(template.clone(), vec![Dynamic::Scalar("1".into())]).is_ok());

        let err = Rendered::new(template, Vec::new()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_to_html() {
        let inner = TemplateBuilder::new().text("<b>").assign("x").text("</b>").build().unwrap();
        let outer = TemplateBuilder::new()
            .text("<p>")
            .assign("a")
            .show(["flag"], |_scope| Ok(true), inner.clone())
            .text("</p>")
            .build()
            .unwrap();

        let tree = Rendered::new(
            outer,
            vec![
                Dynamic::Scalar("hi ".into()),
                Dynamic::Branch {
                    branch: Some(0),
                    tree: Some(Box::new(Rendered::new(inner, vec![Dynamic::Scalar("x".into())]).unwrap())),
                },
            ],
        )
        .unwrap();

        assert_eq!(tree.to_html(&ComponentRegistry::new()), "<p>hi <b>x</b></p>");
    }

    #[test]
    fn test_blank_components() {
        let row = TemplateBuilder::new().text("<li>").assign("x").text("</li>").build().unwrap();
        let template = TemplateBuilder::new()
            .text("<ul>")
            .assign("a")
            .each_assign("rows", "row", row.clone())
            .text("</ul>")
            .build()
            .unwrap();
        let slot = |handle: u32| {
            Dynamic::Component(ComponentSlot {
                handle: Handle(handle),
                changed: true,
            })
        };
        let entries = Arc::new(vec![
            Rendered::new(row.clone(), vec![slot(1)]).unwrap(),
            Rendered::new(row.clone(), vec![slot(2)]).unwrap(),
        ]);
        let mut tree = Rendered::new(
            template,
            vec![
                slot(0),
                Dynamic::Comprehension(Comprehension {
                    body: row,
                    entries: entries.clone(),
                }),
            ],
        )
        .unwrap();

        let mut handles = Vec::new();
        tree.collect_components(&mut handles);
        assert_eq!(handles, vec![Handle(0), Handle(1), Handle(2)]);

        tree.blank_components(&HashSet::from([Handle(0), Handle(2)]));
        let mut handles = Vec::new();
        tree.collect_components(&mut handles);
        assert_eq!(handles, vec![Handle(1)]);
        assert!(matches!(&tree.dynamics()[0], Dynamic::Scalar(s) if s.is_empty()));

        // The shared entries of the previous tree are left alone.
        let mut before = Vec::new();
        entries[1].collect_components(&mut before);
        assert_eq!(before, vec![Handle(2)]);
    }
}
