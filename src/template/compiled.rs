//! Compiled Template - static skeleton plus ordered holes.
//!
//! A template is compiled once per source and shared read-only between
//! every view that renders it:
//!
//! ```text
//! statics: ["<p>Hello ", "!</p>"]      (holes + 1 fragments)
//! holes:   [Expression(name)]
//! ```
//!
//! `statics` sits behind an `Arc`; pointer identity of that `Arc` is the fast
//! path for "same template", the fingerprint is the fallback.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::engine::Component;
use crate::error::{LiveError, Result};
use crate::state::{AssignSet, RenderScope};
use crate::types::{AssignMap, AssignPath, Value};

// =============================================================================
// Hole Callbacks
// =============================================================================

/// Evaluates an expression hole.
pub type ExprFn = Arc<dyn Fn(&RenderScope<'_>) -> Result<Value> + Send + Sync>;

/// Picks a branch index of a conditional hole, `None` renders nothing.
pub type BranchFn = Arc<dyn Fn(&RenderScope<'_>) -> Result<Option<usize>> + Send + Sync>;

/// Produces the items a comprehension iterates over.
pub type ItemsFn = Arc<dyn Fn(&RenderScope<'_>) -> Result<Vec<Value>> + Send + Sync>;

/// Produces the call-site id of a component reference.
pub type ComponentIdFn = Arc<dyn Fn(&RenderScope<'_>) -> Result<String> + Send + Sync>;

/// Produces the props handed to a component.
pub type PropsFn = Arc<dyn Fn(&RenderScope<'_>) -> Result<AssignMap> + Send + Sync>;

// =============================================================================
// Tracking
// =============================================================================

/// Which assigns a hole reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tracking {
    /// Re-evaluate only when one of these paths changed.
    Assigns(Vec<AssignPath>),
    /// Re-evaluate on every pass (reads locals or outside state).
    Always,
}

impl Tracking {
    /// Track the given dotted paths.
    pub fn on<I, S>(deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Tracking::Assigns(deps.into_iter().map(|d| AssignPath::parse(d.as_ref())).collect())
    }

    /// Whether a previously rendered value is still valid for `assigns`.
    pub fn is_unchanged(&self, assigns: &AssignSet) -> bool {
        match self {
            Tracking::Assigns(deps) => !assigns.any_changed(deps),
            Tracking::Always => false,
        }
    }

    /// Reads of both: paths are combined, `Always` absorbs everything.
    pub fn union(self, other: Tracking) -> Tracking {
        match (self, other) {
            (Tracking::Assigns(mut a), Tracking::Assigns(b)) => {
                for path in b {
                    if !a.contains(&path) {
                        a.push(path);
                    }
                }
                Tracking::Assigns(a)
            }
            _ => Tracking::Always,
        }
    }
}

// =============================================================================
// Holes
// =============================================================================

/// A substitution point in a compiled template.
#[derive(Clone)]
pub enum Hole {
    /// Produces a scalar.
    Expression { tracking: Tracking, eval: ExprFn },
    /// Nested template chosen among `branches` (conditionals).
    Branch {
        tracking: Tracking,
        choose: BranchFn,
        branches: Vec<Arc<CompiledTemplate>>,
    },
    /// Nested template rendered once per item, diffed by position.
    Comprehension {
        tracking: Tracking,
        items: ItemsFn,
        binding: String,
        body: Arc<CompiledTemplate>,
    },
    /// Nested template rendered once per pending stream insert.
    Stream {
        name: String,
        binding: String,
        body: Arc<CompiledTemplate>,
    },
    /// Reference to a component, rendered by the view's registry.
    Component {
        kind: Arc<dyn Component>,
        id: ComponentIdFn,
        props: PropsFn,
    },
}

impl Hole {
    /// Everything rendering this hole may read, nested templates included.
    ///
    /// Stream and component holes are never skipped: one consumes the pass's
    /// flush, the other re-evaluates props.
    pub fn reads(&self) -> Tracking {
        match self {
            Hole::Expression { tracking, .. } => tracking.clone(),
            Hole::Branch { tracking, branches, .. } => branches
                .iter()
                .fold(tracking.clone(), |reads, branch| reads.union(branch.reads.clone())),
            Hole::Comprehension { tracking, body, .. } => tracking.clone().union(body.reads.clone()),
            Hole::Stream { .. } | Hole::Component { .. } => Tracking::Always,
        }
    }

    fn hash_shape<H: Hasher>(&self, state: &mut H) {
        match self {
            Hole::Expression { .. } => 0u8.hash(state),
            Hole::Branch { branches, .. } => {
                1u8.hash(state);
                for branch in branches {
                    branch.fingerprint.hash(state);
                }
            }
            Hole::Comprehension { body, .. } => {
                2u8.hash(state);
                body.fingerprint.hash(state);
            }
            Hole::Stream { name, body, .. } => {
                3u8.hash(state);
                name.hash(state);
                body.fingerprint.hash(state);
            }
            Hole::Component { kind, .. } => {
                4u8.hash(state);
                kind.name().hash(state);
            }
        }
    }
}

impl fmt::Debug for Hole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hole::Expression { tracking, .. } => f.debug_struct("Expression").field("tracking", tracking).finish(),
            Hole::Branch { tracking, branches, .. } => f
                .debug_struct("Branch")
                .field("tracking", tracking)
                .field("branches", &branches.len())
                .finish(),
            Hole::Comprehension { tracking, binding, body, .. } => f
                .debug_struct("Comprehension")
                .field("tracking", tracking)
                .field("binding", binding)
                .field("body", &format_args!("{:#018x}", body.fingerprint))
                .finish(),
            Hole::Stream { name, binding, .. } => f
                .debug_struct("Stream")
                .field("name", name)
                .field("binding", binding)
                .finish(),
            Hole::Component { kind, .. } => f.debug_struct("Component").field("kind", &kind.name()).finish(),
        }
    }
}

// =============================================================================
// CompiledTemplate
// =============================================================================

/// Immutable template skeleton.
pub struct CompiledTemplate {
    statics: Arc<[String]>,
    holes: Vec<Hole>,
    /// Union of what every hole reads.
    reads: Tracking,
    fingerprint: u64,
}

impl CompiledTemplate {
    /// Assemble a template. `statics` must have exactly one more entry than `holes`.
    pub fn new(statics: Vec<String>, holes: Vec<Hole>) -> Result<Self> {
        if statics.len() != holes.len() + 1 {
            return Err(LiveError::MalformedTemplate {
                statics: statics.len(),
                holes: holes.len(),
            });
        }

        let mut hasher = DefaultHasher::new();
        statics.hash(&mut hasher);
        for hole in &holes {
            hole.hash_shape(&mut hasher);
        }

        let reads = holes
            .iter()
            .fold(Tracking::Assigns(Vec::new()), |reads, hole| reads.union(hole.reads()));

        Ok(Self {
            statics: statics.into(),
            holes,
            reads,
            fingerprint: hasher.finish(),
        })
    }

    pub fn statics(&self) -> &Arc<[String]> {
        &self.statics
    }

    pub fn holes(&self) -> &[Hole] {
        &self.holes
    }

    /// What rendering the whole template may read.
    pub fn reads(&self) -> &Tracking {
        &self.reads
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Whether `other` has the same static skeleton.
    #[inline]
    pub fn same_as(&self, other: &CompiledTemplate) -> bool {
        Arc::ptr_eq(&self.statics, &other.statics) || self.fingerprint == other.fingerprint
    }

    /// Fail unless `dynamics` matches this template's hole count.
    pub fn check_arity(&self, dynamics: usize) -> Result<()> {
        if dynamics == self.holes.len() {
            Ok(())
        } else {
            Err(LiveError::DynamicsArityMismatch {
                fingerprint: self.fingerprint,
                holes: self.holes.len(),
                dynamics,
            })
        }
    }
}

impl fmt::Debug for CompiledTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledTemplate")
            .field("fingerprint", &format_args!("{:#018x}", self.fingerprint))
            .field("statics", &self.statics)
            .field("holes", &self.holes)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn expr() -> Hole {
        Hole::Expression {
            tracking: Tracking::on(["name"]),
            eval: Arc::new(|scope: &RenderScope<'_>| scope.get("name").cloned()),
        }
    }

    #[test]
    fn test_statics_must_interleave() {
        let err = CompiledTemplate::new(vec!["a".into()], vec![expr()]).unwrap_err();
        assert_eq!(err, LiveError::MalformedTemplate { statics: 1, holes: 1 });

        let ok = CompiledTemplate::new(vec!["Hello ".into(), "".into()], vec![expr()]).unwrap();
        assert_eq!(ok.holes().len(), 1);
        assert_eq!(ok.statics().len(), 2);
    }

    #[test]
    fn test_fingerprint_is_content_based() {
        let a = CompiledTemplate::new(vec!["x".into(), "y".into()], vec![expr()]).unwrap();
        let b = CompiledTemplate::new(vec!["x".into(), "y".into()], vec![expr()]).unwrap();
        let c = CompiledTemplate::new(vec!["x".into(), "z".into()], vec![expr()]).unwrap();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
    }

    #[test]
    fn test_check_arity() {
        let template = CompiledTemplate::new(vec!["".into(), "".into()], vec![expr()]).unwrap();
        assert!(template.check_arity(1).is_ok());
        let err = template.check_arity(2).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_tracking() {
        let mut assigns = AssignSet::new();
        assigns.set("name", json!("A"));
        assigns.set("other", json!(1));
        assigns.reset_changed();

        let tracking = Tracking::on(["name"]);
        assigns.set("other", json!(2));
        assert!(tracking.is_unchanged(&assigns));
        assigns.set("name", json!("B"));
        assert!(!tracking.is_unchanged(&assigns));
        assert!(!Tracking::Always.is_unchanged(&assigns));
    }

    #[test]
    fn test_reads_cover_nested_templates() {
        use crate::template::TemplateBuilder;

        let row = TemplateBuilder::new().local("item").assign("title").build().unwrap();
        let list = TemplateBuilder::new().each_assign("items", "item", row).build().unwrap();
        assert_eq!(
            list.reads(),
            &Tracking::on(["items", "item", "title"]),
            "body reads are folded into the comprehension"
        );

        let untracked = TemplateBuilder::new()
            .untracked(|_scope: &RenderScope<'_>| Ok(json!(1)))
            .build()
            .unwrap();
        let outer = TemplateBuilder::new()
            .show(["flag"], |_scope: &RenderScope<'_>| Ok(true), untracked)
            .build()
            .unwrap();
        assert_eq!(outer.reads(), &Tracking::Always);
    }
}
