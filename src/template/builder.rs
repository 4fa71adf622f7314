//! Template builder - assembles a [`CompiledTemplate`] from code.
//!
//! Template syntax parsing lives outside this crate; whatever parser a host
//! uses ends up describing the same static/hole shape through this builder.
//!
//! ```ignore
//! let greeting = TemplateBuilder::new()
//!     .text("Hello ")
//!     .assign("name")
//!     .build()?;
//! ```

use std::mem;
use std::sync::Arc;

use super::compiled::{CompiledTemplate, Hole, Tracking};
use crate::engine::Component;
use crate::error::{LiveError, Result};
use crate::state::RenderScope;
use crate::types::{AssignMap, AssignPath, Value};

/// Fluent builder interleaving static text and holes.
#[derive(Debug, Default)]
pub struct TemplateBuilder {
    statics: Vec<String>,
    holes: Vec<Hole>,
    current: String,
}

impl TemplateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append static text.
    pub fn text(mut self, text: &str) -> Self {
        self.current.push_str(text);
        self
    }

    /// Append a raw hole.
    pub fn hole(mut self, hole: Hole) -> Self {
        self.statics.push(mem::take(&mut self.current));
        self.holes.push(hole);
        self
    }

    /// Expression reading one assign path, tracked on that path.
    pub fn assign(self, path: &str) -> Self {
        let path = AssignPath::parse(path);
        let tracking = Tracking::Assigns(vec![path.clone()]);
        self.hole(Hole::Expression {
            tracking,
            eval: Arc::new(move |scope: &RenderScope<'_>| scope.path(&path).cloned()),
        })
    }

    /// Expression reading a local binding (or assign) path.
    ///
    /// Tracked on the path like an assign read. Locals are only bound inside
    /// comprehension and stream entries, which render without a previous tree.
    pub fn local(self, path: &str) -> Self {
        let path = AssignPath::parse(path);
        let tracking = Tracking::Assigns(vec![path.clone()]);
        self.hole(Hole::Expression {
            tracking,
            eval: Arc::new(move |scope: &RenderScope<'_>| scope.path(&path).cloned()),
        })
    }

    /// Expression tracked on `deps`.
    pub fn expr<I, S, F>(self, deps: I, eval: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: Fn(&RenderScope<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        self.hole(Hole::Expression {
            tracking: Tracking::on(deps),
            eval: Arc::new(eval),
        })
    }

    /// Expression evaluated on every pass.
    pub fn untracked<F>(self, eval: F) -> Self
    where
        F: Fn(&RenderScope<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        self.hole(Hole::Expression {
            tracking: Tracking::Always,
            eval: Arc::new(eval),
        })
    }

    /// Conditional with a single branch.
    pub fn show<I, S, F>(self, deps: I, condition: F, then: Arc<CompiledTemplate>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: Fn(&RenderScope<'_>) -> Result<bool> + Send + Sync + 'static,
    {
        self.hole(Hole::Branch {
            tracking: Tracking::on(deps),
            choose: Arc::new(move |scope: &RenderScope<'_>| Ok(condition(scope)?.then_some(0))),
            branches: vec![then],
        })
    }

    /// Conditional picking one of several branches.
    pub fn branch<I, S, F>(self, deps: I, choose: F, branches: Vec<Arc<CompiledTemplate>>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: Fn(&RenderScope<'_>) -> Result<Option<usize>> + Send + Sync + 'static,
    {
        self.hole(Hole::Branch {
            tracking: Tracking::on(deps),
            choose: Arc::new(choose),
            branches,
        })
    }

    /// Comprehension over items computed from `deps`.
    pub fn each<I, S, F>(self, deps: I, items: F, binding: &str, body: Arc<CompiledTemplate>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: Fn(&RenderScope<'_>) -> Result<Vec<Value>> + Send + Sync + 'static,
    {
        self.hole(Hole::Comprehension {
            tracking: Tracking::on(deps),
            items: Arc::new(items),
            binding: binding.to_string(),
            body,
        })
    }

    /// Comprehension over an array assign.
    pub fn each_assign(self, list: &str, binding: &str, body: Arc<CompiledTemplate>) -> Self {
        let list_name = list.to_string();
        self.each(
            [list],
            move |scope: &RenderScope<'_>| match scope.get(&list_name)? {
                Value::Array(items) => Ok(items.clone()),
                Value::Null => Ok(Vec::new()),
                _ => Err(LiveError::Expression(format!("`{list_name}` is not a list"))),
            },
            binding,
            body,
        )
    }

    /// Stream body, rendered for the stream's pending inserts.
    ///
    /// Inside `body`, `binding` is the item and `dom_id` its stream key.
    pub fn stream(self, name: &str, binding: &str, body: Arc<CompiledTemplate>) -> Self {
        self.hole(Hole::Stream {
            name: name.to_string(),
            binding: binding.to_string(),
            body,
        })
    }

    /// Component reference.
    pub fn component<IdF, PropsF>(self, kind: Arc<dyn Component>, id: IdF, props: PropsF) -> Self
    where
        IdF: Fn(&RenderScope<'_>) -> Result<String> + Send + Sync + 'static,
        PropsF: Fn(&RenderScope<'_>) -> Result<AssignMap> + Send + Sync + 'static,
    {
        self.hole(Hole::Component {
            kind,
            id: Arc::new(id),
            props: Arc::new(props),
        })
    }

    /// Finish the template.
    pub fn build(mut self) -> Result<Arc<CompiledTemplate>> {
        self.statics.push(self.current);
        CompiledTemplate::new(self.statics, self.holes).map(Arc::new)
    }
}
