//! Rendered Tree construction.
//!
//! Walks a template's holes against a [`RenderScope`]. With a previous tree
//! of the same template, holes whose tracked assigns did not change reuse
//! the previous content instead of re-evaluating:
//!
//! ```text
//! Expression   unchanged deps → previous scalar      else evaluate
//! Branch       unchanged deps → previous choice      else choose; same choice recurses
//!                                                    into the previous branch tree
//! Comprehension unchanged deps and body reads
//!                             → previous entries     else render every item fresh
//! Stream       always: render the pending inserts of this pass
//! Component    always: hand id + props to the registry
//! ```
//!
//! Skipping is only an optimization: with `change_tracking` off every hole
//! is evaluated and the resulting patches are the same.

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use tracing::{trace, warn};

use super::tree::{Comprehension, ComponentSlot, Dynamic, Rendered, StreamSlot};
use crate::config::LiveConfig;
use crate::engine::{ComponentRegistry, StreamFlush, StreamKey};
use crate::error::{LiveError, Result};
use crate::state::RenderScope;
use crate::template::{CompiledTemplate, Hole};
use crate::types::{Value, to_safe_string};

/// Name of the local holding a stream entry's key inside a stream body.
pub const DOM_ID_LOCAL: &str = "dom_id";

/// Everything a render pass writes to besides the tree itself.
pub struct RenderContext<'r> {
    pub(crate) components: &'r mut ComponentRegistry,
    /// Prepared flushes; a stream hole takes its stream's flush out.
    pub(crate) streams: &'r mut HashMap<String, StreamFlush>,
    /// Component-scoped failures. The pass keeps going.
    pub(crate) errors: &'r mut Vec<LiveError>,
    pub(crate) config: &'r LiveConfig,
    /// Stream entry being rendered. Components referenced here belong to it.
    owner: Option<StreamKey>,
}

impl<'r> RenderContext<'r> {
    pub fn new(
        components: &'r mut ComponentRegistry,
        streams: &'r mut HashMap<String, StreamFlush>,
        errors: &'r mut Vec<LiveError>,
        config: &'r LiveConfig,
    ) -> Self {
        Self {
            components,
            streams,
            errors,
            config,
            owner: None,
        }
    }
}

/// Render `template` against `scope`.
///
/// `previous` is only used when it was rendered from the same template.
///
/// # Arguments
///
/// * `template` - Template to fill
/// * `scope` - Assigns plus local bindings
/// * `previous` - Tree sent to the client last time for this position
/// * `ctx` - Component registry, stream flushes and error sink
pub fn render_template(
    template: &Arc<CompiledTemplate>,
    scope: &RenderScope<'_>,
    previous: Option<&Rendered>,
    ctx: &mut RenderContext<'_>,
) -> Result<Rendered> {
    let previous = match previous {
        Some(prev) if prev.template().same_as(template) => {
            template.check_arity(prev.dynamics().len())?;
            Some(prev)
        }
        _ => None,
    };

    let mut dynamics = Vec::with_capacity(template.holes().len());
    for (index, hole) in template.holes().iter().enumerate() {
        let prev = previous.map(|p| &p.dynamics()[index]);
        dynamics.push(render_hole(hole, scope, prev, ctx)?);
    }

    Rendered::new(template.clone(), dynamics)
}

fn render_hole(
    hole: &Hole,
    scope: &RenderScope<'_>,
    previous: Option<&Dynamic>,
    ctx: &mut RenderContext<'_>,
) -> Result<Dynamic> {
    let tracking_enabled = ctx.config.change_tracking;

    match hole {
        Hole::Expression { tracking, eval } => {
            if let Some(Dynamic::Scalar(prev)) = previous {
                if tracking_enabled && tracking.is_unchanged(scope.assigns()) {
                    trace!("expression reused");
                    return Ok(Dynamic::Scalar(prev.clone()));
                }
            }
            let value = eval(scope)?;
            Ok(Dynamic::Scalar(to_safe_string(&value, ctx.config.escape_html)))
        }

        Hole::Branch {
            tracking,
            choose,
            branches,
        } => {
            let prev = match previous {
                Some(Dynamic::Branch { branch, tree }) => Some((*branch, tree.as_deref())),
                _ => None,
            };

            let branch = match prev {
                Some((branch, _)) if tracking_enabled && tracking.is_unchanged(scope.assigns()) => branch,
                _ => choose(scope)?,
            };

            let tree = match branch {
                Some(index) => {
                    let body = branches.get(index).ok_or_else(|| {
                        LiveError::Expression(format!("branch {index} chosen but only {} exist", branches.len()))
                    })?;
                    let prev_tree = prev.filter(|(b, _)| *b == branch).and_then(|(_, tree)| tree);
                    Some(Box::new(render_template(body, scope, prev_tree, ctx)?))
                }
                None => None,
            };
            Ok(Dynamic::Branch { branch, tree })
        }

        Hole::Comprehension {
            tracking,
            items,
            binding,
            body,
        } => {
            if let Some(Dynamic::Comprehension(prev)) = previous {
                let assigns = scope.assigns();
                if tracking_enabled
                    && prev.body.same_as(body)
                    && tracking.is_unchanged(assigns)
                    && body.reads().is_unchanged(assigns)
                {
                    trace!(entries = prev.entries.len(), "comprehension reused");
                    for entry in prev.entries.iter() {
                        ctx.components.touch_tree(entry);
                    }
                    return Ok(Dynamic::Comprehension(prev.clone()));
                }
            }

            let items = items(scope)?;
            let mut entries = Vec::with_capacity(items.len());
            for item in items {
                let child = scope.with_local(binding.clone(), item);
                entries.push(render_template(body, &child, None, ctx)?);
            }
            Ok(Dynamic::Comprehension(Comprehension {
                body: body.clone(),
                entries: Arc::new(entries),
            }))
        }

        Hole::Stream { name, binding, body } => {
            let mut flush = ctx.streams.remove(name);
            let mut entries = Vec::new();

            if let Some(flush) = flush.as_mut() {
                let outer = ctx.owner.take();
                let rendered = render_stream_entries(flush, scope, binding, body, ctx);
                ctx.owner = outer;
                entries = rendered?;
            }

            Ok(Dynamic::Stream(StreamSlot {
                body: body.clone(),
                flush,
                entries,
            }))
        }

        Hole::Component { kind, id, props } => {
            let referenced = id(scope).and_then(|id| {
                let props = props(scope)?;
                ctx.components.render_component(&id, kind, props, ctx.owner.as_ref())
            });

            match referenced {
                Ok((handle, changed)) => Ok(Dynamic::Component(ComponentSlot { handle, changed })),
                Err(err) if err.is_fatal() => Err(err),
                Err(err) => {
                    warn!(kind = kind.name(), %err, "component reference failed");
                    ctx.errors.push(err);
                    Ok(Dynamic::Scalar(String::new()))
                }
            }
        }
    }
}

/// Render the stream body once per insert. Items are moved out of the flush.
///
/// Each entry becomes the owner of the components it references.
fn render_stream_entries(
    flush: &mut StreamFlush,
    scope: &RenderScope<'_>,
    binding: &str,
    body: &Arc<CompiledTemplate>,
    ctx: &mut RenderContext<'_>,
) -> Result<Vec<Rendered>> {
    let mut entries = Vec::with_capacity(flush.inserts.len());
    for insert in &mut flush.inserts {
        let item = mem::take(&mut insert.item);
        let key = StreamKey::new(&flush.name, &insert.dom_id);
        ctx.components.mark_stream_entry(&key);
        ctx.owner = Some(key);

        let child = scope
            .with_local(binding, item)
            .with_local(DOM_ID_LOCAL, Value::String(insert.dom_id.clone()));
        entries.push(render_template(body, &child, None, ctx)?);
    }
    Ok(entries)
}

// =============================================================================
// Tests
// =============================================================================
