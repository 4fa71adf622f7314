//! Components - nested views with their own assigns and diff lifecycle.
//!
//! A component kind implements [`Component`]. Instances are identified by a
//! caller-chosen id and tracked by the view's
//! [`ComponentRegistry`](super::ComponentRegistry) as [`ComponentRecord`]s.
//!
//! # Lifecycle
//!
//! 1. First reference: a handle is allocated, `mount` runs, then `update`
//!    with the props from the call site, then the component renders.
//! 2. Later references: `update` merges the new props. The component only
//!    re-renders when that left something in its assigns changed.
//! 3. A pass that no longer references it tombstones the record; the next
//!    patch reports the handle as removed. A component rendered inside a
//!    stream entry instead lives as long as the client holds that entry.

use std::fmt;
use std::sync::Arc;

use super::stream::StreamKey;
use crate::error::Result;
use crate::renderer::Rendered;
use crate::state::AssignSet;
use crate::template::CompiledTemplate;
use crate::types::{AssignMap, Handle};

// =============================================================================
// Component Trait
// =============================================================================

/// A kind of component.
///
/// Kinds are shared between every view that renders them, so they must be
/// `Send + Sync` and keep per-instance state in the instance's assigns.
pub trait Component: Send + Sync {
    /// Stable kind name. Two kinds with the same name are the same kind.
    fn name(&self) -> &'static str;

    /// Template to render for the current assigns.
    fn render(&self, assigns: &AssignSet) -> Arc<CompiledTemplate>;

    /// Called once when an instance is created, before the first `update`.
    fn mount(&self, _assigns: &mut AssignSet) -> Result<()> {
        Ok(())
    }

    /// Called with the props of every reference. Defaults to an equality-aware merge.
    fn update(&self, props: AssignMap, assigns: &mut AssignSet) -> Result<()> {
        assigns.merge(props);
        Ok(())
    }
}

/// A component that always renders one template from its props.
pub struct TemplateComponent {
    name: &'static str,
    template: Arc<CompiledTemplate>,
}

impl TemplateComponent {
    pub fn new(name: &'static str, template: Arc<CompiledTemplate>) -> Self {
        Self { name, template }
    }
}

impl Component for TemplateComponent {
    fn name(&self) -> &'static str {
        self.name
    }

    fn render(&self, _assigns: &AssignSet) -> Arc<CompiledTemplate> {
        self.template.clone()
    }
}

// =============================================================================
// Component Record
// =============================================================================

/// One mounted component instance.
pub struct ComponentRecord {
    pub(crate) id: String,
    pub(crate) handle: Handle,
    pub(crate) kind: Arc<dyn Component>,
    pub(crate) assigns: AssignSet,
    /// Last tree sent to the client.
    pub(crate) rendered: Option<Rendered>,
    /// Stream entry the component was rendered in, if any.
    pub(crate) owner: Option<StreamKey>,
    /// Tombstone: gone from the view, removal not yet emitted.
    pub(crate) deleted: bool,
}

impl ComponentRecord {
    pub(crate) fn new(
        id: String,
        handle: Handle,
        kind: Arc<dyn Component>,
        assigns: AssignSet,
        owner: Option<StreamKey>,
    ) -> Self {
        Self {
            id,
            handle,
            kind,
            assigns,
            rendered: None,
            owner,
            deleted: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn assigns(&self) -> &AssignSet {
        &self.assigns
    }

    pub fn rendered(&self) -> Option<&Rendered> {
        self.rendered.as_ref()
    }

    pub fn stream_owner(&self) -> Option<&StreamKey> {
        self.owner.as_ref()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Whether the next pass must render this record.
    pub(crate) fn needs_render(&self) -> bool {
        self.rendered.is_none() || self.assigns.has_changes()
    }
}

impl fmt::Debug for ComponentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRecord")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("kind", &self.kind.name())
            .field("rendered", &self.rendered.is_some())
            .field("owner", &self.owner)
            .field("deleted", &self.deleted)
            .finish()
    }
}
