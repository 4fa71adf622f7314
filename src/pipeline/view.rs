//! Live View - one view's state and its render pass.
//!
//! A [`LiveView`] exclusively owns everything one view needs: its assigns,
//! component arena, streams, queued events and the tree last sent to the
//! client. The surrounding runtime mutates state, then calls
//! [`LiveView::render`] once per event:
//!
//! ```text
//! assign / stream_insert / push_event ...
//!         │
//!         ▼
//! render() ─► root tree ─► queued components ─► diff ─► garbage collection
//!         │
//!         ▼
//! LivePatch {root, "c": components, "cr": removed, "e": events}
//! ```
//!
//! # Example
//!
//! ```ignore
//! let mut view = LiveView::new(template);
//! view.assign("name", json!("A"));
//! let first = view.render()?;      // full tree, statics included
//! view.assign("name", json!("B"));
//! let next = view.render()?;       // {"0": "B"}
//! ```

use std::collections::{BTreeMap, HashMap};
use std::mem;
use std::sync::Arc;

use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};
use tracing::{debug, instrument, warn};

use super::events::PushEvent;
use crate::config::LiveConfig;
use crate::engine::{Component, ComponentRegistry, DomIdFn, StreamFlush, StreamOp, StreamStore};
use crate::error::{LiveError, Result};
use crate::renderer::{Patch, RenderContext, Rendered, diff, render_template};
use crate::state::{AssignSet, RenderScope};
use crate::template::CompiledTemplate;
use crate::types::{AssignMap, Dirty, Handle, Value};

// =============================================================================
// Patch + Outcome
// =============================================================================

/// Everything one render pass sends to the client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LivePatch {
    pub root: Patch,
    /// Component patches keyed by handle.
    pub components: BTreeMap<Handle, Patch>,
    /// Handles of components gone from the view.
    pub removed: Vec<Handle>,
    pub events: Vec<PushEvent>,
}

impl LivePatch {
    pub fn is_empty(&self) -> bool {
        self.root.is_empty() && self.components.is_empty() && self.removed.is_empty() && self.events.is_empty()
    }

    /// Patch of one component, if it changed.
    pub fn component(&self, handle: Handle) -> Option<&Patch> {
        self.components.get(&handle)
    }

    /// Serialize to the JSON wire shape.
    pub fn to_json(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|err| LiveError::Encode(err.to_string()))
    }
}

impl Serialize for LivePatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        self.root.serialize_entries(&mut map)?;
        if !self.components.is_empty() {
            map.serialize_entry("c", &self.components)?;
        }
        if !self.removed.is_empty() {
            map.serialize_entry("cr", &self.removed)?;
        }
        if !self.events.is_empty() {
            map.serialize_entry("e", &self.events)?;
        }
        map.end()
    }
}

/// Result of a render pass.
#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub patch: LivePatch,
    /// First render of the view: the root patch is the full tree.
    pub full: bool,
    /// Component-scoped failures. Failed components kept their previous output.
    pub errors: Vec<LiveError>,
}

// =============================================================================
// LiveView
// =============================================================================

/// One live view.
pub struct LiveView {
    root: Arc<CompiledTemplate>,
    assigns: AssignSet,
    components: ComponentRegistry,
    streams: StreamStore,
    events: Vec<PushEvent>,
    /// Tree last sent to the client. One generation only.
    previous: Option<Rendered>,
    config: LiveConfig,
    dirty: Dirty,
}

impl LiveView {
    pub fn new(root: Arc<CompiledTemplate>) -> Self {
        Self::with_config(root, LiveConfig::default())
    }

    pub fn with_config(root: Arc<CompiledTemplate>, config: LiveConfig) -> Self {
        Self {
            root,
            assigns: AssignSet::new(),
            components: ComponentRegistry::with_config(&config),
            streams: StreamStore::new(),
            events: Vec::new(),
            previous: None,
            config,
            dirty: Dirty::NONE,
        }
    }

    // =========================================================================
    // Assigns
    // =========================================================================

    pub fn assigns(&self) -> &AssignSet {
        &self.assigns
    }

    /// Direct access to the change tracker. Marks assigns dirty.
    pub fn assigns_mut(&mut self) -> &mut AssignSet {
        self.dirty |= Dirty::ASSIGNS;
        &mut self.assigns
    }

    pub fn assign(&mut self, name: impl Into<String>, value: Value) {
        self.assigns_mut().set(name, value);
    }

    pub fn assign_many<K, I>(&mut self, entries: I)
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        self.assigns_mut().set_many(entries);
    }

    // =========================================================================
    // Components
    // =========================================================================

    /// Mount a component outside the template.
    ///
    /// The mount counts as a reference for the next render only. Unless a
    /// template references it, the pass after that removes it again.
    pub fn mount_component(&mut self, id: &str, kind: Arc<dyn Component>, initial: AssignMap) -> Result<Handle> {
        let (handle, _) = self.components.render_component(id, &kind, initial, None)?;
        self.dirty |= Dirty::COMPONENTS;
        Ok(handle)
    }

    /// Remove a component. Its handle is reported in the next patch.
    pub fn unmount_component(&mut self, id: &str) -> Result<Handle> {
        let handle = self.components.unmount(id)?;
        self.dirty |= Dirty::COMPONENTS;
        Ok(handle)
    }

    /// Merge assigns into a mounted component.
    pub fn send_update(&mut self, id: &str, assigns: AssignMap) -> Result<Handle> {
        let handle = self.components.send_update(id, assigns)?;
        self.dirty |= Dirty::COMPONENTS;
        Ok(handle)
    }

    pub fn components(&self) -> &ComponentRegistry {
        &self.components
    }

    // =========================================================================
    // Streams
    // =========================================================================

    pub fn stream_configure(&mut self, name: &str, dom_id: DomIdFn) {
        self.streams.configure(name, dom_id);
    }

    /// Queue a stream operation for the next render.
    pub fn stream_operation(&mut self, name: &str, op: StreamOp) -> Result<()> {
        self.streams.apply(name, op)?;
        self.dirty |= Dirty::STREAMS;
        Ok(())
    }

    /// Append an item to a stream.
    pub fn stream_insert(&mut self, name: &str, item: Value) -> Result<()> {
        self.stream_operation(name, StreamOp::insert(item))
    }

    pub fn streams(&self) -> &StreamStore {
        &self.streams
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Queue a client event for the next patch.
    pub fn push_event(&mut self, name: impl Into<String>, payload: Value) {
        self.events.push(PushEvent::new(name, payload));
        self.dirty |= Dirty::EVENTS;
    }

    // =========================================================================
    // Render Pass
    // =========================================================================

    /// Whether a render would have anything to do.
    pub fn needs_render(&self) -> bool {
        self.previous.is_none() || !self.dirty.is_empty() || self.components.has_queued()
    }

    pub fn dirty(&self) -> Dirty {
        self.dirty
    }

    /// The tree last sent to the client.
    pub fn rendered(&self) -> Option<&Rendered> {
        self.previous.as_ref()
    }

    /// Render the view and diff it against the last emitted tree.
    ///
    /// A root failure returns `Err` and leaves assigns, components, stream
    /// queues and the previous tree as they were. Component failures land in
    /// [`RenderOutcome::errors`].
    #[instrument(skip(self), fields(dirty = ?self.dirty, first = self.previous.is_none()))]
    pub fn render(&mut self) -> Result<RenderOutcome> {
        let (mut flushes, mut commit) = self.streams.prepare_all();
        let mut errors = Vec::new();
        self.components.begin_pass();

        let (root, root_patch, mut components) = match self.render_trees(&mut flushes, &mut errors) {
            Ok(rendered) => rendered,
            Err(err) => {
                self.components.rollback();
                debug!(%err, "render pass failed");
                return Err(err);
            }
        };

        for name in flushes.keys() {
            warn!(stream = %name, "no rendered hole consumed the stream, operations stay queued");
            commit.skip(name);
        }
        self.streams.commit(commit);

        let streams = &self.streams;
        self.components
            .collect_garbage(|key| streams.holds(&key.stream, &key.dom_id));
        let removed = self.components.take_removed();
        components.retain(|handle, _| !removed.contains(handle));

        self.assigns.reset_changed();
        let full = self.previous.is_none();
        self.previous = Some(root);
        self.components.commit_emitted();
        self.dirty = Dirty::NONE;

        let patch = LivePatch {
            root: root_patch,
            components,
            removed,
            events: mem::take(&mut self.events),
        };
        debug!(
            full,
            root_slots = patch.root.len(),
            components = patch.components.len(),
            removed = patch.removed.len(),
            errors = errors.len(),
            "render pass complete"
        );

        Ok(RenderOutcome { patch, full, errors })
    }

    /// Root tree, component trees and the root patch. Nothing is committed.
    fn render_trees(
        &mut self,
        flushes: &mut HashMap<String, StreamFlush>,
        errors: &mut Vec<LiveError>,
    ) -> Result<(Rendered, Patch, BTreeMap<Handle, Patch>)> {
        let mut root = {
            let scope = RenderScope::new(&self.assigns);
            let mut ctx = RenderContext::new(&mut self.components, flushes, errors, &self.config);
            render_template(&self.root, &scope, self.previous.as_ref(), &mut ctx)?
        };

        let components = self.components.render_pending(flushes, errors, &self.config)?;
        self.components.blank_failed(&mut root);
        let root_patch = diff(self.previous.as_ref(), &root)?;
        Ok((root, root_patch, components))
    }

    /// HTML of the last rendered tree, components inlined.
    pub fn to_html(&self) -> Option<String> {
        self.previous.as_ref().map(|tree| tree.to_html(&self.components))
    }

    /// Tear the view down: every component is removed, streams and the
    /// previous tree are dropped. Returns the removed handles.
    pub fn teardown(&mut self) -> Vec<Handle> {
        self.components.unmount_all();
        let removed = self.components.take_removed();
        self.components.commit_emitted();
        self.streams.clear();
        self.events.clear();
        self.previous = None;
        self.dirty = Dirty::NONE;
        debug!(removed = removed.len(), "view torn down");
        removed
    }
}

impl std::fmt::Debug for LiveView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveView")
            .field("root", &format_args!("{:#018x}", self.root.fingerprint()))
            .field("assigns", &self.assigns.len())
            .field("components", &self.components.live_count())
            .field("streams", &self.streams)
            .field("dirty", &self.dirty)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TemplateComponent;
    use crate::renderer::SlotPatch;
    use crate::template::TemplateBuilder;
    use serde_json::json;

    fn hello() -> LiveView {
        let template = TemplateBuilder::new().text("Hello ").assign("name").build().unwrap();
        let mut view = LiveView::new(template);
        view.assign("name", json!("A"));
        view
    }

    #[test]
    fn test_first_render_is_full() {
        let mut view = hello();
        let outcome = view.render().unwrap();
        assert!(outcome.full);
        assert_eq!(outcome.patch.to_json().unwrap(), json!({"0": "A", "s": ["Hello ", ""]}));
        assert_eq!(view.to_html().as_deref(), Some("Hello A"));
    }

    #[test]
    fn test_unchanged_render_is_empty() {
        let mut view = hello();
        view.render().unwrap();
        assert!(!view.needs_render());

        let outcome = view.render().unwrap();
        assert!(!outcome.full);
        assert!(outcome.patch.is_empty());
    }

    #[test]
    fn test_dirty_flags() {
        let mut view = hello();
        view.render().unwrap();

        view.assign("name", json!("B"));
        view.push_event("ping", json!(null));
        assert_eq!(view.dirty(), Dirty::ASSIGNS | Dirty::EVENTS);

        let outcome = view.render().unwrap();
        assert_eq!(outcome.patch.root.get(0), Some(&SlotPatch::Scalar("B".into())));
        assert_eq!(outcome.patch.events, vec![PushEvent::new("ping", json!(null))]);
        assert_eq!(view.dirty(), Dirty::NONE);
    }

    #[test]
    fn test_root_failure_keeps_state() {
        let template = TemplateBuilder::new().assign("a").assign("b").build().unwrap();
        let mut view = LiveView::new(template);
        view.assign("a", json!(1));

        let err = view.render().unwrap_err();
        assert_eq!(err, LiveError::MissingAssign { name: "b".into() });
        assert!(view.assigns().is_changed("a"));
        assert!(view.rendered().is_none());

        view.assign("b", json!(2));
        assert!(view.render().unwrap().full);
    }

    #[test]
    fn test_mounted_component_removed_when_omitted() {
        let card = TemplateBuilder::new().text("<p>").assign("title").text("</p>").build().unwrap();
        let kind: Arc<dyn Component> = Arc::new(TemplateComponent::new("card", card));
        let mut view = hello();

        let handle = view
            .mount_component("chris", kind, AssignMap::from_iter([("title".to_string(), json!("T"))]))
            .unwrap();
        let outcome = view.render().unwrap();
        assert!(outcome.patch.component(handle).is_some());

        let outcome = view.render().unwrap();
        assert_eq!(outcome.patch.removed, vec![handle]);
        assert!(!view.components().contains("chris"));
    }

    #[test]
    fn test_root_failure_rolls_back_components() {
        let card = TemplateBuilder::new().text("<p>").assign("title").text("</p>").build().unwrap();
        let kind: Arc<dyn Component> = Arc::new(TemplateComponent::new("card", card));
        let template = TemplateBuilder::new()
            .component(
                kind,
                |_scope: &RenderScope<'_>| Ok("a".to_string()),
                |_scope: &RenderScope<'_>| Ok(AssignMap::from_iter([("title".to_string(), json!("A"))])),
            )
            .assign("missing")
            .build()
            .unwrap();
        let mut view = LiveView::new(template);

        assert!(view.render().is_err());
        assert_eq!(view.components().live_count(), 0);
        assert!(!view.components().has_queued());

        view.assign("missing", json!(1));
        let outcome = view.render().unwrap();
        assert!(outcome.patch.removed.is_empty());
        assert_eq!(view.components().handle_of("a"), Some(Handle(0)));
        assert!(outcome.patch.component(Handle(0)).is_some());
    }

    #[test]
    fn test_teardown_removes_everything() {
        let card = TemplateBuilder::new().text("<p>").assign("title").text("</p>").build().unwrap();
        let kind: Arc<dyn Component> = Arc::new(TemplateComponent::new("card", card));
        let mut view = hello();
        let handle = view.mount_component("side", kind, AssignMap::new()).unwrap();

        assert_eq!(view.teardown(), vec![handle]);
        assert_eq!(view.components().live_count(), 0);
        assert!(view.rendered().is_none());
    }

    #[test]
    fn test_to_json_omits_empty_sections() {
        let patch = LivePatch::default();
        assert_eq!(patch.to_json().unwrap(), json!({}));
    }
}
