//! Component Registry - Handle allocation and component lifecycle per view.
//!
//! Manages the lifecycle of component handles:
//! - id ↔ handle mapping (one live record per id)
//! - Arena of records indexed by handle (no process-wide registry)
//! - Free handle pool, always handing out the smallest unused handle
//! - Render queue: only new or changed components are re-rendered
//! - Touched set + garbage collection of components a pass no longer references
//! - Undo journal, so a failed pass leaves the arena as it found it
//!
//! # Handle recycling
//!
//! ```text
//! unmount "x" (handle 3) ──► tombstoned ──► reported in patch ──► free
//!                                 │                                 │
//!                mount "y" here gets a new handle     mount "y" here may get 3
//! ```
//!
//! # References
//!
//! A component is referenced in a pass when a rendered template points at
//! it, when an unchanged parent that points at it is referenced, or when it
//! was mounted since the last pass. Components rendered inside a stream
//! entry are instead kept while the client holds that entry.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::component::{Component, ComponentRecord};
use super::stream::{StreamFlush, StreamKey};
use crate::config::LiveConfig;
use crate::error::{LiveError, Result};
use crate::renderer::{Patch, RenderContext, Rendered, diff, render_template};
use crate::state::{AssignSet, RenderScope};
use crate::types::{AssignMap, Handle};

// =============================================================================
// Registry State
// =============================================================================

/// Per-view component arena.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    /// Arena indexed by handle. `None` is either free or currently rendering.
    records: Vec<Option<ComponentRecord>>,
    /// Live id → handle. Tombstoned records are not in here.
    ids: HashMap<String, Handle>,
    /// Handles that may be reused.
    free: BTreeSet<u32>,
    /// Tombstoned, waiting to be reported.
    tombstoned: Vec<Handle>,
    /// Reported in the patch being assembled, free once it is emitted.
    released: Vec<Handle>,
    /// Handles referenced since the last garbage collection.
    touched: HashSet<Handle>,
    /// Stream entries rendered in the current pass.
    refreshed: HashSet<StreamKey>,
    /// First render failed this pass. Never sent, slots pointing here are blanked.
    failed: HashSet<Handle>,
    queue: VecDeque<Handle>,
    queued: HashSet<Handle>,
    journal: Option<Journal>,
    limit: Option<usize>,
}

/// Undo log of the pass in progress.
#[derive(Debug, Default)]
struct Journal {
    len: usize,
    free: BTreeSet<u32>,
    queue: VecDeque<Handle>,
    touched: HashSet<Handle>,
    created: Vec<Handle>,
    /// Records dropped after a failed first render.
    discarded: Vec<ComponentRecord>,
    /// Assigns and owner of existing records before the pass first touched them.
    assigns: HashMap<Handle, (AssignSet, Option<StreamKey>)>,
    /// Trees emitted before the pass, for records it rendered.
    trees: HashMap<Handle, Option<Rendered>>,
}

impl Journal {
    fn save(&mut self, record: &ComponentRecord) {
        self.assigns
            .entry(record.handle)
            .or_insert_with(|| (record.assigns.clone(), record.owner.clone()));
    }
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry honouring `config.max_components`.
    pub fn with_config(config: &LiveConfig) -> Self {
        Self {
            limit: config.max_components,
            ..Self::default()
        }
    }

    // =========================================================================
    // Render Pass
    // =========================================================================

    /// Start a render pass. Everything until [`collect_garbage`](Self::collect_garbage)
    /// can be undone with [`rollback`](Self::rollback).
    pub fn begin_pass(&mut self) {
        self.journal = Some(Journal {
            len: self.records.len(),
            free: self.free.clone(),
            queue: self.queue.clone(),
            touched: self.touched.clone(),
            ..Journal::default()
        });
    }

    /// Look up or create the record for `id` and hand it the call-site props.
    ///
    /// Returns the handle and whether the component will re-render this pass.
    /// `owner` is the stream entry being rendered, if any.
    pub fn render_component(
        &mut self,
        id: &str,
        kind: &Arc<dyn Component>,
        props: AssignMap,
        owner: Option<&StreamKey>,
    ) -> Result<(Handle, bool)> {
        if let Some(&handle) = self.ids.get(id) {
            if self.failed.contains(&handle) {
                return Ok((handle, false));
            }

            let Some(record) = self.records[handle.index()].as_mut() else {
                self.touched.insert(handle);
                warn!(id, %handle, "component referenced from its own render, props ignored");
                return Ok((handle, false));
            };

            if record.kind.name() != kind.name() {
                return Err(LiveError::ComponentIdentityConflict {
                    id: id.to_string(),
                    existing: record.kind.name().to_string(),
                    requested: kind.name().to_string(),
                });
            }

            if let Some(journal) = self.journal.as_mut() {
                journal.save(record);
            }
            if let Some(owner) = owner {
                record.owner = Some(owner.clone());
            }
            let existing_kind = record.kind.clone();
            existing_kind.update(props, &mut record.assigns)?;

            let changed = record.needs_render();
            if changed {
                self.touched.insert(handle);
                self.enqueue(handle);
            } else {
                // Not re-rendered: its children stay as they are.
                self.touch(handle);
            }
            return Ok((handle, changed));
        }

        if let Some(limit) = self.limit.filter(|&limit| self.live_count() >= limit) {
            return Err(LiveError::ComponentLimit { limit });
        }

        // Run callbacks before allocating so a failing mount leaks no handle.
        let mut assigns = AssignSet::new();
        kind.mount(&mut assigns)?;
        kind.update(props, &mut assigns)?;

        let handle = self.allocate();
        trace!(id, %handle, kind = kind.name(), "component created");

        self.records[handle.index()] =
            Some(ComponentRecord::new(id.to_string(), handle, kind.clone(), assigns, owner.cloned()));
        self.ids.insert(id.to_string(), handle);
        self.touched.insert(handle);
        self.enqueue(handle);
        if let Some(journal) = self.journal.as_mut() {
            journal.created.push(handle);
        }

        Ok((handle, true))
    }

    /// Mark a handle, and every component its last tree points at, as referenced.
    pub fn touch(&mut self, handle: Handle) {
        self.touch_all(vec![handle]);
    }

    /// Mark every component reachable from `tree` as referenced.
    ///
    /// Used for subtrees reused verbatim from the last pass.
    pub fn touch_tree(&mut self, tree: &Rendered) {
        let mut handles = Vec::new();
        tree.collect_components(&mut handles);
        self.touch_all(handles);
    }

    /// Record that a stream entry was rendered this pass.
    pub(crate) fn mark_stream_entry(&mut self, key: &StreamKey) {
        self.refreshed.insert(key.clone());
    }

    /// Render every queued component and diff it against its last emitted tree.
    ///
    /// Components may reference further components; those are queued and
    /// rendered in the same call. Non-fatal failures are pushed to `errors`
    /// and leave the failed record on its previous tree. A component whose
    /// first render fails is discarded and its slots render as empty.
    pub fn render_pending(
        &mut self,
        streams: &mut HashMap<String, StreamFlush>,
        errors: &mut Vec<LiveError>,
        config: &LiveConfig,
    ) -> Result<BTreeMap<Handle, Patch>> {
        // Tree each rendered record had before this call.
        let mut baseline: BTreeMap<Handle, Option<Rendered>> = BTreeMap::new();

        while let Some(handle) = self.queue.pop_front() {
            self.queued.remove(&handle);

            let Some(mut record) = self.records.get_mut(handle.index()).and_then(Option::take) else {
                continue;
            };
            if record.deleted {
                self.records[handle.index()] = Some(record);
                continue;
            }
            if let Some(journal) = self.journal.as_mut() {
                journal.save(&record);
            }

            let template = record.kind.render(&record.assigns);
            let result = {
                let scope = RenderScope::new(&record.assigns);
                let mut ctx = RenderContext::new(self, streams, errors, config);
                render_template(&template, &scope, record.rendered.as_ref(), &mut ctx)
            };

            match result {
                Ok(tree) => {
                    trace!(%handle, id = %record.id, "component rendered");
                    let before = record.rendered.replace(tree);
                    baseline.entry(handle).or_insert(before);
                    record.assigns.reset_changed();
                }
                Err(err) if err.is_fatal() => {
                    self.records[handle.index()] = Some(record);
                    self.keep_baseline(baseline);
                    return Err(err);
                }
                Err(err) => {
                    warn!(%handle, id = %record.id, %err, "component render failed");
                    if record.rendered.is_none() {
                        self.failed.insert(handle);
                    }
                    errors.push(err);
                }
            }

            self.records[handle.index()] = Some(record);
        }

        self.discard_failed();
        let patches = self.diff_rendered(&baseline);
        self.keep_baseline(baseline);
        patches
    }

    /// Blank the slots of `tree` that point at components discarded this pass.
    pub fn blank_failed(&self, tree: &mut Rendered) {
        if !self.failed.is_empty() {
            tree.blank_components(&self.failed);
        }
    }

    /// End the pass: tombstone every record it did not reference.
    ///
    /// `holds` tells whether the client still holds a stream entry. Returns
    /// how many records were tombstoned.
    pub fn collect_garbage(&mut self, holds: impl Fn(&StreamKey) -> bool) -> usize {
        let mut stale = Vec::new();
        let mut kept = Vec::new();
        for record in self.records.iter().flatten().filter(|r| !r.deleted) {
            let Some(key) = &record.owner else { continue };
            let dropped = !holds(key) || (self.refreshed.contains(key) && !self.touched.contains(&record.handle));
            if dropped {
                stale.push(record.id.clone());
            } else {
                kept.push(record.handle);
            }
        }
        self.touch_all(kept);

        stale.extend(
            self.records
                .iter()
                .flatten()
                .filter(|r| !r.deleted && r.owner.is_none() && !self.touched.contains(&r.handle))
                .map(|r| r.id.clone()),
        );
        for id in &stale {
            self.tombstone(id);
        }

        self.touched.clear();
        self.refreshed.clear();
        self.failed.clear();
        self.journal = None;
        stale.len()
    }

    /// Undo everything since [`begin_pass`](Self::begin_pass).
    pub fn rollback(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };

        for record in journal.discarded {
            if journal.created.contains(&record.handle) {
                continue;
            }
            let handle = record.handle;
            self.ids.insert(record.id.clone(), handle);
            if let Some(slot) = self.records.get_mut(handle.index()) {
                *slot = Some(record);
            }
        }
        for handle in &journal.created {
            if let Some(record) = self.records.get_mut(handle.index()).and_then(Option::take) {
                self.ids.remove(&record.id);
            }
        }
        for (handle, (assigns, owner)) in journal.assigns {
            if let Some(record) = self.records.get_mut(handle.index()).and_then(Option::as_mut) {
                record.assigns = assigns;
                record.owner = owner;
            }
        }
        for (handle, tree) in journal.trees {
            if let Some(record) = self.records.get_mut(handle.index()).and_then(Option::as_mut) {
                record.rendered = tree;
            }
        }

        self.records.truncate(journal.len);
        self.free = journal.free;
        self.queued = journal.queue.iter().copied().collect();
        self.queue = journal.queue;
        self.touched = journal.touched;
        self.refreshed.clear();
        self.failed.clear();
        debug!(created = journal.created.len(), "component pass rolled back");
    }

    /// Drop tombstoned records and return their handles for the outgoing patch.
    pub fn take_removed(&mut self) -> Vec<Handle> {
        let mut removed: Vec<Handle> = self.tombstoned.drain(..).collect();
        removed.sort();
        for &handle in &removed {
            self.records[handle.index()] = None;
            self.queued.remove(&handle);
        }
        self.queue.retain(|h| !removed.contains(h));
        self.released.extend(&removed);
        removed
    }

    /// The patch carrying the last `take_removed` handles was emitted.
    pub fn commit_emitted(&mut self) {
        self.free.extend(self.released.drain(..).map(|h| h.0));
    }

    // =========================================================================
    // Out-of-pass Operations
    // =========================================================================

    /// Merge assigns into a mounted component and queue it if anything changed.
    pub fn send_update(&mut self, id: &str, assigns: AssignMap) -> Result<Handle> {
        let handle = self.handle_of(id).ok_or_else(|| LiveError::ComponentNotFound(id.to_string()))?;
        let record = self.records[handle.index()]
            .as_mut()
            .ok_or_else(|| LiveError::ComponentNotFound(id.to_string()))?;

        let kind = record.kind.clone();
        kind.update(assigns, &mut record.assigns)?;
        if record.needs_render() {
            self.enqueue(handle);
        }
        Ok(handle)
    }

    /// Tombstone a component by id. Its handle is reported in the next patch.
    pub fn unmount(&mut self, id: &str) -> Result<Handle> {
        self.tombstone(id).ok_or_else(|| LiveError::ComponentNotFound(id.to_string()))
    }

    /// Tombstone every live component.
    pub fn unmount_all(&mut self) -> usize {
        let ids: Vec<String> = self.ids.keys().cloned().collect();
        for id in &ids {
            self.tombstone(id);
        }
        ids.len()
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Handle of a live component.
    pub fn handle_of(&self, id: &str) -> Option<Handle> {
        self.ids.get(id).copied()
    }

    /// Record behind a handle, including tombstoned ones not yet reported.
    pub fn get(&self, handle: Handle) -> Option<&ComponentRecord> {
        self.records.get(handle.index()).and_then(Option::as_ref)
    }

    /// Record of a live component by id.
    pub fn get_by_id(&self, id: &str) -> Option<&ComponentRecord> {
        self.handle_of(id).and_then(|h| self.get(h))
    }

    /// Last tree emitted for a handle.
    pub fn rendered(&self, handle: Handle) -> Option<&Rendered> {
        self.get(handle).and_then(ComponentRecord::rendered)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains_key(id)
    }

    /// Number of live (not tombstoned) components.
    pub fn live_count(&self) -> usize {
        self.ids.len()
    }

    /// Handles tombstoned but not yet reported.
    pub fn pending_removal(&self) -> &[Handle] {
        &self.tombstoned
    }

    pub fn has_queued(&self) -> bool {
        !self.queue.is_empty()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn allocate(&mut self) -> Handle {
        match self.free.pop_first() {
            Some(index) => Handle(index),
            None => {
                let handle = Handle(self.records.len() as u32);
                self.records.push(None);
                handle
            }
        }
    }

    fn enqueue(&mut self, handle: Handle) {
        if self.queued.insert(handle) {
            self.queue.push_back(handle);
        }
    }

    fn touch_all(&mut self, mut pending: Vec<Handle>) {
        while let Some(handle) = pending.pop() {
            if self.touched.insert(handle) {
                if let Some(tree) = self.rendered(handle) {
                    tree.collect_components(&mut pending);
                }
            }
        }
    }

    /// Free records whose first render failed. The client never saw them.
    fn discard_failed(&mut self) {
        for &handle in &self.failed {
            let Some(record) = self.records.get_mut(handle.index()).and_then(Option::take) else {
                continue;
            };
            trace!(id = %record.id, %handle, "component discarded after failed first render");
            self.ids.remove(&record.id);
            self.touched.remove(&handle);
            self.free.insert(handle.0);
            if let Some(journal) = self.journal.as_mut() {
                journal.discarded.push(record);
            }
        }
    }

    fn diff_rendered(&mut self, baseline: &BTreeMap<Handle, Option<Rendered>>) -> Result<BTreeMap<Handle, Patch>> {
        let mut patches = BTreeMap::new();
        for (&handle, before) in baseline {
            let Some(tree) = self
                .records
                .get_mut(handle.index())
                .and_then(Option::as_mut)
                .and_then(|record| record.rendered.as_mut())
            else {
                continue;
            };
            if !self.failed.is_empty() {
                tree.blank_components(&self.failed);
            }

            let patch = diff(before.as_ref(), tree)?;
            trace!(%handle, slots = patch.slots.len(), "component diffed");
            if !patch.is_empty() {
                patches.insert(handle, patch);
            }
        }
        Ok(patches)
    }

    fn keep_baseline(&mut self, baseline: BTreeMap<Handle, Option<Rendered>>) {
        if let Some(journal) = self.journal.as_mut() {
            for (handle, tree) in baseline {
                journal.trees.entry(handle).or_insert(tree);
            }
        }
    }

    fn tombstone(&mut self, id: &str) -> Option<Handle> {
        let handle = self.ids.remove(id)?;
        if let Some(record) = self.records[handle.index()].as_mut() {
            record.deleted = true;
        }
        self.touched.remove(&handle);
        self.tombstoned.push(handle);
        trace!(id, %handle, "component tombstoned");
        Some(handle)
    }
}

// =============================================================================
// Tests
// =============================================================================
