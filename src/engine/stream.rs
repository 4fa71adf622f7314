//! Stream Store - keyed, ordered collections diffed by stable element key.
//!
//! Streams never hold their items after a flush. Operations only queue up
//! pending inserts/deletes; the next flush materializes them against the
//! mirror of keys the client is known to hold and clears the queue.
//!
//! # Flush Rules
//!
//! - A key lives in at most one of the pending inserts/deletes.
//! - Re-inserting a pending key replaces the earlier insert (last write wins).
//! - Inserting a key the client already holds updates it in place, unless an
//!   explicit different position is given: then it moves, emitted as a delete
//!   plus an insert.
//! - A reset drops every operation queued before it and clears the client.
//! - The client applies all deletes first, then the inserts in order.
//!
//! ```ignore
//! let mut store = StreamStore::new();
//! store.apply("songs", StreamOp::insert(json!({"id": 1})))?;
//! let flush = store.flush("songs");
//! assert_eq!(flush.inserts[0].dom_id, "songs-1");
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use tracing::trace;

use crate::error::{LiveError, Result};
use crate::types::Value;

/// Maps a stream item to its stable key. Must return a string.
pub type DomIdFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Key function used when a stream was never configured: `"{name}-{item.id}"`.
pub fn default_dom_id(name: &str) -> DomIdFn {
    let prefix = name.to_string();
    Arc::new(move |item: &Value| match item.get("id") {
        Some(Value::String(id)) => Value::String(format!("{prefix}-{id}")),
        Some(Value::Number(id)) => Value::String(format!("{prefix}-{id}")),
        _ => Value::Null,
    })
}

// =============================================================================
// Operations
// =============================================================================

/// A mutation of one stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOp {
    /// Insert or update one item. `at` is `-1` to append.
    Insert {
        item: Value,
        at: i64,
        limit: Option<i64>,
        update_only: bool,
    },
    /// Insert several items, each at `at`, in order.
    InsertMany {
        items: Vec<Value>,
        at: i64,
        limit: Option<i64>,
    },
    /// Delete by key.
    Delete(String),
    /// Delete by item; the key is computed from the item.
    DeleteItem(Value),
    /// Replace the whole collection.
    Reset(Vec<Value>),
}

impl StreamOp {
    /// Append an item.
    pub fn insert(item: Value) -> Self {
        StreamOp::Insert {
            item,
            at: -1,
            limit: None,
            update_only: false,
        }
    }

    /// Insert an item at a position.
    pub fn insert_at(item: Value, at: i64) -> Self {
        StreamOp::Insert {
            item,
            at,
            limit: None,
            update_only: false,
        }
    }
}

/// One insert as emitted by a flush.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInsert {
    pub dom_id: String,
    /// `-1` appends; in-place updates carry the key's current position.
    pub at: i64,
    /// Positive keeps the first N entries, negative the last N.
    pub limit: Option<i64>,
    pub update_only: bool,
    pub item: Value,
}

/// One entry of one stream. Components rendered inside the entry belong to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub stream: String,
    pub dom_id: String,
}

impl StreamKey {
    pub fn new(stream: impl Into<String>, dom_id: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            dom_id: dom_id.into(),
        }
    }
}

/// Materialized pending operations of one stream.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StreamFlush {
    pub name: String,
    pub reference: u32,
    pub inserts: Vec<StreamInsert>,
    pub deletes: Vec<String>,
    pub reset: bool,
}

impl StreamFlush {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.deletes.is_empty() && !self.reset
    }
}

/// Key mirrors computed by [`StreamStore::prepare_all`], applied by [`StreamStore::commit`].
#[derive(Debug, Default)]
pub struct StreamCommit(Vec<(String, IndexSet<String>)>);

impl StreamCommit {
    /// Leave a stream's queue pending, e.g. when no hole consumed its flush.
    pub fn skip(&mut self, name: &str) {
        self.0.retain(|(stream, _)| stream != name);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// =============================================================================
// Stream
// =============================================================================

struct Stream {
    reference: u32,
    dom_id: DomIdFn,
    inserts: Vec<StreamInsert>,
    deletes: IndexSet<String>,
    reset: bool,
    /// Keys the client holds, in order.
    known: IndexSet<String>,
}

impl Stream {
    fn new(reference: u32, dom_id: DomIdFn) -> Self {
        Self {
            reference,
            dom_id,
            inserts: Vec::new(),
            deletes: IndexSet::new(),
            reset: false,
            known: IndexSet::new(),
        }
    }

    fn has_pending(&self) -> bool {
        !self.inserts.is_empty() || !self.deletes.is_empty() || self.reset
    }

    fn push_insert(&mut self, insert: StreamInsert) {
        self.deletes.shift_remove(&insert.dom_id);
        self.inserts.retain(|pending| pending.dom_id != insert.dom_id);
        self.inserts.push(insert);
    }

    fn push_delete(&mut self, key: String) {
        self.inserts.retain(|pending| pending.dom_id != key);
        if !self.reset && self.known.contains(&key) {
            self.deletes.insert(key);
        }
    }

    fn reset_with(&mut self, inserts: Vec<StreamInsert>) {
        self.inserts.clear();
        self.deletes.clear();
        self.reset = self.reset || !self.known.is_empty();
        self.inserts.extend(inserts);
    }

    /// Apply the pending queue to a copy of the mirror.
    fn prepare(&self, name: &str) -> (StreamFlush, IndexSet<String>) {
        let mut known = if self.reset { IndexSet::new() } else { self.known.clone() };
        let mut deletes = Vec::new();

        for key in &self.deletes {
            if known.shift_remove(key) {
                deletes.push(key.clone());
            }
        }

        // Moves leave before any insert lands, same as on the client.
        for pending in &self.inserts {
            if let Some(current) = known.get_index_of(&pending.dom_id) {
                if pending.at >= 0 && pending.at as usize != current {
                    known.shift_remove(&pending.dom_id);
                    deletes.push(pending.dom_id.clone());
                }
            }
        }

        let mut inserts = Vec::with_capacity(self.inserts.len());
        for pending in &self.inserts {
            let mut emitted = pending.clone();
            match known.get_index_of(&pending.dom_id) {
                Some(current) => emitted.at = current as i64,
                None if pending.update_only => continue,
                None => place(&mut known, &pending.dom_id, pending.at),
            }
            if let Some(limit) = pending.limit {
                apply_limit(&mut known, limit);
            }
            inserts.push(emitted);
        }

        let flush = StreamFlush {
            name: name.to_string(),
            reference: self.reference,
            inserts,
            deletes,
            reset: self.reset,
        };
        (flush, known)
    }

    fn commit(&mut self, known: IndexSet<String>) {
        self.known = known;
        self.inserts.clear();
        self.deletes.clear();
        self.reset = false;
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("reference", &self.reference)
            .field("inserts", &self.inserts.len())
            .field("deletes", &self.deletes)
            .field("reset", &self.reset)
            .field("known", &self.known.len())
            .finish()
    }
}

fn place(known: &mut IndexSet<String>, key: &str, at: i64) {
    if at < 0 || at as usize >= known.len() {
        known.insert(key.to_string());
    } else {
        known.shift_insert(at as usize, key.to_string());
    }
}

fn apply_limit(known: &mut IndexSet<String>, limit: i64) {
    let keep = limit.unsigned_abs() as usize;
    if known.len() <= keep {
        return;
    }
    if limit >= 0 {
        known.truncate(keep);
    } else {
        let excess = known.len() - keep;
        known.drain(..excess);
    }
}

/// Compute and validate keys for a batch before anything is mutated.
fn compute_keys(stream: &str, dom_id: &DomIdFn, items: &[Value]) -> Result<Vec<String>> {
    let mut seen = HashSet::with_capacity(items.len());
    let mut keys = Vec::with_capacity(items.len());
    for (position, item) in items.iter().enumerate() {
        let key = match dom_id(item) {
            Value::String(key) if !key.is_empty() => key,
            other => {
                return Err(LiveError::InvalidDomId {
                    stream: stream.to_string(),
                    reason: format!("item {position} produced dom id {other}, expected a non-empty string"),
                });
            }
        };
        if !seen.insert(key.clone()) {
            return Err(LiveError::InvalidDomId {
                stream: stream.to_string(),
                reason: format!("dom id `{key}` appears more than once in one operation"),
            });
        }
        keys.push(key);
    }
    Ok(keys)
}

// =============================================================================
// StreamStore
// =============================================================================

/// All streams of one view.
#[derive(Debug, Default)]
pub struct StreamStore {
    streams: IndexMap<String, Stream>,
    next_reference: u32,
}

impl StreamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the key function of a stream, creating the stream if needed.
    pub fn configure(&mut self, name: &str, dom_id: DomIdFn) {
        match self.streams.get_mut(name) {
            Some(stream) => stream.dom_id = dom_id,
            None => {
                let reference = self.take_reference();
                self.streams.insert(name.to_string(), Stream::new(reference, dom_id));
            }
        }
    }

    /// Queue an operation. Key validation happens before any state changes.
    pub fn apply(&mut self, name: &str, op: StreamOp) -> Result<()> {
        let dom_id = match self.streams.get(name) {
            Some(stream) => stream.dom_id.clone(),
            None => default_dom_id(name),
        };

        let pending = match op {
            StreamOp::Insert {
                item,
                at,
                limit,
                update_only,
            } => {
                let mut keys = compute_keys(name, &dom_id, std::slice::from_ref(&item))?;
                Pending::Inserts(vec![StreamInsert {
                    dom_id: keys.remove(0),
                    at,
                    limit,
                    update_only,
                    item,
                }])
            }
            StreamOp::InsertMany { items, at, limit } => {
                let keys = compute_keys(name, &dom_id, &items)?;
                Pending::Inserts(
                    keys.into_iter()
                        .zip(items)
                        .map(|(dom_id, item)| StreamInsert {
                            dom_id,
                            at,
                            limit,
                            update_only: false,
                            item,
                        })
                        .collect(),
                )
            }
            StreamOp::Delete(key) => Pending::Delete(key),
            StreamOp::DeleteItem(item) => {
                let mut keys = compute_keys(name, &dom_id, std::slice::from_ref(&item))?;
                Pending::Delete(keys.remove(0))
            }
            StreamOp::Reset(items) => {
                let keys = compute_keys(name, &dom_id, &items)?;
                Pending::Reset(
                    keys.into_iter()
                        .zip(items)
                        .map(|(dom_id, item)| StreamInsert {
                            dom_id,
                            at: -1,
                            limit: None,
                            update_only: false,
                            item,
                        })
                        .collect(),
                )
            }
        };

        if !self.streams.contains_key(name) {
            self.configure(name, dom_id);
        }
        let Some(stream) = self.streams.get_mut(name) else {
            return Ok(());
        };

        match pending {
            Pending::Inserts(inserts) => {
                for insert in inserts {
                    trace!(stream = name, dom_id = %insert.dom_id, at = insert.at, "stream insert queued");
                    stream.push_insert(insert);
                }
            }
            Pending::Delete(key) => {
                trace!(stream = name, dom_id = %key, "stream delete queued");
                stream.push_delete(key);
            }
            Pending::Reset(inserts) => {
                trace!(stream = name, items = inserts.len(), "stream reset queued");
                stream.reset_with(inserts);
            }
        }
        Ok(())
    }

    /// Materialize and clear the pending operations of one stream.
    pub fn flush(&mut self, name: &str) -> StreamFlush {
        match self.streams.get_mut(name) {
            Some(stream) => {
                let (flush, known) = stream.prepare(name);
                stream.commit(known);
                flush
            }
            None => StreamFlush {
                name: name.to_string(),
                ..StreamFlush::default()
            },
        }
    }

    /// Materialize every stream with pending operations without clearing them.
    ///
    /// Nothing changes until the returned [`StreamCommit`] is committed, so a
    /// failed render pass can simply drop it.
    pub fn prepare_all(&self) -> (HashMap<String, StreamFlush>, StreamCommit) {
        let mut flushes = HashMap::new();
        let mut commit = StreamCommit::default();
        for (name, stream) in self.streams.iter().filter(|(_, s)| s.has_pending()) {
            let (flush, known) = stream.prepare(name);
            flushes.insert(name.clone(), flush);
            commit.0.push((name.clone(), known));
        }
        (flushes, commit)
    }

    /// Apply a prepared commit, clearing the flushed queues.
    pub fn commit(&mut self, commit: StreamCommit) {
        for (name, known) in commit.0 {
            if let Some(stream) = self.streams.get_mut(&name) {
                stream.commit(known);
            }
        }
    }

    pub fn has_pending(&self) -> bool {
        self.streams.values().any(Stream::has_pending)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.streams.contains_key(name)
    }

    /// Keys the client holds for a stream, in order.
    pub fn known_keys(&self, name: &str) -> Option<Vec<&str>> {
        self.streams
            .get(name)
            .map(|s| s.known.iter().map(String::as_str).collect())
    }

    /// Whether the client holds `dom_id` in stream `name`.
    pub fn holds(&self, name: &str, dom_id: &str) -> bool {
        self.streams.get(name).is_some_and(|s| s.known.contains(dom_id))
    }

    /// Drop every stream.
    pub fn clear(&mut self) {
        self.streams.clear();
    }

    fn take_reference(&mut self) -> u32 {
        let reference = self.next_reference;
        self.next_reference += 1;
        reference
    }
}

enum Pending {
    Inserts(Vec<StreamInsert>),
    Delete(String),
    Reset(Vec<StreamInsert>),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn by_id() -> DomIdFn {
        Arc::new(|item: &Value| match &item["id"] {
            Value::Number(n) => Value::String(n.to_string()),
            other => other.clone(),
        })
    }

    fn store() -> StreamStore {
        let mut store = StreamStore::new();
        store.configure("items", by_id());
        store
    }

    fn keys(flush: &StreamFlush) -> Vec<(&str, i64)> {
        flush.inserts.iter().map(|i| (i.dom_id.as_str(), i.at)).collect()
    }

    #[test]
    fn test_last_insert_wins() {
        let mut store = store();
        store.apply("items", StreamOp::insert(json!({"id": 1}))).unwrap();
        store.apply("items", StreamOp::insert(json!({"id": 2}))).unwrap();
        store
            .apply("items", StreamOp::insert_at(json!({"id": 1, "updated": true}), 0))
            .unwrap();

        let flush = store.flush("items");
        assert_eq!(keys(&flush), vec![("2", -1), ("1", 0)]);
        assert_eq!(flush.inserts[1].item, json!({"id": 1, "updated": true}));
        assert!(flush.deletes.is_empty());
        assert_eq!(store.known_keys("items").unwrap(), vec!["1", "2"]);
    }

    #[test]
    fn test_update_in_place() {
        let mut store = store();
        for id in 1..=3 {
            store.apply("items", StreamOp::insert(json!({"id": id}))).unwrap();
        }
        store.flush("items");

        store.apply("items", StreamOp::insert(json!({"id": 2, "v": 2}))).unwrap();
        let flush = store.flush("items");
        assert_eq!(keys(&flush), vec![("2", 1)]);
        assert!(flush.deletes.is_empty(), "in-place update must not delete");
    }

    #[test]
    fn test_move_is_delete_then_insert() {
        let mut store = store();
        for id in 1..=3 {
            store.apply("items", StreamOp::insert(json!({"id": id}))).unwrap();
        }
        store.flush("items");

        store.apply("items", StreamOp::insert_at(json!({"id": 3}), 0)).unwrap();
        let flush = store.flush("items");
        assert_eq!(flush.deletes, vec!["3"]);
        assert_eq!(keys(&flush), vec![("3", 0)]);
        assert_eq!(store.known_keys("items").unwrap(), vec!["3", "1", "2"]);
    }

    #[test]
    fn test_delete() {
        let mut store = store();
        store.apply("items", StreamOp::insert(json!({"id": 1}))).unwrap();
        store.apply("items", StreamOp::insert(json!({"id": 2}))).unwrap();
        store.flush("items");

        store.apply("items", StreamOp::Delete("1".into())).unwrap();
        store.apply("items", StreamOp::DeleteItem(json!({"id": 2}))).unwrap();
        // Never flushed: dropped from the queue, nothing to tell the client.
        store.apply("items", StreamOp::insert(json!({"id": 3}))).unwrap();
        store.apply("items", StreamOp::Delete("3".into())).unwrap();

        let flush = store.flush("items");
        assert_eq!(flush.deletes, vec!["1", "2"]);
        assert!(flush.inserts.is_empty());
        assert!(store.known_keys("items").unwrap().is_empty());
    }

    #[test]
    fn test_insert_cancels_pending_delete() {
        let mut store = store();
        store.apply("items", StreamOp::insert(json!({"id": 1}))).unwrap();
        store.flush("items");

        store.apply("items", StreamOp::Delete("1".into())).unwrap();
        store.apply("items", StreamOp::insert(json!({"id": 1, "v": 2}))).unwrap();
        let flush = store.flush("items");
        assert!(flush.deletes.is_empty());
        assert_eq!(keys(&flush), vec![("1", 0)]);
    }

    #[test]
    fn test_reset_supersedes_pending() {
        let mut store = store();
        store.apply("items", StreamOp::insert(json!({"id": 1}))).unwrap();
        store.flush("items");

        store.apply("items", StreamOp::insert(json!({"id": 2}))).unwrap();
        store.apply("items", StreamOp::Delete("1".into())).unwrap();
        store
            .apply("items", StreamOp::Reset(vec![json!({"id": 7}), json!({"id": 8})]))
            .unwrap();

        let flush = store.flush("items");
        assert!(flush.reset);
        assert!(flush.deletes.is_empty());
        assert_eq!(keys(&flush), vec![("7", -1), ("8", -1)]);
        assert_eq!(store.known_keys("items").unwrap(), vec!["7", "8"]);
    }

    #[test]
    fn test_invalid_dom_id_is_atomic() {
        let mut store = store();
        store.apply("items", StreamOp::insert(json!({"id": 1}))).unwrap();

        let err = store
            .apply(
                "items",
                StreamOp::InsertMany {
                    items: vec![json!({"id": 2}), json!({"name": "no id"})],
                    at: -1,
                    limit: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, LiveError::InvalidDomId { .. }));

        let dup = store
            .apply(
                "items",
                StreamOp::InsertMany {
                    items: vec![json!({"id": 5}), json!({"id": 5})],
                    at: -1,
                    limit: None,
                },
            )
            .unwrap_err();
        assert!(matches!(dup, LiveError::InvalidDomId { .. }));

        let flush = store.flush("items");
        assert_eq!(keys(&flush), vec![("1", -1)]);
    }

    #[test]
    fn test_invalid_dom_id_does_not_create_stream() {
        let mut store = StreamStore::new();
        assert!(store.apply("songs", StreamOp::insert(json!({"title": "x"}))).is_err());
        assert!(!store.contains("songs"));
    }

    #[test]
    fn test_default_dom_id() {
        let mut store = StreamStore::new();
        store.apply("songs", StreamOp::insert(json!({"id": 10}))).unwrap();
        store.apply("songs", StreamOp::insert(json!({"id": "abc"}))).unwrap();
        let flush = store.flush("songs");
        assert_eq!(keys(&flush), vec![("songs-10", -1), ("songs-abc", -1)]);
    }

    #[test]
    fn test_limit() {
        let mut store = store();
        for id in 1..=3 {
            store
                .apply(
                    "items",
                    StreamOp::Insert {
                        item: json!({"id": id}),
                        at: -1,
                        limit: Some(-2),
                        update_only: false,
                    },
                )
                .unwrap();
        }
        store.flush("items");
        assert_eq!(store.known_keys("items").unwrap(), vec!["2", "3"]);

        store
            .apply(
                "items",
                StreamOp::Insert {
                    item: json!({"id": 0}),
                    at: 0,
                    limit: Some(2),
                    update_only: false,
                },
            )
            .unwrap();
        store.flush("items");
        assert_eq!(store.known_keys("items").unwrap(), vec!["0", "2"]);
    }

    #[test]
    fn test_update_only_skips_unknown() {
        let mut store = store();
        store
            .apply(
                "items",
                StreamOp::Insert {
                    item: json!({"id": 1}),
                    at: -1,
                    limit: None,
                    update_only: true,
                },
            )
            .unwrap();
        let flush = store.flush("items");
        assert!(flush.inserts.is_empty());
    }

    #[test]
    fn test_prepare_does_not_mutate() {
        let mut store = store();
        store.apply("items", StreamOp::insert(json!({"id": 1}))).unwrap();

        let (flushes, _commit) = store.prepare_all();
        assert_eq!(flushes["items"].inserts.len(), 1);
        assert!(store.has_pending());

        let (_, commit) = store.prepare_all();
        store.commit(commit);
        assert!(!store.has_pending());
        assert_eq!(store.known_keys("items").unwrap(), vec!["1"]);
    }

    #[test]
    fn test_references_are_per_stream() {
        let mut store = StreamStore::new();
        store.apply("a", StreamOp::insert(json!({"id": 1}))).unwrap();
        store.apply("b", StreamOp::insert(json!({"id": 1}))).unwrap();
        assert_eq!(store.flush("a").reference, 0);
        assert_eq!(store.flush("b").reference, 1);
    }

    #[test]
    fn test_holds_tracks_committed_keys() {
        let mut store = store();
        store.apply("items", StreamOp::insert(json!({"id": 1}))).unwrap();
        assert!(!store.holds("items", "1"), "queued keys are not held yet");

        let (_, commit) = store.prepare_all();
        store.commit(commit);
        assert!(store.holds("items", "1"));

        store.apply("items", StreamOp::Delete("1".into())).unwrap();
        store.flush("items");
        assert!(!store.holds("items", "1"));
        assert!(!store.holds("missing", "1"));
    }
}
