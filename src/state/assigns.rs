//! Change Tracker - Named assigns with per-pass change recording.
//!
//! An [`AssignSet`] holds the values templates read and remembers which
//! names were mutated since the last completed render:
//!
//! - Reads never mark anything changed.
//! - `set` always marks the name changed; `merge` only marks names whose
//!   value differs under the set's equality primitive.
//! - The value held before the first mutation of a pass is kept, so nested
//!   paths (`user.name`) can tell whether *their* part actually moved.
//! - `reset_changed` is called exactly once per completed render.
//!
//! ```ignore
//! let mut assigns = AssignSet::new();
//! assigns.set("name", json!("A"));
//! assert!(assigns.is_changed("name"));
//! assigns.reset_changed();
//! assert!(!assigns.is_changed("name"));
//! ```

use std::collections::HashMap;

use crate::error::{LiveError, Result};
use crate::types::{AssignMap, AssignPath, Value};

/// Equality primitive deciding whether two assign values render the same.
pub type EqualityFn = fn(&Value, &Value) -> bool;

fn structural_eq(a: &Value, b: &Value) -> bool {
    a == b
}

// =============================================================================
// AssignSet
// =============================================================================

/// Named values plus the set of names changed since the last render.
#[derive(Debug, Clone)]
pub struct AssignSet {
    values: HashMap<String, Value>,
    /// Changed name -> value before the first change of this pass.
    changed: HashMap<String, Option<Value>>,
    equality: EqualityFn,
}

impl Default for AssignSet {
    fn default() -> Self {
        Self::new()
    }
}

impl AssignSet {
    /// Create an empty set using structural equality.
    pub fn new() -> Self {
        Self::with_equality(structural_eq)
    }

    /// Create an empty set using a host-provided equality primitive.
    pub fn with_equality(equality: EqualityFn) -> Self {
        Self {
            values: HashMap::new(),
            changed: HashMap::new(),
            equality,
        }
    }

    /// Create a set where every entry of `map` starts out changed.
    pub fn from_map(map: AssignMap) -> Self {
        let mut assigns = Self::new();
        assigns.set_many(map);
        assigns
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Read an assign.
    pub fn get(&self, name: &str) -> Result<&Value> {
        self.values.get(name).ok_or_else(|| LiveError::missing(name))
    }

    /// Read an assign, `None` when unset.
    pub fn try_get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Names of all assigns, in no particular order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Compare two values with this set's equality primitive.
    pub fn values_equal(&self, a: &Value, b: &Value) -> bool {
        (self.equality)(a, b)
    }

    // -------------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------------

    /// Set an assign and mark it changed.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        let previous = self.values.insert(name.clone(), value);
        self.changed.entry(name).or_insert(previous);
    }

    /// Set several assigns at once, marking all of them changed.
    pub fn set_many<K, I>(&mut self, entries: I)
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        // Apply only after the iterator is drained.
        let entries: Vec<(String, Value)> = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        for (name, value) in entries {
            self.set(name, value);
        }
    }

    /// Set an assign only if it is not present yet.
    ///
    /// Returns `true` when the value was computed and stored.
    pub fn assign_new(&mut self, name: impl Into<String>, init: impl FnOnce(&AssignSet) -> Value) -> bool {
        let name = name.into();
        if self.values.contains_key(&name) {
            return false;
        }
        let value = init(self);
        self.set(name, value);
        true
    }

    /// Replace an existing assign with a value derived from its current one.
    pub fn update(&mut self, name: &str, f: impl FnOnce(&Value) -> Value) -> Result<()> {
        let current = self.get(name)?;
        let next = f(current);
        self.set(name, next);
        Ok(())
    }

    /// Merge `incoming` into the set, marking only names whose value differs.
    ///
    /// Returns `true` if anything was marked changed.
    pub fn merge(&mut self, incoming: AssignMap) -> bool {
        let mut any = false;
        for (name, value) in incoming {
            let same = self
                .values
                .get(&name)
                .is_some_and(|current| (self.equality)(current, &value));
            if !same {
                self.set(name, value);
                any = true;
            }
        }
        any
    }

    // -------------------------------------------------------------------------
    // Change tracking
    // -------------------------------------------------------------------------

    /// Whether `name` was mutated since the last render.
    pub fn is_changed(&self, name: &str) -> bool {
        self.changed.contains_key(name)
    }

    /// Whether the value at `path` may render differently than last pass.
    ///
    /// A bare name behaves like [`is_changed`](Self::is_changed). A nested
    /// path additionally compares the field before and after the change.
    pub fn is_path_changed(&self, path: &AssignPath) -> bool {
        let Some(previous) = self.changed.get(path.root()) else {
            return false;
        };
        if path.fields().is_empty() {
            return true;
        }
        let Some(old_root) = previous else {
            return true;
        };
        let before = path.resolve(old_root);
        let after = self.values.get(path.root()).and_then(|v| path.resolve(v));
        match (before, after) {
            (Some(a), Some(b)) => !(self.equality)(a, b),
            (None, None) => false,
            _ => true,
        }
    }

    /// Whether any of `deps` changed.
    pub fn any_changed(&self, deps: &[AssignPath]) -> bool {
        deps.iter().any(|dep| self.is_path_changed(dep))
    }

    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty()
    }

    /// Names changed since the last render.
    pub fn changed_names(&self) -> impl Iterator<Item = &str> {
        self.changed.keys().map(String::as_str)
    }

    /// Mark every assign changed, forcing full re-evaluation next pass.
    pub fn mark_all_changed(&mut self) {
        for name in self.values.keys() {
            self.changed.entry(name.clone()).or_insert(None);
        }
    }

    /// Forget recorded changes. Called once per completed render.
    pub fn reset_changed(&mut self) {
        self.changed.clear();
    }
}

// =============================================================================
// Tests
// =============================================================================
