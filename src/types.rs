//! Core types shared across the engine.
//!
//! - [`Value`] / [`AssignMap`] - assign values are plain JSON values
//! - [`Handle`] - compact per-view component identifier
//! - [`AssignPath`] - dependency path captured by an expression (`user.name`)
//! - [`Dirty`] - which concerns of a view were touched since the last pass
//! - HTML-safe conversion of values into rendered scalars

use std::fmt;

use serde::Serialize;

// =============================================================================
// Values
// =============================================================================

/// A single assign value.
pub type Value = serde_json::Value;

/// A bag of named values, used for component props and bulk assigns.
pub type AssignMap = serde_json::Map<String, Value>;

// =============================================================================
// Component Handle
// =============================================================================

/// Server-assigned component handle.
///
/// Handles are small integers scoped to one view. A handle stays stable for
/// the lifetime of a mounted component and is only recycled after its
/// removal has been emitted in a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Handle(pub u32);

impl Handle {
    /// Arena index of this handle.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Assign Paths
// =============================================================================

/// A dependency on an assign, optionally narrowed to a nested field.
///
/// `"user"` depends on the whole `user` assign, `"user.name"` only on the
/// `name` field inside it. Narrowed paths let an expression skip
/// re-evaluation when a sibling field of the same assign changed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssignPath {
    root: String,
    fields: Vec<String>,
}

impl AssignPath {
    /// Parse a dotted path.
    pub fn parse(path: &str) -> Self {
        let mut parts = path.split('.');
        let root = parts.next().unwrap_or_default().to_string();
        Self {
            root,
            fields: parts.map(str::to_string).collect(),
        }
    }

    /// The top-level assign name.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Nested field names below the root.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Walk `value` along the nested fields.
    ///
    /// Missing fields resolve to `None`; array segments accept indices.
    pub fn resolve<'v>(&self, value: &'v Value) -> Option<&'v Value> {
        self.fields.iter().try_fold(value, |current, field| match current {
            Value::Object(map) => map.get(field),
            Value::Array(items) => field.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }
}

impl From<&str> for AssignPath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

impl fmt::Display for AssignPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.root)?;
        for field in &self.fields {
            write!(f, ".{field}")?;
        }
        Ok(())
    }
}

// =============================================================================
// Dirty Flags (bitflags)
// =============================================================================

bitflags::bitflags! {
    /// Concerns of a view touched since the last render pass.
    ///
    /// Combine with bitwise OR: `Dirty::ASSIGNS | Dirty::STREAMS`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Dirty: u8 {
        const NONE = 0;
        const ASSIGNS = 1 << 0;
        const COMPONENTS = 1 << 1;
        const STREAMS = 1 << 2;
        const EVENTS = 1 << 3;
    }
}

// =============================================================================
// Safe Strings
// =============================================================================

/// Convert a value into the scalar string embedded in a hole.
///
/// `null` renders as nothing, strings render verbatim, everything else uses
/// its JSON text. With `escape` set, HTML-significant characters are escaped.
pub fn to_safe_string(value: &Value, escape: bool) -> String {
    let raw = match value {
        Value::Null => return String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    };
    if escape { escape_html(&raw) } else { raw }
}

/// Escape `&`, `<`, `>`, `"` and `'`.
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

// =============================================================================
// Tests
// =============================================================================
