//! Render scope - what an expression can see while it is evaluated.
//!
//! The scope is the explicit channel between the change tracker and the
//! template: it carries a borrowed [`AssignSet`] plus the local bindings
//! introduced by comprehensions and stream bodies. Locals shadow assigns.

use crate::error::{LiveError, Result};
use crate::state::AssignSet;
use crate::types::{AssignPath, Value};

static NULL: Value = Value::Null;

/// Assigns plus local bindings, passed to every template callback.
#[derive(Debug, Clone)]
pub struct RenderScope<'a> {
    assigns: &'a AssignSet,
    locals: Vec<(String, Value)>,
}

impl<'a> RenderScope<'a> {
    pub fn new(assigns: &'a AssignSet) -> Self {
        Self {
            assigns,
            locals: Vec::new(),
        }
    }

    /// A child scope with one more local binding.
    pub fn with_local(&self, name: impl Into<String>, value: Value) -> Self {
        let mut locals = self.locals.clone();
        locals.push((name.into(), value));
        Self {
            assigns: self.assigns,
            locals,
        }
    }

    /// The assign set backing this scope.
    pub fn assigns(&self) -> &'a AssignSet {
        self.assigns
    }

    /// Whether any local bindings are in effect.
    pub fn has_locals(&self) -> bool {
        !self.locals.is_empty()
    }

    /// Look up a local binding, falling back to assigns.
    pub fn get(&self, name: &str) -> Result<&Value> {
        match self.locals.iter().rev().find(|(local, _)| local == name) {
            Some((_, value)) => Ok(value),
            None => self.assigns.get(name),
        }
    }

    /// Look up an assign, ignoring locals.
    pub fn assign(&self, name: &str) -> Result<&Value> {
        self.assigns.get(name)
    }

    /// Resolve a dotted path. Missing nested fields read as `null`.
    pub fn path(&self, path: &AssignPath) -> Result<&Value> {
        let root = self.get(path.root())?;
        Ok(path.resolve(root).unwrap_or(&NULL))
    }

    /// Read a string local or assign.
    pub fn str(&self, name: &str) -> Result<&str> {
        self.get(name)?
            .as_str()
            .ok_or_else(|| LiveError::Expression(format!("`{name}` is not a string")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_locals_shadow_assigns() {
        let mut assigns = AssignSet::new();
        assigns.set("item", json!("assign"));
        let scope = RenderScope::new(&assigns);
        assert_eq!(scope.get("item").unwrap(), &json!("assign"));

        let inner = scope.with_local("item", json!("local"));
        assert_eq!(inner.get("item").unwrap(), &json!("local"));
        assert_eq!(inner.assign("item").unwrap(), &json!("assign"));
        assert!(inner.has_locals());
        assert!(!scope.has_locals());
    }

    #[test]
    fn test_path_lookup() {
        let mut assigns = AssignSet::new();
        assigns.set("user", json!({"name": "Ada"}));
        let scope = RenderScope::new(&assigns);

        assert_eq!(scope.path(&"user.name".into()).unwrap(), &json!("Ada"));
        assert_eq!(scope.path(&"user.email".into()).unwrap(), &Value::Null);
        assert!(scope.path(&"account.id".into()).is_err());
    }

    #[test]
    fn test_str_type_check() {
        let mut assigns = AssignSet::new();
        assigns.set("id", json!(5));
        let scope = RenderScope::new(&assigns);
        assert!(matches!(scope.str("id"), Err(LiveError::Expression(_))));
    }
}
