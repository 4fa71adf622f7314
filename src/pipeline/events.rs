//! Pushed events - client events riding along with the next patch.

use serde::Serialize;

use crate::types::Value;

/// A named event with a JSON payload, serialized as `[name, payload]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    pub name: String,
    pub payload: Value,
}

impl PushEvent {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

impl Serialize for PushEvent {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.name, &self.payload).serialize(serializer)
    }
}
