//! Engine errors.

use thiserror::Error;

/// Every failure the render/diff engine can report.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LiveError {
    /// An assign was read before it was ever set.
    #[error("assign `{name}` is not set")]
    MissingAssign { name: String },

    /// A component id is already mounted with a different component kind.
    #[error("component `{id}` is mounted as `{existing}` and cannot be rendered as `{requested}`")]
    ComponentIdentityConflict {
        id: String,
        existing: String,
        requested: String,
    },

    /// A stream key function produced a non-string or non-unique key.
    #[error("stream `{stream}` rejected operation: {reason}")]
    InvalidDomId { stream: String, reason: String },

    /// A rendered tree does not line up with its template's holes.
    #[error("template {fingerprint:#018x} has {holes} holes but the rendered tree has {dynamics} dynamics")]
    DynamicsArityMismatch {
        fingerprint: u64,
        holes: usize,
        dynamics: usize,
    },

    /// Statics and holes of a compiled template do not interleave.
    #[error("malformed template: {statics} statics for {holes} holes")]
    MalformedTemplate { statics: usize, holes: usize },

    /// A host-supplied expression failed.
    #[error("expression failed: {0}")]
    Expression(String),

    #[error("component `{0}` is not mounted")]
    ComponentNotFound(String),

    #[error("component limit of {limit} reached")]
    ComponentLimit { limit: usize },

    #[error("template `{0}` is not in the cache")]
    TemplateNotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// A patch could not be turned into its wire form.
    #[error("patch encoding failed: {0}")]
    Encode(String),
}

impl LiveError {
    /// Fatal errors indicate a cache-consistency bug and are never recovered.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LiveError::DynamicsArityMismatch { .. })
    }

    pub(crate) fn missing(name: impl Into<String>) -> Self {
        LiveError::MissingAssign { name: name.into() }
    }
}

impl From<serde_json::Error> for LiveError {
    fn from(err: serde_json::Error) -> Self {
        LiveError::Config(err.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = LiveError> = std::result::Result<T, E>;
