//! # spark-live
//!
//! Server-side live view rendering and diff engine.
//!
//! A view keeps its state on the server and, after every state change,
//! sends the client only what changed since the last render instead of the
//! whole document.
//!
//! ## Architecture
//!
//! Templates are compiled once into static text interleaved with holes.
//! Each render fills the holes from an explicit change tracker, reusing
//! whatever did not change, and the diff engine turns the previous and the
//! new tree into a sparse patch:
//! ```text
//! assigns changed → Rendered Tree → diff(previous, new) → LivePatch → client
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Core types (Value, Handle, AssignPath, Dirty, safe strings)
//! - [`template`] - Compiled templates, builder and shared cache
//! - [`state`] - Assign change tracker and render scope
//! - [`renderer`] - Rendered trees, diff engine, patch wire shape
//! - [`engine`] - Component registry and stream store
//! - [`pipeline`] - The per-view render pass

pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod renderer;
pub mod state;
pub mod template;
pub mod types;

// Re-export commonly used items
pub use types::*;

pub use config::LiveConfig;

pub use error::{LiveError, Result};

pub use engine::{
    Component, ComponentRecord, ComponentRegistry, DomIdFn, StreamFlush, StreamInsert, StreamOp, StreamStore,
    TemplateComponent, default_dom_id,
};

pub use renderer::{Dynamic, Patch, Rendered, SlotPatch, diff};

pub use pipeline::{LivePatch, LiveView, PushEvent, RenderOutcome};

pub use state::{AssignSet, EqualityFn, RenderScope};

pub use template::{CompiledTemplate, Hole, TemplateBuilder, TemplateCache, TemplateCompiler, Tracking};
