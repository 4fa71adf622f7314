//! Render Pipeline
//!
//! This module connects the engine pieces into the per-view render pass
//! that the surrounding runtime drives.
//!
//! # Pipeline Architecture
//!
//! ```text
//! AssignSet + StreamStore → render_template → ComponentRegistry::render_pending → diff → LivePatch
//! ```
//!
//! ## Data Flow
//!
//! 1. **prepare** - pending stream operations are materialized, nothing committed yet
//! 2. **render** - the root template renders; component references queue components
//! 3. **components** - queued components render and diff against their own last tree
//! 4. **diff + collect** - the root diff is taken, unreferenced components are removed
//! 5. **commit** - changed sets, stream queues and the previous tree advance together

mod events;
mod view;

pub use events::PushEvent;
pub use view::{LivePatch, LiveView, RenderOutcome};
