//! Renderer - Rendered Trees, the Diff Engine and the patch wire shape.
//!
//! # Architecture
//!
//! ```text
//! CompiledTemplate + RenderScope ──render_template──► Rendered
//! previous Rendered + Rendered ──────────diff───────► Patch ──serde──► JSON
//! ```

mod diff;
mod encode;
mod patch;
mod render;
mod tree;

pub use diff::{diff, full};
pub use patch::*;
pub use render::{DOM_ID_LOCAL, RenderContext, render_template};
pub use tree::*;
