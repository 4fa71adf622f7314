//! Live Engine - components and streams owned by one view.
//!
//! The engine manages the per-view stateful structures:
//! - Component: the kind trait and the per-instance record
//! - Registry: handle allocation, id mapping, render queue, garbage collection
//! - Stream: keyed ordered collections flushed as insert/delete operations
//!
//! # Architecture
//!
//! Components are NOT shared objects. They are handles into the view's arena:
//!
//! ```text
//! Handle 0: "chris" (kind=card, assigns={title: "A"}, rendered=Some)
//! Handle 1: "jose"  (kind=card, assigns={title: "B"}, rendered=Some)
//! Handle 2: (free, reusable after the patch removing it was emitted)
//! ```
//!
//! No process-wide registry exists; dropping a view drops its components.

mod component;
mod registry;
mod stream;

pub use component::*;
pub use registry::*;
pub use stream::*;
