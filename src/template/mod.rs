//! Templates - compiled skeletons, the builder, and the shared cache.
//!
//! A [`CompiledTemplate`] is the leaf of the whole engine: static text
//! fragments interleaved with [`Hole`]s. Rendering fills the holes, diffing
//! compares filled holes, and the statics travel to the client only when it
//! does not already know them.

mod builder;
mod cache;
mod compiled;

pub use builder::*;
pub use cache::*;
pub use compiled::*;
