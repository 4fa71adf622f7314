//! State Module - Assign storage and change tracking
//!
//! - **Assigns** - named values with per-pass change recording ([`AssignSet`])
//! - **Scope** - assigns plus comprehension locals, handed to template code ([`RenderScope`])

mod assigns;
mod scope;

pub use assigns::*;
pub use scope::*;
