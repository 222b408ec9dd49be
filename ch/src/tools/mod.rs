//! Tools participants may call during fan-out
//!
//! A participant with tools enabled gets a `ToolContext` scoped to the
//! configured reference directory; file tools cannot read outside it.

mod context;
mod error;
mod executor;
mod traits;

pub mod builtin;

pub use context::ToolContext;
pub use error::ToolError;
pub use executor::ToolExecutor;
pub use traits::{Tool, ToolResult};
