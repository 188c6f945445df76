//! Task execution
//!
//! This module holds the task model and registry, dependency resolution,
//! the execution engine and its run-scoped context, external command
//! execution, and the glue that turns build scripts into tasks.

pub mod command;
pub mod context;
pub mod engine;
pub mod event;
pub mod interpolate;
pub mod properties;
pub mod registry;
pub mod resolve;
pub mod retry;
pub mod script;
pub mod task;
pub mod when;

// Re-export main types
pub use command::*;
pub use context::*;
pub use engine::*;
pub use event::*;
pub use interpolate::*;
pub use properties::*;
pub use registry::*;
pub use resolve::*;
pub use retry::*;
pub use script::*;
pub use task::*;
pub use when::*;
