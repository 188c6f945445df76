//! rsake - a task-based build orchestrator
//!
//! Builds are described as named tasks with dependencies, either in an
//! `rsake.yml` build script or programmatically through
//! [`runner::Registry`]. Requested targets are resolved into a deterministic
//! execution plan and run in order; a failing task causes its dependents to
//! be skipped.

// Public modules
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod runner;
pub mod ui;

// Re-export commonly used types
pub use error::{Result, RsakeError};
pub use runner::{
    resolve, Build, CancellationToken, Engine, ExecutionPlan, Registry, RunReport, Task,
    TaskContext, TaskStatus,
};

/// Current version of rsake
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
