//! CLI interface and argument parsing
//!
//! This module handles command-line parsing, shell completion and the
//! mapping from build outcomes to process exit codes.

pub mod app;

// Re-export main types
pub use app::*;
