//! Build script and settings
//!
//! This module handles discovery and parsing of rsake.yml build scripts,
//! their validation, and the user's settings file.

pub mod parse;
pub mod schema;
pub mod settings;
pub mod types;

// Re-export main types
pub use parse::*;
pub use schema::*;
pub use settings::*;
pub use types::*;
