//! Common test utilities

#![allow(dead_code)]

use rsake::runner::{Registry, Task};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Create a temporary directory with an rsake.yml file
pub fn create_test_script(content: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let script_path = temp_dir.path().join("rsake.yml");
    fs::write(&script_path, content).unwrap();
    (temp_dir, script_path)
}

/// Create a test script with an empty subdirectory next to it
pub fn create_test_script_in_subdir(content: &str) -> (TempDir, PathBuf, PathBuf) {
    let (temp_dir, script_path) = create_test_script(content);
    let sub_dir = temp_dir.path().join("subdir");
    fs::create_dir(&sub_dir).unwrap();
    (temp_dir, script_path, sub_dir)
}

/// Register `tasks`, panicking on duplicates
pub fn registry_of(tasks: Vec<Task>) -> Registry {
    let mut registry = Registry::new();
    for task in tasks {
        registry.register(task).unwrap();
    }
    registry
}
