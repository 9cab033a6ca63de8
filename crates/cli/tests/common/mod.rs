//! Common utilities for integration tests
#![allow(dead_code)]

pub mod cli;
pub mod fixtures;

// Re-export commonly used items
pub use fixtures::{wait_until, RecordingGenerator, TestDaemon, Workspace};
