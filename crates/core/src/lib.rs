//! Buildsync Core - shared tables, configuration and collaborator interfaces
//!
//! This crate provides the pieces every other buildsync crate agrees on:
//! - Language -> extension table and ignored directory prefixes
//! - Workspace settings (`.bsync/config.toml`)
//! - Directory keys and build-target addressing
//! - Lifecycle events and the sinks that receive them
//! - Generator and tracker interfaces
//! - Logging setup and event macros

pub mod config;
pub mod error;
pub mod events;
pub mod generate;
pub mod lang;
pub mod logging;
pub mod target;
pub mod tracker;

// Re-export main types for convenience
pub use config::Settings;
pub use error::{ConfigError, GenerateError, TrackerError};
pub use events::{ChangeEvent, ChangeKind, EventSink, JsonSink, LogSink, WatchEvent};
pub use generate::{CommandGenerator, GenerateOutput, Generator};
pub use target::Target;
pub use tracker::Tracker;

#[doc(hidden)]
pub use tracing;

/// Common result type used by binaries and glue code
pub type Result<T> = anyhow::Result<T>;
