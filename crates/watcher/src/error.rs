//! Error types for the watch session.

use bsync_core::{ConfigError, GenerateError, TrackerError};
use std::path::PathBuf;
use thiserror::Error;

/// Hint printed when the OS refuses more watches
pub const WATCH_LIMIT_HINT: &str = "raise the limit, e.g. \
    `sudo sysctl fs.inotify.max_user_watches=524288` \
    (persist it in /etc/sysctl.conf), or add ignore prefixes for large trees";

/// Errors from watcher operations.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Watch limit reached while registering {path}: {hint}")]
    WatchLimit { path: PathBuf, hint: &'static str },

    #[error("Cannot watch path {path}: {reason}")]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("Watch session already running")]
    AlreadyRunning,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}

/// Errors from a generation pass
#[derive(Error, Debug)]
pub enum UpdateError {
    #[error(transparent)]
    Generate(#[from] GenerateError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

/// Is this notify error the OS running out of watch descriptors?
pub(crate) fn is_watch_limit(error: &notify::Error) -> bool {
    match &error.kind {
        notify::ErrorKind::MaxFilesWatch => true,
        // ENOSPC from inotify_add_watch
        notify::ErrorKind::Io(io) => io.raw_os_error() == Some(28),
        _ => false,
    }
}
