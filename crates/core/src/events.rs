//! Lifecycle events and the sinks that receive them
//!
//! The watcher and the daemon never log lifecycle transitions directly; they
//! hand a [`WatchEvent`] to an injected [`EventSink`]. Which sink is used
//! (human-readable tracing output, line-delimited JSON, or a daemon
//! broadcast) is decided once at construction.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;

/// Classification of a single file change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
        }
    }
}

/// A classified file change, relative to the workspace root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: String,
    pub kind: ChangeKind,
}

/// Lifecycle event emitted by a watch session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WatchEvent {
    /// Initial registration finished
    Ready {
        root: String,
        files: usize,
        languages: Vec<String>,
        watched_dirs: usize,
    },
    /// A source file was added, modified or deleted
    FileChanged { path: String, change: ChangeKind },
    /// A generation pass is starting
    Updating { dirs: Vec<String> },
    /// A directory's build file was regenerated
    Updated { dir: String, build_file: String },
    /// A non-fatal error inside the session
    Error { message: String },
    /// The session stopped
    Shutdown {
        updates: u64,
        errors: u64,
        uptime_ms: u64,
    },
}

impl WatchEvent {
    /// Short name, matching the serialized `event` tag
    pub fn name(&self) -> &'static str {
        match self {
            WatchEvent::Ready { .. } => "ready",
            WatchEvent::FileChanged { .. } => "file_changed",
            WatchEvent::Updating { .. } => "updating",
            WatchEvent::Updated { .. } => "updated",
            WatchEvent::Error { .. } => "error",
            WatchEvent::Shutdown { .. } => "shutdown",
        }
    }
}

/// Receiver of lifecycle events
///
/// Implementations must not block for long: `emit` is called from the
/// watch loop and from the flush thread.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: WatchEvent);

    /// Called once when the session shuts down
    fn flush(&self) {}
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn emit(&self, event: WatchEvent) {
        (**self).emit(event)
    }

    fn flush(&self) {
        (**self).flush()
    }
}

/// Human-readable sink backed by `tracing`
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    verbose: bool,
}

impl LogSink {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl EventSink for LogSink {
    fn emit(&self, event: WatchEvent) {
        match event {
            WatchEvent::Ready {
                root,
                files,
                languages,
                watched_dirs,
            } => {
                let languages = if languages.is_empty() {
                    "all".to_string()
                } else {
                    languages.join(",")
                };
                crate::log_event!(
                    "watcher",
                    "ready",
                    "{root} ({files} files, {watched_dirs} dirs, languages: {languages})"
                );
            }
            WatchEvent::FileChanged { path, change } => {
                if self.verbose {
                    crate::log_event!("watcher", change.as_str(), "{path}");
                } else {
                    crate::debug_event!("watcher", change.as_str(), "{path}");
                }
            }
            WatchEvent::Updating { dirs } => {
                crate::log_event!("update", "updating", "{} dirs: {}", dirs.len(), dirs.join(" "));
            }
            WatchEvent::Updated { dir, build_file } => {
                crate::log_event!("update", "updated", "{dir}/{build_file}");
            }
            WatchEvent::Error { message } => {
                tracing::error!("[watcher] {message}");
            }
            WatchEvent::Shutdown {
                updates,
                errors,
                uptime_ms,
            } => {
                crate::log_event!(
                    "watcher",
                    "shutdown",
                    "{updates} updates, {errors} errors in {:.1}s",
                    uptime_ms as f64 / 1000.0
                );
            }
        }
    }
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    ts: String,
    #[serde(flatten)]
    event: &'a WatchEvent,
}

/// Line-delimited JSON sink
///
/// Each event becomes one object with an RFC 3339 `ts` field.
pub struct JsonSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonSink {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl EventSink for JsonSink {
    fn emit(&self, event: WatchEvent) {
        let record = JsonRecord {
            ts: chrono::Utc::now().to_rfc3339(),
            event: &event,
        };
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("failed to encode {} event: {e}", event.name());
                return;
            }
        };

        let mut out = self.out.lock();
        if let Err(e) = writeln!(out, "{line}") {
            tracing::warn!("failed to write {} event: {e}", event.name());
        }
    }

    fn flush(&self) {
        let _ = self.out.lock().flush();
    }
}
