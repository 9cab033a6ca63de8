//! Generation passes
//!
//! The [`Updater`] is the only path to the generator. Watch-session flushes
//! and on-demand `update_run` requests both go through it, and its mutex
//! covers the generator call plus the tracker refresh, so at most one pass
//! runs at a time and overlapping requests queue.

use crate::error::UpdateError;
use crate::stats::SessionStats;
use bsync_core::target::{build_file_name, dir_path, ROOT_DIR};
use bsync_core::{debug_event, EventSink, Generator, Target, Tracker, WatchEvent};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Result of one successful pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateOutcome {
    /// Directory keys handed to the generator, sorted
    pub updated: Vec<String>,
    pub elapsed: Duration,
}

/// Serializes generator invocations and reports their outcome
pub struct Updater {
    root: PathBuf,
    generator: Arc<dyn Generator>,
    tracker: Arc<dyn Tracker>,
    sink: Arc<dyn EventSink>,
    stats: Arc<SessionStats>,
    lock: Mutex<()>,
}

impl Updater {
    pub fn new(
        root: &Path,
        generator: Arc<dyn Generator>,
        tracker: Arc<dyn Tracker>,
        sink: Arc<dyn EventSink>,
        stats: Arc<SessionStats>,
    ) -> Self {
        Self {
            root: root.to_path_buf(),
            generator,
            tracker,
            sink,
            stats,
            lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tracker(&self) -> &Arc<dyn Tracker> {
        &self.tracker
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    pub fn stats(&self) -> &Arc<SessionStats> {
        &self.stats
    }

    /// Regenerate build files for a batch of directory keys
    ///
    /// Blocks while another pass is running. An empty batch is a no-op.
    pub fn update_dirs(&self, mut dirs: Vec<String>) -> Result<UpdateOutcome, UpdateError> {
        let _guard = self.lock.lock();
        let started = Instant::now();

        dirs.sort();
        dirs.dedup();
        if dirs.is_empty() {
            return Ok(UpdateOutcome {
                updated: dirs,
                elapsed: started.elapsed(),
            });
        }

        let targets: Vec<Target> = dirs.iter().map(|dir| Target::for_dir(dir)).collect();
        self.sink.emit(WatchEvent::Updating { dirs: dirs.clone() });

        match self.generator.generate(&self.root, &targets) {
            Ok(output) => {
                if !output.diagnostics.is_empty() {
                    debug_event!("update", "generator output", "{}", output.diagnostics);
                }
            }
            Err(e) => {
                self.stats.record_error();
                self.sink.emit(WatchEvent::Error {
                    message: format!("update of {} dirs failed: {e}", dirs.len()),
                });
                return Err(e.into());
            }
        }

        if let Err(e) = self.tracker.refresh() {
            warn!("Tracker refresh failed after update: {}", e);
        }
        self.stats.record_update();

        for dir in &dirs {
            let build_file = build_file_name(&dir_path(&self.root, dir));
            self.sink.emit(WatchEvent::Updated {
                dir: dir.clone(),
                build_file: build_file.to_string(),
            });
        }

        Ok(UpdateOutcome {
            updated: dirs,
            elapsed: started.elapsed(),
        })
    }

    /// Run a pass over the whole tree, or only the stale directories
    pub fn run_pass(&self, incremental: bool) -> Result<UpdateOutcome, UpdateError> {
        let dirs = if incremental {
            self.tracker.stale_dirs()?
        } else {
            vec![ROOT_DIR.to_string()]
        };
        self.update_dirs(dirs)
    }
}
