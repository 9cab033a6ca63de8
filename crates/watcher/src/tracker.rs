//! Fingerprint tracker
//!
//! Remembers, per source directory, a cheap fingerprint of the files the
//! session cares about (count, newest mtime, total size). Comparing a fresh
//! scan against the last persisted snapshot tells which directories need
//! their build files regenerated, which catches changes made while no
//! watcher was running.

use crate::filter::{ExtensionFilter, IgnoreSet};
use bsync_core::config::state_dir;
use bsync_core::target::dir_key;
use bsync_core::{Tracker, TrackerError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Snapshot file name inside the state directory
pub const TRACKER_FILE: &str = "tracker.json";

const SNAPSHOT_VERSION: u32 = 1;

/// Fingerprint of the tracked files directly inside one directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirFingerprint {
    pub files: u64,
    pub newest_mtime_ms: u64,
    pub total_bytes: u64,
}

type Fingerprints = BTreeMap<String, DirFingerprint>;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    dirs: Fingerprints,
}

/// [`Tracker`] backed by directory fingerprints persisted as JSON
pub struct FingerprintTracker {
    root: PathBuf,
    state_path: PathBuf,
    filter: ExtensionFilter,
    ignore: IgnoreSet,
    snapshot: RwLock<Fingerprints>,
}

impl FingerprintTracker {
    /// Open the tracker for a workspace, loading `.bsync/tracker.json`
    pub fn open(root: &Path, filter: ExtensionFilter, ignore: IgnoreSet) -> Self {
        let state_path = state_dir(root).join(TRACKER_FILE);
        Self::with_state_path(root, state_path, filter, ignore)
    }

    /// Open with an explicit snapshot location
    ///
    /// A missing or unreadable snapshot starts empty, so every directory
    /// reports stale until the next refresh.
    pub fn with_state_path(
        root: &Path,
        state_path: PathBuf,
        filter: ExtensionFilter,
        ignore: IgnoreSet,
    ) -> Self {
        let snapshot = load_snapshot(&state_path);
        Self {
            root: root.to_path_buf(),
            state_path,
            filter,
            ignore,
            snapshot: RwLock::new(snapshot),
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Walk the tree and fingerprint every directory holding tracked files
    fn scan(&self) -> Result<Fingerprints, TrackerError> {
        std::fs::metadata(&self.root).map_err(|source| TrackerError::Io {
            path: self.root.clone(),
            source,
        })?;

        let mut dirs = Fingerprints::new();

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 || !entry.file_type().is_dir() {
                    return true;
                }
                match entry.path().strip_prefix(&self.root) {
                    Ok(relative) => !self.ignore.is_ignored_dir(relative),
                    Err(_) => false,
                }
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry during scan: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() || !self.filter.matches(entry.path()) {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            if self.ignore.is_ignored_file(relative) {
                continue;
            }

            // File may vanish between readdir and stat
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let mtime_ms = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);

            let key = dir_key(relative.parent().unwrap_or(Path::new("")));
            let fingerprint = dirs.entry(key).or_default();
            fingerprint.files += 1;
            fingerprint.total_bytes += metadata.len();
            fingerprint.newest_mtime_ms = fingerprint.newest_mtime_ms.max(mtime_ms);
        }

        Ok(dirs)
    }

    fn persist(&self, dirs: &Fingerprints) -> Result<(), TrackerError> {
        let io_err = |source| TrackerError::Io {
            path: self.state_path.clone(),
            source,
        };

        if let Some(parent) = self.state_path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            dirs: dirs.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)?;

        // Write-then-rename so a crash never leaves a torn snapshot
        let tmp = self.state_path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes).map_err(io_err)?;
        std::fs::rename(&tmp, &self.state_path).map_err(io_err)?;
        Ok(())
    }
}

fn load_snapshot(path: &Path) -> Fingerprints {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Fingerprints::new(),
        Err(e) => {
            warn!("Cannot read tracker state {}: {}", path.display(), e);
            return Fingerprints::new();
        }
    };

    match serde_json::from_slice::<Snapshot>(&bytes) {
        Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => snapshot.dirs,
        Ok(snapshot) => {
            warn!(
                "Ignoring tracker state {} with version {}",
                path.display(),
                snapshot.version
            );
            Fingerprints::new()
        }
        Err(e) => {
            warn!("Corrupt tracker state {}: {}", path.display(), e);
            Fingerprints::new()
        }
    }
}

impl Tracker for FingerprintTracker {
    fn tracked_file_count(&self) -> usize {
        {
            let snapshot = self.snapshot.read();
            if !snapshot.is_empty() {
                return snapshot.values().map(|f| f.files as usize).sum();
            }
        }

        // Never refreshed: count what is on disk
        match self.scan() {
            Ok(dirs) => dirs.values().map(|f| f.files as usize).sum(),
            Err(e) => {
                warn!("File count scan failed: {}", e);
                0
            }
        }
    }

    fn refresh(&self) -> Result<(), TrackerError> {
        let dirs = self.scan()?;
        self.persist(&dirs)?;
        debug!("Tracker refreshed: {} directories", dirs.len());
        *self.snapshot.write() = dirs;
        Ok(())
    }

    fn stale_dirs(&self) -> Result<Vec<String>, TrackerError> {
        let current = self.scan()?;
        let snapshot = self.snapshot.read();

        let keys: BTreeSet<&String> = current.keys().chain(snapshot.keys()).collect();
        Ok(keys
            .into_iter()
            .filter(|key| current.get(*key) != snapshot.get(*key))
            .cloned()
            .collect())
    }
}
