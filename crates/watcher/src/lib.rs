//! File system watching for buildsync
//!
//! This crate turns raw file system notifications into batched build-file
//! regeneration:
//! - Non-recursive watches on every non-ignored directory
//! - Exact extension filtering per language
//! - Per-directory debouncing with a pending ceiling
//! - Serialized generator passes with tracker refresh
//! - Fingerprint tracking for incremental passes

pub mod debounce;
pub mod error;
pub mod filter;
pub mod stats;
pub mod tracker;
pub mod update;

pub use debounce::Debouncer;
pub use error::{UpdateError, WatchError};
pub use filter::{ExtensionFilter, IgnoreSet};
pub use stats::{SessionStats, StatsSnapshot};
pub use tracker::FingerprintTracker;
pub use update::{UpdateOutcome, Updater};

use bsync_core::config::Settings;
use bsync_core::target::{dir_key, ROOT_DIR};
use bsync_core::{debug_event, log_event, ChangeKind, WatchEvent};
use error::{is_watch_limit, WATCH_LIMIT_HINT};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use walkdir::WalkDir;

/// Capacity of the notify -> watch loop channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Lifecycle of a watch session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Initializing,
    Watching,
    ShuttingDown,
    Stopped,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Initializing => "initializing",
            SessionState::Watching => "watching",
            SessionState::ShuttingDown => "shutting_down",
            SessionState::Stopped => "stopped",
        }
    }
}

/// Options for a watch session
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Workspace root; directory keys are relative to it
    pub root: PathBuf,
    /// Subtrees to watch (empty = the whole root)
    pub paths: Vec<PathBuf>,
    /// Language filter (empty = all known languages)
    pub languages: Vec<String>,
    /// Ignore prefixes on top of the built-in table
    pub ignore_prefixes: Vec<String>,
    pub use_gitignore: bool,
    pub debounce: Duration,
    pub max_pending_dirs: usize,
    pub verbose: bool,
}

impl WatchOptions {
    /// Options from workspace settings
    pub fn from_settings(root: &Path, settings: &Settings) -> Self {
        Self {
            root: root.to_path_buf(),
            paths: Vec::new(),
            languages: settings.languages.clone(),
            ignore_prefixes: settings.watch.ignore_prefixes.clone(),
            use_gitignore: settings.watch.use_gitignore,
            debounce: Duration::from_millis(settings.watch.debounce_ms),
            max_pending_dirs: settings.watch.max_pending_dirs,
            verbose: settings.watch.verbose,
        }
    }
}

/// A watch session over one workspace
pub struct Watcher {
    root: PathBuf,
    watch_paths: Vec<PathBuf>,
    filter: ExtensionFilter,
    ignore: IgnoreSet,
    verbose: bool,
    updater: Arc<Updater>,
    debouncer: Arc<Debouncer>,
    /// Directories currently holding a watch
    registry: Mutex<BTreeSet<PathBuf>>,
    backend: Mutex<RecommendedWatcher>,
    /// Taken by `run`; `None` once a session has started
    events: Mutex<Option<mpsc::Receiver<notify::Result<Event>>>>,
    state: Mutex<SessionState>,
}

impl Watcher {
    /// Build a session
    ///
    /// Fails when the language filter is invalid, a watch path is missing
    /// or outside the root, or the OS watch primitive cannot be created.
    pub fn new(options: WatchOptions, updater: Arc<Updater>) -> Result<Self, WatchError> {
        let root = options
            .root
            .canonicalize()
            .map_err(|e| WatchError::PathWatchFailed {
                path: options.root.clone(),
                reason: e.to_string(),
            })?;

        let mut watch_paths = Vec::new();
        for path in &options.paths {
            let absolute = if path.is_absolute() {
                path.clone()
            } else {
                root.join(path)
            };
            let canonical = absolute
                .canonicalize()
                .map_err(|e| WatchError::PathWatchFailed {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            if !canonical.is_dir() || !canonical.starts_with(&root) {
                return Err(WatchError::PathWatchFailed {
                    path: path.clone(),
                    reason: "not a directory inside the workspace root".to_string(),
                });
            }
            watch_paths.push(canonical);
        }
        if watch_paths.is_empty() {
            watch_paths.push(root.clone());
        }

        let filter = ExtensionFilter::for_languages(&options.languages)?;
        let ignore = IgnoreSet::new(&root, &options.ignore_prefixes, options.use_gitignore)
            .map_err(|e| WatchError::InitFailed {
                reason: format!("invalid ignore configuration: {e}"),
            })?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let backend = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.blocking_send(res);
        })?;

        let flush_updater = Arc::clone(&updater);
        let debouncer = Debouncer::new(options.debounce, options.max_pending_dirs, move |dirs| {
            if let Err(e) = flush_updater.update_dirs(dirs) {
                debug_event!("watcher", "flush failed", "{}", e);
            }
        })
        .map_err(|e| WatchError::InitFailed {
            reason: format!("cannot start debounce thread: {e}"),
        })?;

        Ok(Self {
            root,
            watch_paths,
            filter,
            ignore,
            verbose: options.verbose,
            updater,
            debouncer: Arc::new(debouncer),
            registry: Mutex::new(BTreeSet::new()),
            backend: Mutex::new(backend),
            events: Mutex::new(Some(rx)),
            state: Mutex::new(SessionState::Initializing),
        })
    }

    /// Run the session until `cancel` fires
    ///
    /// Registers every watched tree, emits `ready`, then processes events.
    /// On cancellation the pending batch is flushed before `shutdown` is
    /// emitted. A session runs at most once.
    ///
    /// Tree walks and event handling touch the file system, so they run on
    /// the blocking pool.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<(), WatchError> {
        let mut events = self.events.lock().take().ok_or(WatchError::AlreadyRunning)?;

        let registration = tokio::task::spawn_blocking({
            let watcher = Arc::clone(&self);
            move || -> Result<(), WatchError> {
                for path in &watcher.watch_paths {
                    watcher.register_tree(path, true)?;
                }
                Ok(())
            }
        })
        .await
        .unwrap_or_else(|e| {
            Err(WatchError::InitFailed {
                reason: format!("registration task failed: {e}"),
            })
        });
        if let Err(e) = registration {
            *self.state.lock() = SessionState::Stopped;
            return Err(e);
        }

        let files = self.updater.tracker().tracked_file_count();
        self.updater.sink().emit(WatchEvent::Ready {
            root: self.root.display().to_string(),
            files,
            languages: self.filter.languages().to_vec(),
            watched_dirs: self.watched_dirs(),
        });
        *self.state.lock() = SessionState::Watching;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = events.recv() => match received {
                    Some(Ok(event)) => {
                        let watcher = Arc::clone(&self);
                        if let Err(e) =
                            tokio::task::spawn_blocking(move || watcher.handle_event(event)).await
                        {
                            warn!("Event handler failed: {}", e);
                        }
                    }
                    Some(Err(e)) => self.report_error(format!("file watch error: {e}")),
                    None => {
                        self.report_error("file watch channel closed".to_string());
                        break;
                    }
                },
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(&self) {
        *self.state.lock() = SessionState::ShuttingDown;
        log_event!("watcher", "shutting down", "{} dirs pending", self.pending_count());

        let debouncer = Arc::clone(&self.debouncer);
        if let Err(e) = tokio::task::spawn_blocking(move || debouncer.stop()).await {
            warn!("Final flush did not complete: {}", e);
        }

        let stats = self.updater.stats().snapshot();
        let sink = self.updater.sink();
        sink.emit(WatchEvent::Shutdown {
            updates: stats.update_count,
            errors: stats.error_count,
            uptime_ms: stats.uptime.as_millis() as u64,
        });
        sink.flush();

        *self.state.lock() = SessionState::Stopped;
    }

    fn report_error(&self, message: String) {
        self.updater.stats().record_error();
        self.updater.sink().emit(WatchEvent::Error { message });
    }

    fn handle_event(&self, event: Event) {
        if event.need_rescan() {
            warn!("Event queue overflowed; scheduling a full pass");
            self.debouncer.add(ROOT_DIR);
        }

        for path in &event.paths {
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            if relative.as_os_str().is_empty() {
                continue;
            }

            let exists = path.exists();
            if path.is_dir() || self.registry.lock().contains(path) {
                self.handle_dir_event(path, relative, &event.kind, exists);
                continue;
            }

            if self.ignore.is_ignored_file(relative) || !self.filter.matches(path) {
                continue;
            }
            let Some(change) = classify(&event.kind, exists) else {
                continue;
            };

            let rel = relative.to_string_lossy().replace('\\', "/");
            if self.verbose {
                debug_event!("watcher", "accepted", "{:?} {}", event.kind, rel);
            }
            self.updater.sink().emit(WatchEvent::FileChanged { path: rel, change });
            self.debouncer
                .add(dir_key(relative.parent().unwrap_or(Path::new(""))));
        }
    }

    fn handle_dir_event(&self, path: &Path, relative: &Path, kind: &EventKind, exists: bool) {
        if self.ignore.is_ignored_dir(relative) {
            return;
        }

        match classify(kind, exists) {
            Some(ChangeKind::Added) if exists => {
                if let Err(e) = self.register_tree(path, false) {
                    self.report_error(e.to_string());
                }
            }
            Some(ChangeKind::Deleted) if !exists => self.forget_tree(path),
            _ => {}
        }
    }

    /// Watch `start` and every non-ignored directory below it
    ///
    /// During the initial walk a watch-limit error is fatal. Later (for
    /// directories created or moved in) it aborts only that subtree, and
    /// directories that already hold sources are queued for an update.
    fn register_tree(&self, start: &Path, initial: bool) -> Result<usize, WatchError> {
        let mut registered = 0;
        let mut source_dirs = BTreeSet::new();

        let walker = WalkDir::new(start)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                if !entry.file_type().is_dir() {
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
                    warn!("[watcher] skipping unreadable entry: {e}");
                    continue;
                }
            };

            if entry.file_type().is_dir() {
                match self.watch_dir(entry.path()) {
                    Ok(true) => registered += 1,
                    Ok(false) => {}
                    Err(e) if is_watch_limit(&e) => {
                        return Err(WatchError::WatchLimit {
                            path: entry.path().to_path_buf(),
                            hint: WATCH_LIMIT_HINT,
                        });
                    }
                    Err(e) => {
                        warn!("[watcher] failed to watch {}: {e}", entry.path().display());
                    }
                }
            } else if !initial && entry.file_type().is_file() && self.filter.matches(entry.path()) {
                if let Some(parent) = entry.path().parent() {
                    if let Ok(relative) = parent.strip_prefix(&self.root) {
                        source_dirs.insert(dir_key(relative));
                    }
                }
            }
        }

        if initial {
            log_event!("watcher", "registered", "{} dirs under {}", registered, start.display());
        } else {
            debug_event!("watcher", "registered", "{} dirs under {}", registered, start.display());
            for dir in source_dirs {
                self.debouncer.add(dir);
            }
        }

        Ok(registered)
    }

    /// Add a watch; returns false when the directory is already registered
    fn watch_dir(&self, dir: &Path) -> Result<bool, notify::Error> {
        let mut registry = self.registry.lock();
        if registry.contains(dir) {
            return Ok(false);
        }
        self.backend.lock().watch(dir, RecursiveMode::NonRecursive)?;
        registry.insert(dir.to_path_buf());
        debug_event!("watcher", "watching", "{}", dir.display());
        Ok(true)
    }

    /// Drop `dir` and everything below it from the registry
    fn forget_tree(&self, dir: &Path) {
        let mut registry = self.registry.lock();
        let gone: Vec<PathBuf> = registry
            .iter()
            .filter(|path| path.starts_with(dir))
            .cloned()
            .collect();

        let mut backend = self.backend.lock();
        for path in &gone {
            registry.remove(path);
            // The kernel usually dropped the watch already
            let _ = backend.unwatch(path);
        }
        debug_event!("watcher", "forgot", "{} dirs under {}", gone.len(), dir.display());
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn watch_paths(&self) -> &[PathBuf] {
        &self.watch_paths
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn watched_dirs(&self) -> usize {
        self.registry.lock().len()
    }

    /// Directories waiting for the next flush
    pub fn pending_count(&self) -> usize {
        self.debouncer.pending_count()
    }

    pub fn debounce_window(&self) -> Duration {
        self.debouncer.window()
    }

    pub fn languages(&self) -> &[String] {
        self.filter.languages()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.updater.stats().snapshot()
    }
}

/// Classify a raw event for a path
///
/// `exists` disambiguates renames the backend could not pair. Metadata-only
/// changes and accesses are dropped.
pub fn classify(kind: &EventKind, exists: bool) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Added),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(ChangeKind::Added),
        EventKind::Modify(ModifyKind::Name(_)) => Some(if exists {
            ChangeKind::Added
        } else {
            ChangeKind::Deleted
        }),
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Deleted),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}
