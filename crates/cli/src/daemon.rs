//! Daemon lifecycle management
//!
//! The daemon owns one [`Updater`] (so the single-generator rule spans the
//! watch session and on-demand passes), at most one watch session, and the
//! socket server. Lifecycle events are logged and broadcast to every
//! connected client as `watch_event` notifications.

use crate::ipc::protocol::{
    codes, methods, PingResult, ShutdownResult, StatusGetResult, UpdateRunParams,
    UpdateRunResult, WatchStartParams, WatchStartResult, WatchStatusResult, WatchStopResult,
};
use crate::ipc::{IpcServer, Notification, RequestHandler, RpcError};
use crate::locks::DaemonLock;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bsync_core::config::Settings;
use bsync_core::{
    debug_event, log_event, CommandGenerator, EventSink, GenerateError, Generator, LogSink,
    Tracker, WatchEvent,
};
use bsync_watcher::{
    ExtensionFilter, FingerprintTracker, IgnoreSet, SessionState, SessionStats, UpdateError,
    Updater, WatchError, WatchOptions, Watcher,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, UNIX_EPOCH};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Notifications buffered per client before it is reported as lagging
const EVENT_CAPACITY: usize = 1024;

/// Sink that logs locally and broadcasts to connected clients
pub struct NotifyingSink {
    local: LogSink,
    events: broadcast::Sender<Notification>,
}

impl NotifyingSink {
    pub fn new(local: LogSink, events: broadcast::Sender<Notification>) -> Self {
        Self { local, events }
    }
}

impl EventSink for NotifyingSink {
    fn emit(&self, event: WatchEvent) {
        match Notification::watch_event(&event) {
            Ok(notification) => {
                // No receivers is fine
                if self.events.send(notification).is_err() {
                    debug_event!("daemon", "no subscribers", "{}", event.name());
                }
            }
            Err(e) => warn!("[daemon] cannot encode {} event: {e}", event.name()),
        }
        self.local.emit(event);
    }

    fn flush(&self) {
        self.local.flush();
    }
}

struct WatchSession {
    watcher: Arc<Watcher>,
    cancel: CancellationToken,
    task: JoinHandle<Result<(), WatchError>>,
}

/// Request handler and state of a running daemon
pub struct Daemon {
    root: PathBuf,
    settings: Settings,
    socket_path: PathBuf,
    updater: Arc<Updater>,
    tracker: Arc<dyn Tracker>,
    events: broadcast::Sender<Notification>,
    session: Mutex<Option<WatchSession>>,
    shutdown: CancellationToken,
    started: Instant,
}

impl Daemon {
    /// Build a daemon for `root` with an explicit generator
    pub fn new(root: &Path, settings: Settings, generator: Arc<dyn Generator>) -> Result<Self> {
        let filter = ExtensionFilter::for_languages(&settings.languages)?;
        let ignore = IgnoreSet::new(
            root,
            &settings.watch.ignore_prefixes,
            settings.watch.use_gitignore,
        )?;
        let tracker: Arc<dyn Tracker> = Arc::new(FingerprintTracker::open(root, filter, ignore));

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let sink = Arc::new(NotifyingSink::new(
            LogSink::new(settings.watch.verbose),
            events.clone(),
        ));
        let updater = Arc::new(Updater::new(
            root,
            generator,
            Arc::clone(&tracker),
            sink,
            Arc::new(SessionStats::new()),
        ));

        Ok(Self {
            root: root.to_path_buf(),
            socket_path: settings.socket_path(root),
            settings,
            updater,
            tracker,
            events,
            session: Mutex::new(None),
            shutdown: CancellationToken::new(),
            started: Instant::now(),
        })
    }

    /// Build a daemon running the configured generator command
    pub fn from_settings(root: &Path, settings: Settings) -> Result<Self> {
        let generator = CommandGenerator::from_command(&settings.generator.command)?;
        Self::new(root, settings, Arc::new(generator))
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Token cancelled when the daemon starts shutting down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn request_shutdown(&self) {
        log_event!("daemon", "shutdown requested");
        self.shutdown.cancel();
    }

    fn ping(&self) -> PingResult {
        PingResult {
            pong: true,
            pid: std::process::id(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_ms: self.started.elapsed().as_millis() as u64,
        }
    }

    /// Start the watch session
    ///
    /// Returns once every tree is registered, or with the registration error.
    pub async fn watch_start(&self, params: WatchStartParams) -> Result<WatchStartResult, RpcError> {
        let mut session = self.session.lock().await;

        if let Some(existing) = session.as_ref() {
            if !existing.task.is_finished() {
                return Err(RpcError::new(
                    codes::WATCH_ALREADY_RUNNING,
                    "watch session already running",
                ));
            }
        }
        if let Some(finished) = session.take() {
            reap(finished.task).await;
        }

        let mut options = WatchOptions::from_settings(&self.root, &self.settings);
        options.paths = params.paths.iter().map(PathBuf::from).collect();
        if let Some(debounce_ms) = params.debounce_ms {
            options.debounce = Duration::from_millis(debounce_ms);
        }
        if let Some(languages) = params.languages {
            options.languages = languages;
        }

        let watcher = Arc::new(
            Watcher::new(options, Arc::clone(&self.updater)).map_err(watch_error_to_rpc)?,
        );
        let cancel = self.shutdown.child_token();
        let mut task = tokio::spawn({
            let watcher = Arc::clone(&watcher);
            let cancel = cancel.clone();
            async move { watcher.run(cancel).await }
        });

        // A failed registration stops the session before the task ends
        while watcher.state() != SessionState::Watching {
            if task.is_finished() {
                return Err(match (&mut task).await {
                    Ok(Err(e)) => watch_error_to_rpc(e),
                    Ok(Ok(())) => RpcError::internal("watch session ended during startup"),
                    Err(e) => RpcError::internal(format!("watch session failed: {e}")),
                });
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let result = WatchStartResult {
            root: watcher.root().display().to_string(),
            paths: self.relative_paths(&watcher),
            debounce_ms: watcher.debounce_window().as_millis() as u64,
            languages: watcher.languages().to_vec(),
            watched_dirs: watcher.watched_dirs(),
        };

        *session = Some(WatchSession {
            watcher,
            cancel,
            task,
        });
        Ok(result)
    }

    /// Stop the watch session, flushing pending directories first
    pub async fn watch_stop(&self) -> Result<WatchStopResult, RpcError> {
        let session = self.session.lock().await.take().ok_or_else(|| {
            RpcError::new(codes::WATCH_NOT_RUNNING, "no watch session is running")
        })?;

        session.cancel.cancel();
        reap(session.task).await;

        let stats = self.updater.stats().snapshot();
        Ok(WatchStopResult {
            stopped: true,
            updates: stats.update_count,
            errors: stats.error_count,
        })
    }

    pub async fn watch_status(&self) -> WatchStatusResult {
        let session = self.session.lock().await;
        let stats = self.updater.stats().snapshot();

        let mut result = WatchStatusResult {
            root: self.root.display().to_string(),
            updates: stats.update_count,
            errors: stats.error_count,
            uptime_ms: stats.uptime.as_millis() as u64,
            last_update_ms: stats
                .last_update
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as u64),
            ..WatchStatusResult::default()
        };

        if let Some(session) = session.as_ref() {
            let watcher = &session.watcher;
            let state = watcher.state();
            result.running = !session.task.is_finished()
                && matches!(state, SessionState::Initializing | SessionState::Watching);
            result.state = Some(state.as_str().to_string());
            result.paths = self.relative_paths(watcher);
            result.languages = watcher.languages().to_vec();
            result.watched_dirs = watcher.watched_dirs();
            result.pending_dirs = watcher.pending_count();
            result.debounce_ms = watcher.debounce_window().as_millis() as u64;
        }

        result
    }

    /// Run one generation pass (queues behind any in-flight pass)
    pub async fn update_run(&self, params: UpdateRunParams) -> Result<UpdateRunResult, RpcError> {
        let updater = Arc::clone(&self.updater);
        let outcome = tokio::task::spawn_blocking(move || updater.run_pass(params.incremental))
            .await
            .map_err(|e| RpcError::internal(format!("update task failed: {e}")))?;

        match outcome {
            Ok(outcome) => Ok(UpdateRunResult {
                updated: outcome.updated,
                elapsed_ms: outcome.elapsed.as_millis() as u64,
            }),
            Err(UpdateError::Generate(e)) => {
                let error = RpcError::new(codes::GENERATE_FAILED, e.to_string());
                Err(match e {
                    GenerateError::Failed { status, stderr } => {
                        error.with_data(json!({ "status": status, "stderr": stderr }))
                    }
                    GenerateError::Spawn { .. } => error,
                })
            }
            Err(UpdateError::Tracker(e)) => Err(RpcError::internal(e.to_string())),
        }
    }

    /// Directories whose sources changed since the last pass
    pub async fn status_get(&self) -> Result<StatusGetResult, RpcError> {
        let tracker = Arc::clone(&self.tracker);
        let (dirs, tracked_files) = tokio::task::spawn_blocking(move || {
            tracker
                .stale_dirs()
                .map(|dirs| (dirs, tracker.tracked_file_count()))
        })
        .await
        .map_err(|e| RpcError::internal(format!("status task failed: {e}")))?
        .map_err(|e| RpcError::internal(e.to_string()))?;

        Ok(StatusGetResult {
            stale: !dirs.is_empty(),
            dirs,
            tracked_files,
        })
    }

    /// Stop the watch session if one is running
    pub async fn stop_watch_session(&self) {
        if let Ok(stopped) = self.watch_stop().await {
            log_event!(
                "daemon",
                "watch stopped",
                "{} updates, {} errors",
                stopped.updates,
                stopped.errors
            );
        }
    }

    fn relative_paths(&self, watcher: &Watcher) -> Vec<String> {
        watcher
            .watch_paths()
            .iter()
            .map(|path| {
                let relative = path.strip_prefix(watcher.root()).unwrap_or(path);
                bsync_core::target::dir_key(relative)
            })
            .collect()
    }
}

#[async_trait]
impl RequestHandler for Daemon {
    async fn handle(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            methods::PING => to_value(self.ping()),
            methods::SHUTDOWN => {
                self.request_shutdown();
                to_value(ShutdownResult { stopping: true })
            }
            methods::WATCH_START => to_value(self.watch_start(parse_params(params)?).await?),
            methods::WATCH_STOP => to_value(self.watch_stop().await?),
            methods::WATCH_STATUS => to_value(self.watch_status().await),
            methods::UPDATE_RUN => to_value(self.update_run(parse_params(params)?).await?),
            methods::STATUS_GET => to_value(self.status_get().await?),
            other => Err(RpcError::method_not_found(other)),
        }
    }
}

fn parse_params<T: DeserializeOwned + Default>(params: Value) -> Result<T, RpcError> {
    if params.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(params).map_err(|e| RpcError::invalid_params(e.to_string()))
}

fn to_value<T: Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::internal(e.to_string()))
}

fn watch_error_to_rpc(error: WatchError) -> RpcError {
    let code = match &error {
        WatchError::Config(_) | WatchError::PathWatchFailed { .. } => codes::INVALID_PARAMS,
        WatchError::AlreadyRunning => codes::WATCH_ALREADY_RUNNING,
        WatchError::InitFailed { .. } | WatchError::WatchLimit { .. } => codes::INTERNAL_ERROR,
    };
    RpcError::new(code, error.to_string())
}

async fn reap(task: JoinHandle<Result<(), WatchError>>) {
    match task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("[daemon] watch session ended with error: {e}"),
        Err(e) => warn!("[daemon] watch session task failed: {e}"),
    }
}

/// Serve `daemon` on its socket until shutdown
///
/// Holds the lock file for the whole run. On shutdown the watch session is
/// stopped (flushing pending work) and the socket and lock are removed.
pub async fn serve(daemon: Arc<Daemon>, watch_at_boot: bool) -> Result<()> {
    let socket = daemon.socket_path().to_path_buf();
    let lock_path = socket.with_extension("lock");
    let lock = DaemonLock::acquire(&lock_path).map_err(|e| {
        match DaemonLock::read_owner(&lock_path) {
            Some(owner) => e.context(format!("Daemon already running as pid {}", owner.pid)),
            None => e,
        }
    })?;
    let server = IpcServer::bind(&socket)?;

    if watch_at_boot {
        daemon
            .watch_start(WatchStartParams::default())
            .await
            .context("Failed to start watching")?;
    }

    log_event!(
        "daemon",
        "started",
        "pid {} serving {} on {}",
        std::process::id(),
        daemon.root.display(),
        socket.display()
    );

    let events = daemon.events.clone();
    let shutdown = daemon.shutdown_token();
    server.serve(Arc::clone(&daemon), events, shutdown).await?;

    daemon.stop_watch_session().await;
    lock.release()?;
    log_event!("daemon", "stopped");
    Ok(())
}

/// Run the daemon in this process until `shutdown`, SIGINT or SIGTERM
pub async fn run(root: &Path, settings: Settings, watch_at_boot: bool) -> Result<()> {
    let daemon = Arc::new(Daemon::from_settings(root, settings)?);
    listen_for_signals(daemon.shutdown_token());
    serve(daemon, watch_at_boot).await
}

fn listen_for_signals(shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(e) => {
                warn!("[daemon] cannot listen for SIGTERM: {e}");
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => log_event!("daemon", "interrupted"),
            _ = terminate.recv() => log_event!("daemon", "terminated"),
            _ = shutdown.cancelled() => return,
        }
        shutdown.cancel();
    });
}

/// Is a daemon answering on `socket_path`?
pub async fn is_running(socket_path: &Path) -> bool {
    match crate::ipc::Client::connect(socket_path).await {
        Ok(client) => client
            .call_timeout::<_, PingResult>(methods::PING, Value::Null, Duration::from_secs(2))
            .await
            .is_ok(),
        Err(_) => false,
    }
}
