//! CLI command implementations

pub mod daemon;
pub mod ping;
pub mod start;
pub mod status;
pub mod stop;
pub mod update;
pub mod watch;

use anyhow::Result;
use bsync_cli::ipc::{Client, IpcError};
use bsync_core::{CommandGenerator, EventSink, JsonSink, LogSink, Settings};
use bsync_watcher::{ExtensionFilter, FingerprintTracker, IgnoreSet, SessionStats, Updater};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Resolved workspace and settings shared by every command
pub struct Context {
    pub root: PathBuf,
    pub settings: Settings,
    /// Machine-readable output
    pub json: bool,
}

impl Context {
    pub fn socket_path(&self) -> PathBuf {
        self.settings.socket_path(&self.root)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.daemon.call_timeout_ms)
    }

    pub async fn connect(&self) -> Result<Client, IpcError> {
        Client::connect(&self.socket_path()).await
    }

    /// Sink for events produced in this process
    pub fn event_sink(&self) -> Arc<dyn EventSink> {
        if self.json || self.settings.logging.json {
            Arc::new(JsonSink::stdout())
        } else {
            Arc::new(LogSink::new(self.settings.watch.verbose))
        }
    }

    /// Updater for running without a daemon
    pub fn local_updater(&self) -> Result<Arc<Updater>> {
        let generator = CommandGenerator::from_command(&self.settings.generator.command)?;
        let filter = ExtensionFilter::for_languages(&self.settings.languages)?;
        let ignore = IgnoreSet::new(
            &self.root,
            &self.settings.watch.ignore_prefixes,
            self.settings.watch.use_gitignore,
        )?;
        let tracker = FingerprintTracker::open(&self.root, filter, ignore);

        Ok(Arc::new(Updater::new(
            &self.root,
            Arc::new(generator),
            Arc::new(tracker),
            self.event_sink(),
            Arc::new(SessionStats::new()),
        )))
    }
}

/// Print a result as pretty JSON
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
