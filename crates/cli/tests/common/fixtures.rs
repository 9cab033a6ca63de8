//! Workspace fixtures and an in-process daemon harness

use bsync_cli::daemon::{self, Daemon};
use bsync_cli::ipc::Client;
use bsync_core::{GenerateError, GenerateOutput, Generator, Settings, Target};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::task::JoinHandle;

/// Temporary Bazel-style workspace with a few Go and Python packages
pub struct Workspace {
    dir: TempDir,
    root: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        // Canonical so paths compare equal to what the watcher reports
        let root = dir.path().canonicalize().unwrap();

        let workspace = Self { dir, root };
        workspace.write("MODULE.bazel", "module(name = \"fixture\")\n");
        workspace.write("cmd/app/main.go", "package main\n");
        workspace.write("lib/util/util.go", "package util\n");
        workspace.write("tools/gen.py", "print('gen')\n");
        workspace.write("docs/README.md", "not tracked\n");
        workspace
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn write(&self, relative: &str, contents: &str) {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    /// Write `.bsync/config.toml`
    pub fn write_config(&self, contents: &str) {
        self.write(".bsync/config.toml", contents);
    }

    /// Settings with a short debounce window
    pub fn settings(&self) -> Settings {
        let mut settings = Settings::default();
        settings.watch.debounce_ms = 50;
        settings
    }
}

/// Generator that records the targets of every call
#[derive(Default)]
pub struct RecordingGenerator {
    calls: Mutex<Vec<Vec<String>>>,
    failure: Mutex<Option<String>>,
    delay: Option<Duration>,
}

impl RecordingGenerator {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    /// Fail every later call with `stderr`
    pub fn fail_with(&self, stderr: &str) {
        *self.failure.lock() = Some(stderr.to_string());
    }
}

impl Generator for RecordingGenerator {
    fn generate(&self, _root: &Path, targets: &[Target]) -> Result<GenerateOutput, GenerateError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.calls
            .lock()
            .push(targets.iter().map(|t| t.as_str().to_string()).collect());

        if let Some(stderr) = self.failure.lock().clone() {
            return Err(GenerateError::Failed {
                status: Some(1),
                stderr,
            });
        }
        Ok(GenerateOutput::default())
    }
}

/// Daemon serving a [`Workspace`] from a background task
pub struct TestDaemon {
    pub daemon: Arc<Daemon>,
    pub socket: PathBuf,
    task: JoinHandle<anyhow::Result<()>>,
}

impl TestDaemon {
    pub async fn start(workspace: &Workspace, generator: Arc<RecordingGenerator>) -> Self {
        Self::start_with(workspace, workspace.settings(), generator).await
    }

    pub async fn start_with(
        workspace: &Workspace,
        settings: Settings,
        generator: Arc<RecordingGenerator>,
    ) -> Self {
        let daemon = Arc::new(Daemon::new(workspace.root(), settings, generator).unwrap());
        let socket = daemon.socket_path().to_path_buf();
        let task = tokio::spawn(daemon::serve(Arc::clone(&daemon), false));

        let ready = wait_until(Duration::from_secs(5), || socket.exists()).await;
        assert!(ready, "daemon socket never appeared at {}", socket.display());

        Self {
            daemon,
            socket,
            task,
        }
    }

    pub async fn client(&self) -> Client {
        Client::connect(&self.socket).await.unwrap()
    }

    /// Request shutdown and wait for the serve loop to return
    pub async fn stop(self) -> anyhow::Result<()> {
        self.daemon.request_shutdown();
        tokio::time::timeout(Duration::from_secs(10), self.task).await??
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` passes
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
