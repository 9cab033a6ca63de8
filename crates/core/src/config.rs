//! Workspace configuration
//!
//! Loaded from `<root>/.bsync/config.toml` when present. Every field has a
//! serde default so a partial (or missing) file is valid; CLI flags are
//! applied on top by the caller.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Directory holding config, socket, lock, logs and tracker state
pub const STATE_DIR: &str = ".bsync";

/// Config file name inside [`STATE_DIR`]
pub const CONFIG_FILE: &str = "config.toml";

/// Default debounce window
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Default ceiling on pending directories before an immediate flush
pub const DEFAULT_MAX_PENDING_DIRS: usize = 100;

/// Top-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Languages to react to (empty = all known languages)
    #[serde(default)]
    pub languages: Vec<String>,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub generator: GeneratorConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Watch session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Debounce window in milliseconds (default: 500)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Pending directories that force an immediate flush (default: 100)
    #[serde(default = "default_max_pending_dirs")]
    pub max_pending_dirs: usize,

    /// Directory-name prefixes ignored on top of the built-in table
    #[serde(default)]
    pub ignore_prefixes: Vec<String>,

    /// Also honour the root `.gitignore` (default: false)
    #[serde(default)]
    pub use_gitignore: bool,

    /// Log every accepted file change (default: false)
    #[serde(default)]
    pub verbose: bool,
}

/// External generator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Program and leading arguments; targets are appended
    #[serde(default = "default_generator_command")]
    pub command: Vec<String>,
}

/// Daemon settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Socket path, relative to the root unless absolute
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Client-side wait for a single RPC (default: 30s)
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module level overrides
    #[serde(default)]
    pub modules: BTreeMap<String, String>,

    /// Emit lifecycle events as line-delimited JSON
    #[serde(default)]
    pub json: bool,
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_max_pending_dirs() -> usize {
    DEFAULT_MAX_PENDING_DIRS
}

fn default_generator_command() -> Vec<String> {
    vec!["gazelle".to_string()]
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(STATE_DIR).join("daemon.sock")
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            languages: Vec::new(),
            watch: WatchConfig::default(),
            generator: GeneratorConfig::default(),
            daemon: DaemonConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_pending_dirs: default_max_pending_dirs(),
            ignore_prefixes: Vec::new(),
            use_gitignore: false,
            verbose: false,
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: default_generator_command(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: BTreeMap::new(),
            json: false,
        }
    }
}

impl Settings {
    /// Load settings for a workspace root
    ///
    /// A missing config file yields the defaults.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let path = root.join(STATE_DIR).join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::from_file(&path)
    }

    /// Load settings from an explicit file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings that cannot produce a working session
    pub fn validate(&self) -> Result<(), ConfigError> {
        crate::lang::resolve(&self.languages)?;
        if self.generator.command.is_empty() {
            return Err(ConfigError::EmptyGeneratorCommand);
        }
        Ok(())
    }

    /// Absolute socket path for a root
    pub fn socket_path(&self, root: &Path) -> PathBuf {
        if self.daemon.socket_path.is_absolute() {
            self.daemon.socket_path.clone()
        } else {
            root.join(&self.daemon.socket_path)
        }
    }
}

/// State directory for a root
pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::load(temp_dir.path()).unwrap();

        assert_eq!(settings.watch.debounce_ms, DEFAULT_DEBOUNCE_MS);
        assert_eq!(settings.watch.max_pending_dirs, DEFAULT_MAX_PENDING_DIRS);
        assert_eq!(settings.generator.command, vec!["gazelle".to_string()]);
        assert!(settings.languages.is_empty());
        assert_eq!(
            settings.socket_path(temp_dir.path()),
            temp_dir.path().join(".bsync/daemon.sock")
        );
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join(STATE_DIR)).unwrap();
        fs::write(
            temp_dir.path().join(STATE_DIR).join(CONFIG_FILE),
            "languages = [\"go\"]\n[watch]\ndebounce_ms = 250\n[logging.modules]\nbsync_watcher = \"debug\"\n",
        )
        .unwrap();

        let settings = Settings::load(temp_dir.path()).unwrap();
        assert_eq!(settings.languages, vec!["go".to_string()]);
        assert_eq!(settings.watch.debounce_ms, 250);
        assert_eq!(settings.watch.max_pending_dirs, DEFAULT_MAX_PENDING_DIRS);
        assert_eq!(settings.logging.modules["bsync_watcher"], "debug");
    }

    #[test]
    fn test_unknown_language_rejected() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join(STATE_DIR)).unwrap();
        fs::write(
            temp_dir.path().join(STATE_DIR).join(CONFIG_FILE),
            "languages = [\"fortran77\"]\n",
        )
        .unwrap();

        let err = Settings::load(temp_dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownLanguage { .. }));
    }

    #[test]
    fn test_absolute_socket_path_kept() {
        let mut settings = Settings::default();
        settings.daemon.socket_path = PathBuf::from("/tmp/bsync.sock");
        assert_eq!(
            settings.socket_path(Path::new("/repo")),
            PathBuf::from("/tmp/bsync.sock")
        );
    }
}
