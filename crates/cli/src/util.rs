//! Shared utilities for CLI commands

use anyhow::{Context, Result};
use bsync_core::config::{state_dir, STATE_DIR};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Files that mark a Bazel workspace root
const WORKSPACE_MARKERS: &[&str] = &["MODULE.bazel", "WORKSPACE", "WORKSPACE.bazel"];

/// Find the workspace root
///
/// An explicit `--root` wins. Otherwise walk up from the current directory
/// to the first directory holding `.bsync/` or a Bazel workspace marker,
/// falling back to the current directory.
pub fn find_workspace_root(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(root) = explicit {
        return root
            .canonicalize()
            .with_context(|| format!("Workspace root {} does not exist", root.display()));
    }

    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let mut current = cwd.as_path();

    loop {
        if current.join(STATE_DIR).is_dir()
            || WORKSPACE_MARKERS.iter().any(|m| current.join(m).is_file())
        {
            return Ok(current.to_path_buf());
        }

        match current.parent() {
            Some(parent) => current = parent,
            None => return Ok(cwd),
        }
    }
}

/// Directory for daemon logs
pub fn logs_dir(root: &Path) -> PathBuf {
    state_dir(root).join("logs")
}

/// Daemon log file name inside [`logs_dir`]
pub const DAEMON_LOG: &str = "daemon.log";

/// Format a duration compactly ("850ms", "2.4s", "3m 05s")
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{}ms", millis)
    } else if millis < 60_000 {
        format!("{:.1}s", duration.as_secs_f64())
    } else {
        let secs = duration.as_secs();
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}

/// Format timestamp as relative time ("2 hours ago")
pub fn format_relative_time(ts_ms: u64) -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let datetime = UNIX_EPOCH + Duration::from_millis(ts_ms);

    if let Ok(elapsed) = SystemTime::now().duration_since(datetime) {
        let seconds = elapsed.as_secs();

        if seconds < 60 {
            format!("{} seconds ago", seconds)
        } else if seconds < 3600 {
            format!("{} minutes ago", seconds / 60)
        } else if seconds < 86400 {
            format!("{} hours ago", seconds / 3600)
        } else {
            format!("{} days ago", seconds / 86400)
        }
    } else {
        "in the future".to_string()
    }
}

/// Format timestamp as local time ("2024-01-03 14:30:00")
pub fn format_absolute_time(ts_ms: u64) -> String {
    use chrono::{Local, TimeZone};

    match Local.timestamp_millis_opt(ts_ms as i64).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(850)), "850ms");
        assert_eq!(format_duration(Duration::from_millis(2400)), "2.4s");
        assert_eq!(format_duration(Duration::from_secs(185)), "3m 05s");
    }

    #[test]
    fn test_format_relative_time() {
        use std::time::{SystemTime, UNIX_EPOCH};

        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;

        assert!(format_relative_time(now_ms).contains("seconds ago"));
        assert!(format_relative_time(now_ms - 3600 * 1000).contains("hour"));
        assert!(format_relative_time(now_ms - 86400 * 1000).contains("day"));
        assert_eq!(format_relative_time(now_ms + 600_000), "in the future");
    }

    #[test]
    fn test_explicit_root_must_exist() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");
        assert!(find_workspace_root(Some(&missing)).is_err());

        let found = find_workspace_root(Some(temp_dir.path())).unwrap();
        assert_eq!(found, temp_dir.path().canonicalize().unwrap());
    }

    #[test]
    fn test_logs_dir_is_under_state_dir() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join(".bsync")).unwrap();
        assert!(logs_dir(temp_dir.path()).ends_with(".bsync/logs"));
    }
}
