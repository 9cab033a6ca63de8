//! Lock file management for daemon exclusivity

use crate::ipc::IpcError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Daemon lock file structure
pub struct DaemonLock {
    path: PathBuf,
    #[allow(dead_code)]
    file: File,
}

/// Lock file content
#[derive(Debug, Serialize, Deserialize)]
pub struct LockOwner {
    pub pid: u32,
    pub started_at: u64,
}

impl DaemonLock {
    /// Acquire exclusive daemon lock at `lock_path`
    ///
    /// Fails with [`IpcError::AlreadyRunning`] when the lock is held by a
    /// live process.
    pub fn acquire(lock_path: &Path) -> Result<Self> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create state directory")?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(lock_path)
            .context("Failed to open lock file")?;

        if !try_flock_exclusive(&file)? {
            if Self::is_stale_lock(&mut file) {
                tracing::warn!("Removing stale daemon lock {}", lock_path.display());
                drop(file);
                std::fs::remove_file(lock_path)?;
                return Self::acquire(lock_path);
            }
            return Err(IpcError::AlreadyRunning {
                path: lock_path.to_path_buf(),
            }
            .into());
        }

        Self::write_lock_content(&mut file)?;

        Ok(Self {
            path: lock_path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the daemon lock
    pub fn release(self) -> Result<()> {
        // The flock goes away with the descriptor; the file is removed explicitly
        std::fs::remove_file(&self.path).context("Failed to remove lock file")?;
        Ok(())
    }

    /// Owner recorded in a lock file, if readable
    pub fn read_owner(lock_path: &Path) -> Option<LockOwner> {
        let mut file = File::open(lock_path).ok()?;
        Self::read_lock_content(&mut file).ok()
    }

    fn is_stale_lock(file: &mut File) -> bool {
        match Self::read_lock_content(file) {
            Ok(content) => !is_process_alive(content.pid),
            // Half-written by a starting daemon
            Err(_) => false,
        }
    }

    fn write_lock_content(file: &mut File) -> Result<()> {
        let content = LockOwner {
            pid: std::process::id(),
            started_at: current_timestamp_ms(),
        };

        let serialized =
            serde_json::to_string(&content).context("Failed to serialize lock content")?;

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(serialized.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    fn read_lock_content(file: &mut File) -> Result<LockOwner> {
        file.seek(SeekFrom::Start(0))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let content: LockOwner =
            serde_json::from_str(&contents).context("Failed to deserialize lock content")?;
        Ok(content)
    }
}

impl Drop for DaemonLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Try to acquire exclusive file lock (non-blocking)
fn try_flock_exclusive(file: &File) -> Result<bool> {
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(_) => Ok(true),
        Err(nix::errno::Errno::EWOULDBLOCK) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Check if process is alive
fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // No signal: existence and permission check only
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        Err(_) => true,
    }
}

fn current_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_acquisition() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join(".bsync/daemon.lock");

        let lock1 = DaemonLock::acquire(&lock_path);
        assert!(lock1.is_ok());

        // Same process, but the flock is held through another descriptor
        let lock2 = DaemonLock::acquire(&lock_path);
        let err = lock2.err().unwrap();
        assert!(matches!(
            err.downcast_ref::<IpcError>(),
            Some(IpcError::AlreadyRunning { .. })
        ));

        drop(lock1);

        let lock3 = DaemonLock::acquire(&lock_path);
        assert!(lock3.is_ok());
    }

    #[test]
    fn test_lock_release() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("daemon.lock");

        let lock = DaemonLock::acquire(&lock_path).unwrap();
        assert!(lock_path.exists());

        let owner = DaemonLock::read_owner(&lock_path).unwrap();
        assert_eq!(owner.pid, std::process::id());
        assert!(owner.started_at > 0);

        lock.release().unwrap();
        assert!(!lock_path.exists());
    }

    #[test]
    fn test_process_alive_current() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn test_process_alive_nonexistent() {
        // PID 999999 is unlikely to exist
        assert!(!is_process_alive(999999));
    }
}
