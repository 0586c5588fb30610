//! Pid files for the supervisor and the managed application
//!
//! A pid file holds one line: the pid. It is removed on controlled shutdown,
//! and only when this invocation created it.

use crate::persistence::write_file_atomic;
use crate::{CoreError, Result};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A pid file written by this process
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    pid: u32,
}

impl PidFile {
    /// Write the supervisor pid file, refusing to start when it names a live process
    pub fn acquire(path: impl AsRef<Path>, pid: u32) -> Result<Self> {
        let path = path.as_ref();
        if let Some(existing) = read_pid(path)? {
            if u32::try_from(existing).ok() != Some(pid) && is_process_alive(existing) {
                return Err(CoreError::AlreadyRunning { pid: existing });
            }
            warn!(
                "Replacing stale pid file {} (pid {} is not running)",
                path.display(),
                existing
            );
        }
        Self::write(path, pid)
    }

    /// Write a pid file unconditionally
    pub fn write(path: impl AsRef<Path>, pid: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        write_file_atomic(&path, format!("{}\n", pid).as_bytes())?;
        debug!("Wrote pid {} to {}", pid, path.display());
        Ok(Self { path, pid })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Remove the file if it still holds our pid
    pub fn release(self) {
        match read_pid(&self.path) {
            Ok(Some(pid)) if pid as u32 == self.pid => {
                if let Err(e) = fs::remove_file(&self.path) {
                    warn!("Failed to remove pid file {}: {}", self.path.display(), e);
                }
            }
            Ok(_) => debug!(
                "Pid file {} no longer ours, leaving it in place",
                self.path.display()
            ),
            Err(e) => warn!("Failed to read pid file {}: {}", self.path.display(), e),
        }
    }
}

/// Read the pid stored in a pid file, if any
pub fn read_pid(path: impl AsRef<Path>) -> Result<Option<i32>> {
    let path = path.as_ref();
    match fs::read_to_string(path) {
        Ok(contents) => {
            let trimmed = contents.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed.parse::<i32>().map(Some).map_err(|_| {
                CoreError::ValidationError(format!(
                    "pid file {} does not contain a pid: {:?}",
                    path.display(),
                    trimmed
                ))
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CoreError::IoError(e)),
    }
}

/// Whether a process with this pid exists
pub fn is_process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_and_release() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("warden.pid");

        let pid_file = PidFile::acquire(&path, std::process::id()).unwrap();
        assert_eq!(read_pid(&path).unwrap(), Some(std::process::id() as i32));
        pid_file.release();
        assert!(!path.exists());
    }

    #[test]
    fn own_pid_is_not_a_conflict() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("warden.pid");
        fs::write(&path, format!("{}\n", std::process::id())).unwrap();

        let pid_file = PidFile::acquire(&path, std::process::id()).unwrap();
        assert_eq!(pid_file.pid(), std::process::id());
        pid_file.release();
        assert!(!path.exists());
    }

    #[test]
    fn live_pid_refuses_start() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("warden.pid");
        // pid 1 always exists
        fs::write(&path, "1\n").unwrap();

        let err = PidFile::acquire(&path, std::process::id()).unwrap_err();
        assert!(matches!(err, CoreError::AlreadyRunning { pid: 1 }));
    }

    #[test]
    fn stale_pid_is_replaced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("warden.pid");
        fs::write(&path, format!("{}\n", i32::MAX - 1)).unwrap();

        let pid_file = PidFile::acquire(&path, 4242).unwrap();
        assert_eq!(read_pid(&path).unwrap(), Some(4242));
        assert_eq!(pid_file.pid(), 4242);
    }

    #[test]
    fn release_leaves_foreign_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.pid");
        let pid_file = PidFile::write(&path, 100).unwrap();
        fs::write(&path, "200\n").unwrap();
        pid_file.release();
        assert_eq!(read_pid(&path).unwrap(), Some(200));
    }

    #[test]
    fn garbage_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.pid");
        fs::write(&path, "not-a-pid").unwrap();
        assert!(read_pid(&path).is_err());
        assert_eq!(read_pid(dir.path().join("missing.pid")).unwrap(), None);
    }
}
