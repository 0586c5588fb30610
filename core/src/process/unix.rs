//! Unix process management with safe spawn/kill using process groups
//!
//! This module provides Unix-specific process management capabilities that use
//! process groups (via `setsid()`) to ensure safe and reliable process cleanup.
//!
//! ## Safety
//!
//! - All spawned processes are placed in their own process group using `setsid()`
//! - Signals are sent to the entire process group to ensure cleanup of child processes
//! - SIGTERM is used for graceful termination, SIGKILL for forceful termination
//! - ESRCH and EPERM while signaling mean the group is already gone
//!
//! ## Process Groups
//!
//! When a process calls `setsid()`, it:
//! - Creates a new session and becomes the session leader
//! - Creates a new process group and becomes the process group leader
//! - Has no controlling terminal
//!
//! Terminal-generated signals (Ctrl-C) therefore reach only the supervisor,
//! which decides what to forward.

#![allow(unsafe_code)]

use crate::{CoreError, Result};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use schema::ProcessSpec;
#[allow(unused_imports)]
use std::os::unix::process::CommandExt;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, error};

/// A child process managed with Unix process groups
#[derive(Debug)]
pub struct ChildProcess {
    /// The process ID of the spawned process
    pid: Pid,
    /// The underlying Child handle for waiting and status checking
    child: Child,
}

impl ChildProcess {
    /// Get the process ID
    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Get the process group ID (same as PID for session leaders)
    pub fn pgid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Wait for the process to exit and return its exit status (async)
    pub async fn wait(&mut self) -> Result<std::process::ExitStatus> {
        self.child.wait().await.map_err(|e| {
            CoreError::ProcessWait(format!("Failed to wait for process {}: {}", self.pid, e))
        })
    }

    /// Try to wait for the process to exit without blocking
    pub fn try_wait(&mut self) -> Result<Option<std::process::ExitStatus>> {
        self.child.try_wait().map_err(|e| {
            CoreError::ProcessWait(format!(
                "Failed to try_wait for process {}: {}",
                self.pid, e
            ))
        })
    }

    /// Take the stdout handle for async reading, if available
    pub fn take_stdout(&mut self) -> Option<tokio::process::ChildStdout> {
        self.child.stdout.take()
    }

    /// Take the stderr handle for async reading, if available
    pub fn take_stderr(&mut self) -> Option<tokio::process::ChildStderr> {
        self.child.stderr.take()
    }
}

/// Spawn the managed process in its own process group
///
/// The command line, environment and working directory come from the
/// process spec. stdin is closed, stdout and stderr are piped.
///
/// ## Example
///
/// ```rust,no_run
/// use warden_core::process::unix::spawn;
/// use warden_core::ProcessSpec;
///
/// # async fn demo() -> warden_core::Result<()> {
/// let spec = ProcessSpec {
///     command: "echo".into(),
///     args: vec!["hello".into()],
///     environment: Default::default(),
///     working_directory: None,
/// };
/// let child = spawn(&spec)?;
/// println!("Spawned process with PID: {}", child.pid());
/// # Ok(())
/// # }
/// ```
pub fn spawn(spec: &ProcessSpec) -> Result<ChildProcess> {
    debug!("Spawning process: {} {:?}", spec.command, spec.args);

    let mut command = Command::new(&spec.command);
    command.args(&spec.args);
    command.envs(&spec.environment);
    if let Some(dir) = &spec.working_directory {
        command.current_dir(dir);
    }
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    // Safety: setsid() is async-signal-safe and appropriate for use in pre_exec
    #[deny(unsafe_op_in_unsafe_fn)]
    unsafe {
        command.pre_exec(|| {
            let result = libc::setsid();
            if result == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = command.spawn().map_err(|e| {
        error!("Failed to spawn process '{}': {}", spec.command, e);
        CoreError::ProcessSpawn(format!("Failed to spawn '{}': {}", spec.command, e))
    })?;

    let raw_pid = child
        .id()
        .ok_or_else(|| CoreError::ProcessSpawn("Spawned child did not have a PID".to_string()))?;
    let pid = Pid::from_raw(raw_pid as i32);
    debug!("Successfully spawned process {} in new process group", pid);

    Ok(ChildProcess { pid, child })
}

/// Send a signal to the whole process group of `pgid`
///
/// - `ESRCH` (No such process) is treated as success since the group is gone
/// - `EPERM` is treated as success; the group most likely exited and its id
///   was reused by a process we do not own
pub fn signal_group(pgid: u32, signal: Signal) -> Result<()> {
    let pid = Pid::from_raw(pgid as i32);
    debug!("Sending {} to process group {}", signal, pid);

    match killpg(pid, signal) {
        Ok(()) => Ok(()),
        Err(nix::errno::Errno::ESRCH) => {
            debug!("Process group {} already exited", pid);
            Ok(())
        }
        Err(nix::errno::Errno::EPERM) => {
            debug!(
                "Permission denied signaling process group {} (likely already exited)",
                pid
            );
            Ok(())
        }
        Err(e) => {
            error!("Failed to send {} to process group {}: {}", signal, pid, e);
            Err(CoreError::ProcessSignal(format!(
                "Failed to send {} to process group {}: {}",
                signal, pid, e
            )))
        }
    }
}

/// Send SIGTERM to the process group for graceful termination
pub fn signal_term_group(child: &ChildProcess) -> Result<()> {
    signal_group(child.pgid(), Signal::SIGTERM)
}

/// Send SIGKILL to the process group for forceful termination
pub fn signal_kill_group(child: &ChildProcess) -> Result<()> {
    signal_group(child.pgid(), Signal::SIGKILL)
}

/// Human-readable name of a signal number (`SIGSEGV`), or the number itself
pub fn signal_name(signal: i32) -> String {
    match Signal::try_from(signal) {
        Ok(sig) => sig.as_str().to_string(),
        Err(_) => format!("signal {}", signal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn spec(command: &str, args: &[&str]) -> ProcessSpec {
        ProcessSpec {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            environment: HashMap::new(),
            working_directory: None,
        }
    }

    #[tokio::test]
    async fn test_spawn_simple_command() {
        let child = spawn(&spec("echo", &["hello", "world"])).expect("Failed to spawn echo");
        assert!(child.pid() > 0);
        assert_eq!(child.pid(), child.pgid());
    }

    #[tokio::test]
    async fn test_spawn_and_wait() {
        let mut child = spawn(&spec("true", &[])).expect("Failed to spawn true");
        let status = child.wait().await.expect("Failed to wait for process");
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_spawn_nonexistent_command() {
        let result = spawn(&spec("nonexistent_command_12345", &[]));
        match result.unwrap_err() {
            CoreError::ProcessSpawn(_) => {}
            e => panic!("Expected ProcessSpawn error, got: {}", e),
        }
    }

    #[tokio::test]
    async fn test_environment_and_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = spec("sh", &["-c", "test \"$WARDEN_TEST\" = yes && test \"$(pwd -P)\" = \"$EXPECTED\""]);
        let expected = dir.path().canonicalize().unwrap();
        s.environment.insert("WARDEN_TEST".into(), "yes".into());
        s.environment
            .insert("EXPECTED".into(), expected.to_string_lossy().into_owned());
        s.working_directory = Some(dir.path().to_string_lossy().into_owned());

        let mut child = spawn(&s).unwrap();
        assert!(child.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn test_signal_nonexistent_group() {
        // ESRCH is treated as success
        assert!(signal_group(999_999, Signal::SIGTERM).is_ok());
        assert!(signal_group(999_999, Signal::SIGKILL).is_ok());
    }

    #[tokio::test]
    async fn test_kill_group() {
        let mut child = spawn(&spec("sleep", &["10"])).expect("Failed to spawn sleep");
        signal_kill_group(&child).unwrap();
        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .expect("child should exit")
            .unwrap();
        assert!(!status.success());
    }

    #[test]
    fn test_signal_names() {
        assert_eq!(signal_name(9), "SIGKILL");
        assert_eq!(signal_name(11), "SIGSEGV");
        assert_eq!(signal_name(0), "signal 0");
    }
}
