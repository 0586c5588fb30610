//! Process adapters for abstracting process management
//!
//! The main loop only talks to [`ProcessAdapter`] and [`ProcessHandle`], so
//! supervisor scenarios run the same against real Unix children and against
//! [`MockProcessAdapter`].

use crate::clock::{Tick, TickClock};
use crate::process::output::OutputReader;
use crate::{CoreError, Result};
use async_trait::async_trait;
use schema::{ProcessExit, ProcessSpec};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Trait for spawning managed processes in a platform-agnostic way
#[async_trait]
pub trait ProcessAdapter: Send + Sync {
    /// Spawn a new process according to the process specification
    async fn spawn(&self, spec: &ProcessSpec) -> Result<Box<dyn ProcessHandle>>;
}

/// A running child that can be polled and signaled
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Get the process ID
    fn pid(&self) -> u32;

    /// Non-blocking exit check
    fn try_wait(&mut self) -> Result<Option<ProcessExit>>;

    /// Terminate the process group gracefully (SIGTERM)
    async fn terminate(&mut self) -> Result<()>;

    /// Kill the process group forcefully (SIGKILL)
    async fn kill(&mut self) -> Result<()>;

    /// Deliver an arbitrary signal to the process group
    async fn signal(&mut self, signal: i32) -> Result<()>;

    /// Take the child's stdout; `None` if not piped or already taken
    fn take_stdout(&mut self) -> Option<OutputReader>;

    /// Take the child's stderr; `None` if not piped or already taken
    fn take_stderr(&mut self) -> Option<OutputReader>;
}

/// Unix process adapter backed by [`crate::process::unix`]
#[cfg(unix)]
#[derive(Copy, Clone, Debug, Default)]
pub struct UnixProcessAdapter;

#[cfg(unix)]
impl UnixProcessAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
#[async_trait]
impl ProcessAdapter for UnixProcessAdapter {
    async fn spawn(&self, spec: &ProcessSpec) -> Result<Box<dyn ProcessHandle>> {
        let child = crate::process::unix::spawn(spec)?;
        Ok(Box::new(UnixProcessHandle { child }))
    }
}

#[cfg(unix)]
struct UnixProcessHandle {
    child: crate::process::unix::ChildProcess,
}

/// A handle dropped with its child still running takes the process group down
#[cfg(unix)]
impl Drop for UnixProcessHandle {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            debug!("Killing process group of {} on drop", self.child.pid());
            let _ = crate::process::unix::signal_kill_group(&self.child);
        }
    }
}

#[cfg(unix)]
#[async_trait]
impl ProcessHandle for UnixProcessHandle {
    fn pid(&self) -> u32 {
        self.child.pid()
    }

    fn try_wait(&mut self) -> Result<Option<ProcessExit>> {
        use std::os::unix::process::ExitStatusExt;

        let Some(status) = self.child.try_wait()? else {
            return Ok(None);
        };
        Ok(Some(ProcessExit {
            pid: self.pid(),
            exit_code: status.code(),
            signal: status.signal(),
            timestamp: schema::current_timestamp(),
        }))
    }

    async fn terminate(&mut self) -> Result<()> {
        crate::process::unix::signal_term_group(&self.child)
    }

    async fn kill(&mut self) -> Result<()> {
        crate::process::unix::signal_kill_group(&self.child)
    }

    async fn signal(&mut self, signal: i32) -> Result<()> {
        let sig = nix::sys::signal::Signal::try_from(signal)
            .map_err(|e| CoreError::ProcessSignal(format!("Invalid signal {}: {}", signal, e)))?;
        crate::process::unix::signal_group(self.child.pgid(), sig)
    }

    fn take_stdout(&mut self) -> Option<OutputReader> {
        self.child.take_stdout().map(|s| {
            let r: OutputReader = Box::pin(s);
            r
        })
    }

    fn take_stderr(&mut self) -> Option<OutputReader> {
        self.child.take_stderr().map(|s| {
            let r: OutputReader = Box::pin(s);
            r
        })
    }
}

/// Instructions for mock process behavior
#[derive(Debug, Clone, Copy)]
pub struct MockInstruction {
    /// How long until the process exits on its own; `None` runs until signaled
    pub exit_delay: Option<Duration>,
    /// Exit code to report (None means killed by `signal`)
    pub exit_code: Option<i32>,
    /// Signal that killed the process
    pub signal: Option<i32>,
    /// Whether SIGTERM ends the process
    pub responds_to_signals: bool,
    /// Fail the spawn itself
    pub fail_spawn: bool,
    /// Bytes the process writes to stdout
    pub stdout: Option<&'static str>,
}

impl Default for MockInstruction {
    fn default() -> Self {
        Self {
            exit_delay: Some(Duration::from_millis(100)),
            exit_code: Some(0),
            signal: None,
            responds_to_signals: true,
            fail_spawn: false,
            stdout: None,
        }
    }
}

impl MockInstruction {
    /// A process that runs until it is signaled
    pub fn long_running() -> Self {
        Self {
            exit_delay: None,
            ..Self::default()
        }
    }

    /// A process that exits with `code` after `delay`
    pub fn exits_with(code: i32, delay: Duration) -> Self {
        Self {
            exit_delay: Some(delay),
            exit_code: Some(code),
            ..Self::default()
        }
    }

    /// A process killed by `signal` after `delay`
    pub fn killed_by(signal: i32, delay: Duration) -> Self {
        Self {
            exit_delay: Some(delay),
            exit_code: None,
            signal: Some(signal),
            ..Self::default()
        }
    }

    /// A spawn that fails
    pub fn spawn_failure() -> Self {
        Self {
            fail_spawn: true,
            ..Self::default()
        }
    }
}

/// Mock process adapter for testing
///
/// Instructions are consumed in order, one per spawn; once they run out the
/// fallback instruction is used. With [`MockProcessAdapter::with_clock`]
/// exit delays are measured on the given tick clock, otherwise on real time.
#[derive(Clone)]
pub struct MockProcessAdapter {
    instructions: Arc<tokio::sync::Mutex<VecDeque<MockInstruction>>>,
    fallback: Arc<Mutex<MockInstruction>>,
    clock: Option<TickClock>,
    next_pid: Arc<AtomicU32>,
    spawns: Arc<AtomicU32>,
    signals: Arc<Mutex<Vec<(u32, i32)>>>,
}

impl std::fmt::Debug for MockProcessAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockProcessAdapter")
            .field("spawns", &self.spawn_count())
            .finish()
    }
}

impl MockProcessAdapter {
    /// Create a new mock adapter with no pre-configured instructions
    pub fn new() -> Self {
        Self {
            instructions: Arc::new(tokio::sync::Mutex::new(VecDeque::new())),
            fallback: Arc::new(Mutex::new(MockInstruction::default())),
            clock: None,
            next_pid: Arc::new(AtomicU32::new(4000)),
            spawns: Arc::new(AtomicU32::new(0)),
            signals: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Measure exit delays on `clock`
    pub fn with_clock(clock: TickClock) -> Self {
        Self {
            clock: Some(clock),
            ..Self::new()
        }
    }

    /// Add instructions for the next spawned process
    pub async fn add_instruction(&self, instruction: MockInstruction) {
        self.instructions.lock().await.push_back(instruction);
    }

    /// Replace the queued instructions
    pub async fn set_instructions(&self, instructions: Vec<MockInstruction>) {
        *self.instructions.lock().await = instructions.into();
    }

    /// Instruction used once the queue is empty
    pub fn set_fallback(&self, instruction: MockInstruction) {
        if let Ok(mut fallback) = self.fallback.lock() {
            *fallback = instruction;
        }
    }

    /// Number of spawn attempts so far
    pub fn spawn_count(&self) -> u32 {
        self.spawns.load(Ordering::SeqCst)
    }

    /// Every `(pid, signal)` delivered so far
    pub fn signals_sent(&self) -> Vec<(u32, i32)> {
        self.signals.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn started_at(&self) -> MockStart {
        match &self.clock {
            Some(clock) => MockStart::Ticks {
                clock: clock.clone(),
                start: clock.now(),
            },
            None => MockStart::Wall(Instant::now()),
        }
    }
}

impl Default for MockProcessAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessAdapter for MockProcessAdapter {
    async fn spawn(&self, spec: &ProcessSpec) -> Result<Box<dyn ProcessHandle>> {
        debug!("Spawning mock process for: {} {:?}", spec.command, spec.args);
        self.spawns.fetch_add(1, Ordering::SeqCst);

        let instruction = match self.instructions.lock().await.pop_front() {
            Some(instruction) => instruction,
            None => self
                .fallback
                .lock()
                .map(|f| *f)
                .unwrap_or_default(),
        };
        if instruction.fail_spawn {
            return Err(CoreError::ProcessSpawn(format!(
                "Failed to spawn '{}': No such file or directory (os error 2)",
                spec.command
            )));
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockProcessHandle {
            pid,
            instruction,
            started: self.started_at(),
            terminated: false,
            killed: false,
            reaped: false,
            stdout: instruction.stdout,
            signals: self.signals.clone(),
        }))
    }
}

enum MockStart {
    Wall(Instant),
    Ticks { clock: TickClock, start: Tick },
}

impl MockStart {
    fn elapsed(&self) -> Duration {
        match self {
            MockStart::Wall(start) => start.elapsed(),
            MockStart::Ticks { clock, start } => {
                let ticks = (clock.now().wrapping_sub(*start) as i32).max(0) as u64;
                Duration::from_millis(ticks * clock.tick_ms() as u64)
            }
        }
    }
}

struct MockProcessHandle {
    pid: u32,
    instruction: MockInstruction,
    started: MockStart,
    terminated: bool,
    killed: bool,
    reaped: bool,
    stdout: Option<&'static str>,
    signals: Arc<Mutex<Vec<(u32, i32)>>>,
}

impl MockProcessHandle {
    fn should_exit(&self) -> bool {
        if self.killed || self.terminated {
            return true;
        }
        matches!(self.instruction.exit_delay, Some(delay) if self.started.elapsed() >= delay)
    }

    fn create_exit(&self) -> ProcessExit {
        let (exit_code, signal) = if self.killed {
            (None, Some(libc::SIGKILL))
        } else if self.terminated {
            (None, Some(libc::SIGTERM))
        } else {
            (self.instruction.exit_code, self.instruction.signal)
        };
        ProcessExit {
            pid: self.pid,
            exit_code,
            signal,
            timestamp: schema::current_timestamp(),
        }
    }

    fn record(&self, signal: i32) {
        if let Ok(mut signals) = self.signals.lock() {
            signals.push((self.pid, signal));
        }
    }
}

#[async_trait]
impl ProcessHandle for MockProcessHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn try_wait(&mut self) -> Result<Option<ProcessExit>> {
        if self.reaped || !self.should_exit() {
            return Ok(None);
        }
        self.reaped = true;
        Ok(Some(self.create_exit()))
    }

    async fn terminate(&mut self) -> Result<()> {
        self.signal(libc::SIGTERM).await
    }

    async fn kill(&mut self) -> Result<()> {
        self.signal(libc::SIGKILL).await
    }

    async fn signal(&mut self, signal: i32) -> Result<()> {
        debug!("Mock process {} received signal {}", self.pid, signal);
        self.record(signal);
        if self.should_exit() {
            return Ok(());
        }
        match signal {
            libc::SIGKILL => self.killed = true,
            libc::SIGTERM if self.instruction.responds_to_signals => self.terminated = true,
            _ => {}
        }
        Ok(())
    }

    fn take_stdout(&mut self) -> Option<OutputReader> {
        self.stdout.take().map(|text| {
            let r: OutputReader = Box::pin(std::io::Cursor::new(text.as_bytes()));
            r
        })
    }

    fn take_stderr(&mut self) -> Option<OutputReader> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_spec() -> ProcessSpec {
        ProcessSpec {
            command: "echo".to_string(),
            args: vec!["hello".to_string()],
            environment: Default::default(),
            working_directory: None,
        }
    }

    #[tokio::test]
    async fn test_mock_adapter_spawn() {
        let adapter = MockProcessAdapter::new();
        let process = adapter.spawn(&create_test_spec()).await.unwrap();
        assert!(process.pid() > 0);
        assert_eq!(adapter.spawn_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_exit_on_manual_clock() {
        let clock = TickClock::manual(25, 0);
        let adapter = MockProcessAdapter::with_clock(clock.clone());
        adapter
            .add_instruction(MockInstruction::exits_with(3, Duration::from_secs(2)))
            .await;

        let mut process = adapter.spawn(&create_test_spec()).await.unwrap();
        assert!(process.try_wait().unwrap().is_none());

        clock.advance_secs(2);
        let exit = process.try_wait().unwrap().expect("exited");
        assert_eq!(exit.exit_code, Some(3));
        assert_eq!(exit.pid, process.pid());
        // reaped once only
        assert!(process.try_wait().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mock_process_terminate() {
        let adapter = MockProcessAdapter::new();
        adapter.add_instruction(MockInstruction::long_running()).await;

        let mut process = adapter.spawn(&create_test_spec()).await.unwrap();
        assert!(process.try_wait().unwrap().is_none());

        process.terminate().await.unwrap();
        let exit = process.try_wait().unwrap().expect("terminated");
        assert_eq!(exit.exit_code, None);
        assert_eq!(exit.signal, Some(libc::SIGTERM));
        assert_eq!(adapter.signals_sent(), vec![(process.pid(), libc::SIGTERM)]);
    }

    #[tokio::test]
    async fn test_mock_ignores_term_but_not_kill() {
        let adapter = MockProcessAdapter::new();
        adapter
            .add_instruction(MockInstruction {
                responds_to_signals: false,
                ..MockInstruction::long_running()
            })
            .await;

        let mut process = adapter.spawn(&create_test_spec()).await.unwrap();
        process.terminate().await.unwrap();
        assert!(process.try_wait().unwrap().is_none());

        process.kill().await.unwrap();
        let exit = process.try_wait().unwrap().expect("killed");
        assert_eq!(exit.signal, Some(libc::SIGKILL));
    }

    #[tokio::test]
    async fn test_mock_spawn_failure_and_fallback() {
        let adapter = MockProcessAdapter::new();
        adapter.add_instruction(MockInstruction::spawn_failure()).await;
        adapter.set_fallback(MockInstruction::long_running());

        match adapter.spawn(&create_test_spec()).await {
            Err(CoreError::ProcessSpawn(_)) => {}
            Err(e) => panic!("Expected ProcessSpawn error, got: {}", e),
            Ok(_) => panic!("Expected spawn failure"),
        }
        let mut process = adapter.spawn(&create_test_spec()).await.unwrap();
        assert!(process.try_wait().unwrap().is_none());
        assert_eq!(adapter.spawn_count(), 2);
    }

    #[tokio::test]
    async fn test_unix_adapter_reports_exit_code() {
        let adapter = UnixProcessAdapter::new();
        let spec = ProcessSpec {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "exit 7".to_string()],
            environment: Default::default(),
            working_directory: None,
        };
        let mut process = adapter.spawn(&spec).await.unwrap();
        let mut exit = None;
        for _ in 0..200 {
            if let Some(e) = process.try_wait().unwrap() {
                exit = Some(e);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let exit = exit.expect("sh should exit");
        assert_eq!(exit.exit_code, Some(7));
        assert_eq!(exit.signal, None);
    }
}
