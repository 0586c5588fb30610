//! Managed process state machine
//!
//! Tracks the single child: its lifecycle state, handle, output drain,
//! scheduled relaunch, stop deadline and failure count. At most one child
//! exists at any time; the handle is present only while `Up` or `Stopping`.

use super::restart_policy::{classify_exit, decision_for, BackoffTracker, RestartAction};
use super::{ProcessAdapter, ProcessHandle, RunOutcome};
use crate::clock::{Tick, TickClock};
use crate::logging::SharedLogRing;
use crate::pidfile::PidFile;
use crate::process::output::{resolve_encoding, OutputDrain, OutputSink, POLL_LINES_PER_TICK};
use crate::process::signal_name;
use crate::Result;
use schema::{ExitClass, ProcessExit, ProcessState, RestartDecision, SupervisorSpec};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Whether `from → to` is a managed process edge
pub fn is_valid_process_transition(from: ProcessState, to: ProcessState) -> bool {
    use ProcessState::*;
    matches!(
        (from, to),
        (Down, Launching)
            | (Launching, Up)
            | (Launching, Down)
            | (Up, Stopping)
            | (Up, Down)
            | (Stopping, Down)
    )
}

/// A reaped exit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReapedExit {
    pub exit: ProcessExit,
    /// The supervisor asked the child to stop
    pub requested: bool,
}

/// What the supervisor does after an unrequested exit or spawn failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterExit {
    /// A relaunch is scheduled after `delay`
    Relaunch { delay: Duration },
    /// Stop the supervisor with this outcome
    Stop { outcome: RunOutcome },
}

pub struct ManagedProcess {
    state: ProcessState,
    handle: Option<Box<dyn ProcessHandle>>,
    drain: Option<OutputDrain>,
    last_exit: Option<ProcessExit>,
    backoff: BackoffTracker,
    last_launch_tick: Option<Tick>,
    restart_due: Option<Tick>,
    stop_deadline: Option<Tick>,
    stop_requested: bool,
    launches: u64,
    app_pid_file: Option<PidFile>,
}

impl std::fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("state", &self.state)
            .field("pid", &self.pid())
            .field("consecutive_failures", &self.consecutive_failures())
            .field("restart_due", &self.restart_due)
            .field("stop_deadline", &self.stop_deadline)
            .finish()
    }
}

impl ManagedProcess {
    pub fn new(spec: &SupervisorSpec) -> Self {
        Self {
            state: ProcessState::Down,
            handle: None,
            drain: None,
            last_exit: None,
            backoff: BackoffTracker::new(&spec.restart),
            last_launch_tick: None,
            restart_due: None,
            stop_deadline: None,
            stop_requested: false,
            launches: 0,
            app_pid_file: None,
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().map(|h| h.pid())
    }

    pub fn last_exit(&self) -> Option<&ProcessExit> {
        self.last_exit.as_ref()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.backoff.consecutive_failures()
    }

    /// Launches after the first one
    pub fn restarts(&self) -> u64 {
        self.launches.saturating_sub(1)
    }

    pub fn last_launch_tick(&self) -> Option<Tick> {
        self.last_launch_tick
    }

    /// Pending relaunch deadline, if any
    pub fn restart_due(&self) -> Option<Tick> {
        self.restart_due
    }

    /// Seconds the current child has been up
    pub fn uptime_secs(&self, clock: &TickClock, now: Tick) -> u64 {
        match (self.state, self.last_launch_tick) {
            (ProcessState::Up | ProcessState::Stopping, Some(launched)) => {
                clock.age_seconds(launched, now).max(0) as u64
            }
            _ => 0,
        }
    }

    fn set_state(&mut self, to: ProcessState) -> bool {
        if !is_valid_process_transition(self.state, to) {
            debug!("Ignoring process transition {:?} -> {:?}", self.state, to);
            return false;
        }
        debug!("Managed process {:?} -> {:?}", self.state, to);
        self.state = to;
        true
    }

    /// Down with no pending backoff deadline
    pub fn can_launch(&self, clock: &TickClock, now: Tick) -> bool {
        self.state == ProcessState::Down
            && self.restart_due.map_or(true, |due| clock.is_due(due, now))
    }

    /// Drop any scheduled delay so the next launch happens immediately
    pub fn launch_now(&mut self) {
        self.restart_due = None;
    }

    /// Cancel any scheduled relaunch
    pub fn cancel_relaunch(&mut self) {
        self.restart_due = None;
    }

    /// Spawn the child and start draining its output.
    ///
    /// On failure the process is back in `Down` and the error is returned.
    pub async fn launch(
        &mut self,
        adapter: &dyn ProcessAdapter,
        spec: &SupervisorSpec,
        ring: &SharedLogRing,
        clock: &TickClock,
    ) -> Result<u32> {
        self.set_state(ProcessState::Launching);
        self.restart_due = None;
        self.stop_requested = false;

        let encoding = resolve_encoding(&spec.output, &spec.process.environment);
        let mut handle = match adapter.spawn(&spec.process).await {
            Ok(handle) => handle,
            Err(e) => {
                self.set_state(ProcessState::Down);
                return Err(e);
            }
        };

        let pid = handle.pid();
        let sink = OutputSink::new(ring.clone(), encoding);
        self.drain = Some(OutputDrain::start(
            spec.output.drain,
            handle.take_stdout(),
            handle.take_stderr(),
            sink,
        ));
        self.handle = Some(handle);

        if let Some(path) = &spec.paths.app_pid_file {
            match PidFile::write(path, pid) {
                Ok(file) => self.app_pid_file = Some(file),
                Err(e) => warn!("Failed to write application pid file {}: {}", path, e),
            }
        }

        self.last_launch_tick = Some(clock.now());
        self.launches += 1;
        self.set_state(ProcessState::Up);
        info!(
            "Launched '{}' with pid {} ({:?} output)",
            spec.process.command, pid, encoding
        );
        Ok(pid)
    }

    /// Drain buffered output in poll mode
    pub fn poll_output(&mut self) {
        if let Some(drain) = self.drain.as_mut() {
            drain.poll(POLL_LINES_PER_TICK);
        }
    }

    /// Non-blocking reap of the child
    pub fn poll_exit(&mut self) -> Result<Option<ReapedExit>> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(None);
        };
        let Some(exit) = handle.try_wait()? else {
            return Ok(None);
        };

        self.handle = None;
        if let Some(drain) = self.drain.take() {
            drain.finish();
        }
        if let Some(file) = self.app_pid_file.take() {
            file.release();
        }
        self.set_state(ProcessState::Down);
        self.stop_deadline = None;
        let requested = std::mem::take(&mut self.stop_requested);
        self.last_exit = Some(exit.clone());
        Ok(Some(ReapedExit { exit, requested }))
    }

    /// Ask the child to stop and arm the stop deadline.
    ///
    /// No-op unless the child is `Up`.
    pub async fn request_stop(&mut self, clock: &TickClock, now: Tick, timeout: Duration) {
        if self.state != ProcessState::Up {
            return;
        }
        self.stop_requested = true;
        self.stop_deadline = Some(clock.add_duration(now, timeout));
        self.set_state(ProcessState::Stopping);
        if let Some(handle) = self.handle.as_mut() {
            info!("Sending SIGTERM to managed process {}", handle.pid());
            if let Err(e) = handle.terminate().await {
                error!("Failed to terminate managed process: {}", e);
            }
        }
    }

    /// Whether a requested stop has outlived its deadline
    pub fn stop_deadline_passed(&self, clock: &TickClock, now: Tick) -> bool {
        matches!(self.stop_deadline, Some(deadline) if clock.is_due(deadline, now))
    }

    /// SIGKILL the child's process group
    pub async fn kill(&mut self) {
        self.stop_deadline = None;
        if let Some(handle) = self.handle.as_mut() {
            self.stop_requested = true;
            warn!("Killing process group of managed process {}", handle.pid());
            if let Err(e) = handle.kill().await {
                error!("Failed to kill managed process: {}", e);
            }
        }
    }

    /// Deliver a signal to the child, if any
    pub async fn signal(&mut self, signal: i32) {
        match self.handle.as_mut() {
            Some(handle) => {
                debug!("Forwarding {} to managed process {}", signal_name(signal), handle.pid());
                if let Err(e) = handle.signal(signal).await {
                    warn!("Failed to forward {}: {}", signal_name(signal), e);
                }
            }
            None => debug!("No managed process to receive {}", signal_name(signal)),
        }
    }

    /// Apply the exit policy to an unrequested exit
    pub fn handle_exit(
        &mut self,
        exit: &ProcessExit,
        spec: &SupervisorSpec,
        clock: &TickClock,
        now: Tick,
    ) -> AfterExit {
        let class = classify_exit(exit, &spec.exit_policy);
        match (class, exit.signal) {
            (ExitClass::Abnormal, Some(signal)) => warn!(
                "Managed process {} terminated by {}",
                exit.pid,
                signal_name(signal)
            ),
            _ => info!(
                "Managed process {} exited with code {:?} ({:?})",
                exit.pid, exit.exit_code, class
            ),
        }
        if class == ExitClass::CleanStop {
            self.backoff.reset();
        }

        match decision_for(exit, class, &spec.exit_policy) {
            RestartDecision::Restart => self.schedule_immediate(),
            RestartDecision::RestartWithBackoff => self.schedule_backoff(clock, now),
            RestartDecision::Stop => AfterExit::Stop {
                outcome: match (exit.exit_code, exit.signal) {
                    (Some(0), _) => RunOutcome::Clean,
                    (Some(code), None) => RunOutcome::ManagedExit(code),
                    _ => RunOutcome::SupervisorFailure,
                },
            },
        }
    }

    /// Count a failure and schedule the relaunch, or give up
    pub fn schedule_backoff(&mut self, clock: &TickClock, now: Tick) -> AfterExit {
        match self.backoff.record_failure() {
            RestartAction::Restart { delay } => {
                self.restart_due = Some(clock.add_duration(now, delay));
                info!("Relaunching in {:?}", delay);
                AfterExit::Relaunch { delay }
            }
            RestartAction::Stop => AfterExit::Stop {
                outcome: RunOutcome::SupervisorFailure,
            },
        }
    }

    /// Count a failure and relaunch without delay, or give up
    ///
    /// Immediate restarts still count toward `maxRetries`, so a child that
    /// keeps exiting right after launch cannot relaunch forever.
    pub fn schedule_immediate(&mut self) -> AfterExit {
        match self.backoff.record_failure() {
            RestartAction::Restart { .. } => {
                self.restart_due = None;
                AfterExit::Relaunch {
                    delay: Duration::ZERO,
                }
            }
            RestartAction::Stop => AfterExit::Stop {
                outcome: RunOutcome::SupervisorFailure,
            },
        }
    }

    /// Reset the failure count once the child has been up long enough
    pub fn check_stable(&mut self, clock: &TickClock, now: Tick, stable_after: Duration) {
        if self.state != ProcessState::Up || self.backoff.consecutive_failures() == 0 {
            return;
        }
        if let Some(launched) = self.last_launch_tick {
            if clock.age_seconds(launched, now) >= stable_after.as_secs() as i64 {
                info!(
                    "Managed process stable for {:?}, resetting failure counter",
                    stable_after
                );
                self.backoff.reset();
            }
        }
    }

    /// Release the application pid file on shutdown
    pub fn release(&mut self) {
        if let Some(file) = self.app_pid_file.take() {
            file.release();
        }
    }
}
