//! Lifecycle states and the published status snapshot

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle state of the supervisor itself
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SupervisorState {
    /// Initializing; the managed process has not been launched yet
    Starting,
    /// Running normally
    Started,
    /// Pause requested
    Pausing,
    /// Paused; the managed process stays down until resume or stop
    Paused,
    /// Resume requested
    Resuming,
    /// Shutting down the managed process
    Stopping,
    /// Terminal state; the run ends
    Stopped,
}

impl SupervisorState {
    /// Check whether this is the terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, SupervisorState::Stopped)
    }

    /// Check whether the supervisor is between two stable states
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            SupervisorState::Starting
                | SupervisorState::Pausing
                | SupervisorState::Resuming
                | SupervisorState::Stopping
        )
    }
}

/// Lifecycle state of the managed process
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ProcessState {
    /// No child exists
    Down,
    /// Spawn in progress
    Launching,
    /// Child is running
    Up,
    /// Termination requested, waiting for the child to exit
    Stopping,
}

impl ProcessState {
    /// Check whether a child handle exists in this state
    pub fn has_child(&self) -> bool {
        matches!(self, ProcessState::Up | ProcessState::Stopping)
    }
}

/// How the supervisor was started
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RunMode {
    /// Attached to a terminal
    Console,
    /// Started by the service manager
    Service,
}

/// Point-in-time view of the supervisor published once per tick
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub supervisor_state: SupervisorState,
    pub process_state: ProcessState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub consecutive_failures: u32,
    /// Control events dropped because the queue was full; never decreases
    pub dropped_events: u64,
    /// Number of relaunches performed during this run
    pub restarts: u64,
    /// Seconds the current child has been up (0 when down)
    pub uptime_secs: u64,
}

impl StatusSnapshot {
    /// Snapshot of a supervisor that has not run a tick yet
    pub fn initial() -> Self {
        Self {
            supervisor_state: SupervisorState::Starting,
            process_state: ProcessState::Down,
            pid: None,
            consecutive_failures: 0,
            dropped_events: 0,
            restarts: 0,
            uptime_secs: 0,
        }
    }
}
