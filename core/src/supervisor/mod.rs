//! Supervision engine
//!
//! One [`SupervisorContext`] owns both lifecycle state machines and is
//! advanced by a single tokio task, once per clock tick.
//!
//! ## Architecture
//!
//! ```text
//! signals / control socket ──try_enqueue──▶ ControlQueue ─┐
//!                            ──set_urgent──▶ UrgentSet  ──┤
//!                                                         ▼
//!                              main loop: urgent → events → process → diagnostics → publish
//!                                                         │
//!                               ProcessAdapter ◀──────────┘
//! ```
//!
//! Supervisor states:
//!
//! ```text
//! Starting → Started → Pausing → Paused → Resuming → Started
//!     any non-terminal → Stopping → Stopped
//! ```
//!
//! Managed process states:
//!
//! ```text
//! Down → Launching → Up → Stopping → Down
//! ```
//!
//! ## Components
//!
//! - [`ProcessAdapter`] / [`ProcessHandle`]: seam over real or mock children
//! - [`SupervisorMachine`]: supervisor state plus registry reporting
//! - [`ManagedProcess`]: the child's state, exit handling and backoff
//! - [`SupervisorContext`]: loop-owned state, built together with
//!   [`SupervisorHandles`] for the background actors

pub mod adapters;
pub mod context;
pub mod main_loop;
pub mod managed;
pub mod restart_policy;
pub mod state_machine;

#[cfg(test)]
mod integration_tests;

pub use adapters::*;
pub use context::*;
pub use managed::*;
pub use restart_policy::*;
pub use state_machine::*;

/// How a supervisor run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Requested stop or clean application exit
    Clean,
    /// The application exited with this code and policy said stop
    ManagedExit(i32),
    /// Spawn failure, exhausted retries or another supervisor-detected failure
    SupervisorFailure,
}

impl RunOutcome {
    /// Process exit code for this outcome
    pub fn exit_code(&self, error_exit_code: i32) -> i32 {
        match self {
            RunOutcome::Clean => 0,
            RunOutcome::ManagedExit(code) => *code,
            RunOutcome::SupervisorFailure => error_exit_code,
        }
    }
}
