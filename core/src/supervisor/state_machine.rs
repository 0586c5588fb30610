//! Supervisor lifecycle state machine
//!
//! Only the edges listed in [`is_valid_transition`] are accepted; any other
//! request is logged and ignored. Accepted transitions are reported to the
//! service registry with a wait hint.

use crate::registry::ServiceRegistry;
use schema::SupervisorState;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Whether `from → to` is a supervisor edge
pub fn is_valid_transition(from: SupervisorState, to: SupervisorState) -> bool {
    use SupervisorState::*;
    match (from, to) {
        (Starting, Started)
        | (Started, Pausing)
        | (Pausing, Paused)
        | (Paused, Resuming)
        | (Resuming, Started)
        | (Stopping, Stopped) => true,
        (from, Stopping) => !from.is_terminal() && from != Stopping,
        _ => false,
    }
}

/// Wait hints reported with transitional states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitHints {
    /// Expected time to reach Started
    pub startup: Duration,
    /// Expected time for the child to stop
    pub shutdown: Duration,
}

pub struct SupervisorMachine {
    state: SupervisorState,
    registry: Arc<dyn ServiceRegistry>,
    hints: WaitHints,
}

impl std::fmt::Debug for SupervisorMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorMachine")
            .field("state", &self.state)
            .field("hints", &self.hints)
            .finish()
    }
}

impl SupervisorMachine {
    /// Create a machine in `Starting` and report it
    pub fn new(registry: Arc<dyn ServiceRegistry>, hints: WaitHints) -> Self {
        let machine = Self {
            state: SupervisorState::Starting,
            registry,
            hints,
        };
        machine.report_current();
        machine
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Attempt a transition; returns whether it was accepted
    pub fn transition(&mut self, to: SupervisorState) -> bool {
        let from = self.state;
        if !is_valid_transition(from, to) {
            debug!("Ignoring supervisor transition {:?} -> {:?}", from, to);
            return false;
        }
        self.state = to;
        info!("Supervisor {:?} -> {:?}", from, to);
        self.report_current();
        true
    }

    /// Report the current state again (interrogate)
    pub fn report_current(&self) {
        self.registry.report(self.state, self.wait_hint(self.state));
    }

    /// Free-form status line to the registry
    pub fn report_status(&self, text: &str) {
        self.registry.status(text);
    }

    fn wait_hint(&self, state: SupervisorState) -> Duration {
        match state {
            SupervisorState::Starting | SupervisorState::Resuming => self.hints.startup,
            SupervisorState::Pausing | SupervisorState::Stopping => self.hints.shutdown,
            _ => Duration::ZERO,
        }
    }
}
