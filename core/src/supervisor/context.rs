//! Loop-owned supervisor state and the handles given to background actors

use super::{ManagedProcess, ProcessAdapter, RunOutcome, SupervisorMachine, WaitHints};
use crate::capabilities::Capabilities;
use crate::clock::{Tick, TickClock};
use crate::control::{control_channel, ControlProducer, ControlQueue, InterruptGate, UrgentHandle};
use crate::diagnostics::DumpWriter;
use crate::logging::{shared_ring, SharedLogRing};
use crate::registry::ServiceRegistry;
use schema::{RunMode, StatusSnapshot, SupervisorSpec};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Narrow handles for signal listeners, the control server and dumps
#[derive(Debug, Clone)]
pub struct SupervisorHandles {
    pub producer: ControlProducer,
    pub urgent: UrgentHandle,
    pub status_rx: watch::Receiver<StatusSnapshot>,
    pub clock: TickClock,
    pub ring: SharedLogRing,
}

/// Everything the main loop owns
pub struct SupervisorContext {
    pub(crate) spec: SupervisorSpec,
    pub(crate) mode: RunMode,
    pub(crate) clock: TickClock,
    pub(crate) machine: SupervisorMachine,
    pub(crate) process: ManagedProcess,
    pub(crate) adapter: Arc<dyn ProcessAdapter>,
    pub(crate) queue: ControlQueue,
    pub(crate) interrupt_gate: InterruptGate,
    pub(crate) close_gate: InterruptGate,
    pub(crate) capabilities: Capabilities,
    pub(crate) ring: SharedLogRing,
    pub(crate) dumps: DumpWriter,
    pub(crate) status_tx: watch::Sender<StatusSnapshot>,
    pub(crate) outcome: RunOutcome,
    pub(crate) pending_restart: bool,
    pub(crate) last_sample: Option<Tick>,
}

impl std::fmt::Debug for SupervisorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorContext")
            .field("name", &self.spec.name)
            .field("mode", &self.mode)
            .field("machine", &self.machine)
            .field("process", &self.process)
            .field("outcome", &self.outcome)
            .finish()
    }
}

impl SupervisorContext {
    pub fn new(
        spec: SupervisorSpec,
        mode: RunMode,
        clock: TickClock,
        adapter: Arc<dyn ProcessAdapter>,
        registry: Arc<dyn ServiceRegistry>,
        capabilities: Capabilities,
    ) -> (Self, SupervisorHandles) {
        let (producer, urgent, queue) =
            control_channel(spec.control_queue_capacity, clock.clone());
        let (status_tx, status_rx) = watch::channel(StatusSnapshot::initial());
        let ring = shared_ring(spec.output.ring_capacity);
        let hints = WaitHints {
            startup: Duration::from_secs(spec.timing.startup_wait_hint_secs),
            shutdown: spec.timing.shutdown_timeout(),
        };

        let context = Self {
            machine: SupervisorMachine::new(registry, hints),
            process: ManagedProcess::new(&spec),
            interrupt_gate: InterruptGate::new(spec.timing.forced_shutdown_delay_secs),
            close_gate: InterruptGate::new(spec.timing.forced_shutdown_delay_secs),
            dumps: DumpWriter::new(spec.paths.dump_directory.as_deref(), &spec.name),
            ring: ring.clone(),
            clock: clock.clone(),
            queue,
            adapter,
            capabilities,
            status_tx,
            outcome: RunOutcome::Clean,
            pending_restart: false,
            last_sample: None,
            mode,
            spec,
        };
        let handles = SupervisorHandles {
            producer,
            urgent,
            status_rx,
            clock,
            ring,
        };
        (context, handles)
    }

    pub fn spec(&self) -> &SupervisorSpec {
        &self.spec
    }

    pub fn state(&self) -> schema::SupervisorState {
        self.machine.state()
    }

    pub fn process(&self) -> &ManagedProcess {
        &self.process
    }

    /// Outcome recorded so far
    pub fn outcome(&self) -> RunOutcome {
        self.outcome
    }

    pub fn dump_writer(&self) -> &DumpWriter {
        &self.dumps
    }

    /// Current status
    pub fn snapshot(&self) -> StatusSnapshot {
        let now = self.clock.now();
        StatusSnapshot {
            supervisor_state: self.machine.state(),
            process_state: self.process.state(),
            pid: self.process.pid(),
            consecutive_failures: self.process.consecutive_failures(),
            dropped_events: self.queue.dropped(),
            restarts: self.process.restarts(),
            uptime_secs: self.process.uptime_secs(&self.clock, now),
        }
    }
}
