//! Control event queue and urgent flags
//!
//! Asynchronous producers (signal listeners, the control socket server) hand
//! control requests to the single main loop through a bounded channel. The
//! producer side never blocks: when the channel is full the newest event is
//! dropped, the drop counter is incremented and a warning is logged once per
//! burst. The burst ends when the main loop next drains events.
//!
//! Urgent notifications (interrupt, close, logoff, shutdown) bypass the queue
//! through an atomic bitset so they can never be lost to an overflow.

use crate::clock::{Tick, TickClock};
use schema::{ControlCode, UrgentFlag};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tracing::{debug, info, warn};

/// A queued control request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlEvent {
    pub code: ControlCode,
    pub enqueued_at: Tick,
}

#[derive(Debug, Default)]
struct Shared {
    dropped: AtomicU64,
    overflow_warned: AtomicBool,
    urgent: AtomicU8,
}

/// Create the queue and its producer handles
pub fn control_channel(
    capacity: usize,
    clock: TickClock,
) -> (ControlProducer, UrgentHandle, ControlQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let shared = Arc::new(Shared::default());
    (
        ControlProducer {
            tx,
            shared: shared.clone(),
            clock,
        },
        UrgentHandle {
            shared: shared.clone(),
        },
        ControlQueue { rx, shared },
    )
}

/// Cloneable, non-blocking producer side of the control queue
#[derive(Debug, Clone)]
pub struct ControlProducer {
    tx: mpsc::Sender<ControlEvent>,
    shared: Arc<Shared>,
    clock: TickClock,
}

impl ControlProducer {
    /// Enqueue a control code without blocking.
    ///
    /// Returns `false` when the event was dropped.
    pub fn try_enqueue(&self, code: ControlCode) -> bool {
        let event = ControlEvent {
            code,
            enqueued_at: self.clock.now(),
        };
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                let total = self.shared.dropped.fetch_add(1, Ordering::AcqRel) + 1;
                if !self.shared.overflow_warned.swap(true, Ordering::AcqRel) {
                    warn!(
                        "Control queue full, dropping {} (dropped so far: {})",
                        event.code, total
                    );
                }
                false
            }
            Err(TrySendError::Closed(event)) => {
                debug!("Control queue closed, discarding {}", event.code);
                false
            }
        }
    }

    /// Total number of dropped events
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Acquire)
    }
}

/// Setter for urgent flags, safe to use from any task or thread
#[derive(Debug, Clone)]
pub struct UrgentHandle {
    shared: Arc<Shared>,
}

impl UrgentHandle {
    pub fn set_urgent(&self, flag: UrgentFlag) {
        self.shared.urgent.fetch_or(flag.bit(), Ordering::AcqRel);
    }
}

/// Set of urgent flags taken in one atomic swap
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UrgentSet(u8);

impl UrgentSet {
    pub fn contains(&self, flag: UrgentFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Flags present in this set, in handling order
    pub fn iter(&self) -> impl Iterator<Item = UrgentFlag> + '_ {
        UrgentFlag::ALL.into_iter().filter(|flag| self.contains(*flag))
    }
}

/// Consumer side, owned by the main loop
#[derive(Debug)]
pub struct ControlQueue {
    rx: mpsc::Receiver<ControlEvent>,
    shared: Arc<Shared>,
}

impl ControlQueue {
    /// Take every pending event
    pub fn drain_all(&mut self) -> Vec<ControlEvent> {
        let mut events = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        if !events.is_empty() {
            self.shared.overflow_warned.store(false, Ordering::Release);
        }
        events
    }

    /// Atomically take and clear all urgent flags
    pub fn take_urgent(&self) -> UrgentSet {
        UrgentSet(self.shared.urgent.swap(0, Ordering::AcqRel))
    }

    /// Total number of dropped events; never decreases
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Acquire)
    }
}

/// What to do with an interrupt or close notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// First occurrence: stop gracefully
    GracefulStop,
    /// Repeated after the forced-shutdown delay: kill immediately
    ForceKill,
    /// Repeated too early: ignore
    Ignore,
}

/// Debounce for repeated interrupt/close notifications
#[derive(Debug)]
pub struct InterruptGate {
    forced_delay_secs: i64,
    trapped_at: Option<Tick>,
}

impl InterruptGate {
    pub fn new(forced_delay_secs: u64) -> Self {
        Self {
            forced_delay_secs: forced_delay_secs.min(i64::MAX as u64) as i64,
            trapped_at: None,
        }
    }

    /// Whether an interrupt or close has been seen during this run
    pub fn ctrl_trapped(&self) -> bool {
        self.trapped_at.is_some()
    }

    pub fn observe(&mut self, clock: &TickClock, now: Tick) -> GateDecision {
        match self.trapped_at {
            None => {
                self.trapped_at = Some(now);
                GateDecision::GracefulStop
            }
            Some(first) if clock.age_seconds(first, now) >= self.forced_delay_secs => {
                GateDecision::ForceKill
            }
            Some(first) => {
                info!(
                    "Interrupt repeated after {}s; repeat after {}s to force an immediate stop",
                    clock.age_seconds(first, now),
                    self.forced_delay_secs
                );
                GateDecision::Ignore
            }
        }
    }
}
