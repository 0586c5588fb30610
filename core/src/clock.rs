//! Monotonic tick clock
//!
//! All timeouts, heartbeats and backoff deadlines inside the supervisor are
//! expressed in ticks rather than wall-clock time. A tick is an opaque `u32`
//! that wraps at 2^32; differences are computed with wrapping subtraction and
//! interpreted as signed, so comparisons stay correct across the wrap as long
//! as the two ticks are less than 2^31 ticks apart.
//!
//! ## Modes
//!
//! - **Wall clock**: ticks are derived from the system clock on every read.
//! - **Independent**: a dedicated thread advances an atomic counter once per
//!   tick period. The thread also watches the drift between counter time and
//!   system time and logs when it leaves (or re-enters) the configured band.
//!   The counter is never corrected, so a system clock change does not make
//!   timeouts fire early or late.
//! - **Manual**: the counter only moves when [`TickClock::advance`] is called.

use crate::{CoreError, Result};
use schema::{TimerMode, TimingConfig};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Opaque tick value
pub type Tick = u32;

/// Shared tick source handed to the main loop and background actors
#[derive(Clone, Debug)]
pub struct TickClock {
    tick_ms: u32,
    source: Source,
}

#[derive(Clone, Debug)]
enum Source {
    WallClock,
    Counter {
        counter: Arc<AtomicU32>,
        _timer: Option<Arc<TimerThread>>,
    },
}

impl TickClock {
    /// Start a clock according to the timing configuration.
    ///
    /// Fails with [`CoreError::ClockInit`] when the tick period is invalid or
    /// the timer thread cannot be created.
    pub fn start(timing: &TimingConfig) -> Result<Self> {
        validate_tick_ms(timing.tick_ms)?;
        match timing.timer_mode {
            TimerMode::WallClock => {
                debug!("Using wall-clock tick source ({} ms)", timing.tick_ms);
                Ok(Self {
                    tick_ms: timing.tick_ms,
                    source: Source::WallClock,
                })
            }
            TimerMode::Independent => {
                let counter = Arc::new(AtomicU32::new(0));
                let band = DriftBand {
                    fast_ms: i64::from(timing.timer_fast_threshold_secs) * 1000,
                    slow_ms: i64::from(timing.timer_slow_threshold_secs) * 1000,
                };
                let timer = TimerThread::spawn(counter.clone(), timing.tick_ms, band)?;
                Ok(Self {
                    tick_ms: timing.tick_ms,
                    source: Source::Counter {
                        counter,
                        _timer: Some(Arc::new(timer)),
                    },
                })
            }
        }
    }

    /// Create a manually advanced clock starting at `start`
    pub fn manual(tick_ms: u32, start: Tick) -> Self {
        Self {
            tick_ms: if tick_ms == 0 { 1 } else { tick_ms },
            source: Source::Counter {
                counter: Arc::new(AtomicU32::new(start)),
                _timer: None,
            },
        }
    }

    /// Tick period in milliseconds
    pub fn tick_ms(&self) -> u32 {
        self.tick_ms
    }

    /// Tick period as a Duration
    pub fn period(&self) -> Duration {
        Duration::from_millis(u64::from(self.tick_ms))
    }

    /// Current tick
    pub fn now(&self) -> Tick {
        match &self.source {
            Source::WallClock => wall_ticks(self.tick_ms),
            Source::Counter { counter, .. } => counter.load(Ordering::Acquire),
        }
    }

    /// Advance a counter clock by `ticks`. Has no effect on a wall clock.
    pub fn advance(&self, ticks: u32) {
        if let Source::Counter { counter, .. } = &self.source {
            counter.fetch_add(ticks, Ordering::AcqRel);
        }
    }

    /// Advance a counter clock by whole seconds
    pub fn advance_secs(&self, seconds: u32) {
        self.advance(self.secs_to_ticks(seconds));
    }

    /// Tick that lies `seconds` after `base`
    pub fn add_seconds(&self, base: Tick, seconds: u32) -> Tick {
        base.wrapping_add(self.secs_to_ticks(seconds))
    }

    /// Tick that lies `duration` after `base` (rounded down to whole ticks)
    pub fn add_duration(&self, base: Tick, duration: Duration) -> Tick {
        let ticks = duration.as_millis() / u128::from(self.tick_ms);
        base.wrapping_add(ticks.min(i32::MAX as u128) as u32)
    }

    /// Signed age of `reference` at `now`, in seconds
    pub fn age_seconds(&self, reference: Tick, now: Tick) -> i64 {
        let ticks = now.wrapping_sub(reference) as i32;
        i64::from(ticks) * i64::from(self.tick_ms) / 1000
    }

    /// Whether `deadline` has been reached at `now`
    pub fn is_due(&self, deadline: Tick, now: Tick) -> bool {
        (now.wrapping_sub(deadline) as i32) >= 0
    }

    fn secs_to_ticks(&self, seconds: u32) -> u32 {
        let ticks = u64::from(seconds) * 1000 / u64::from(self.tick_ms);
        ticks.min(i32::MAX as u64) as u32
    }
}

fn validate_tick_ms(tick_ms: u32) -> Result<()> {
    if tick_ms == 0 || 1000 % tick_ms != 0 {
        return Err(CoreError::ClockInit(format!(
            "tick period {} ms must be non-zero and divide 1000",
            tick_ms
        )));
    }
    Ok(())
}

fn wall_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn wall_ticks(tick_ms: u32) -> Tick {
    (wall_millis() / u64::from(tick_ms)) as u32
}

/// Drift thresholds in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriftBand {
    pub fast_ms: i64,
    pub slow_ms: i64,
}

/// Position of the counter relative to wall time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftState {
    InBand,
    Ahead,
    Behind,
}

/// Tracks drift transitions so each one is reported once
#[derive(Debug)]
pub struct DriftMonitor {
    band: DriftBand,
    state: DriftState,
}

impl DriftMonitor {
    pub fn new(band: DriftBand) -> Self {
        Self {
            band,
            state: DriftState::InBand,
        }
    }

    /// Record a drift sample (counter time minus wall time, in ms).
    /// Returns the new state only when it differs from the previous one.
    pub fn observe(&mut self, drift_ms: i64) -> Option<DriftState> {
        let next = if self.band.fast_ms > 0 && drift_ms >= self.band.fast_ms {
            DriftState::Ahead
        } else if self.band.slow_ms > 0 && drift_ms <= -self.band.slow_ms {
            DriftState::Behind
        } else {
            DriftState::InBand
        };
        if next == self.state {
            return None;
        }
        self.state = next;
        Some(next)
    }

    pub fn state(&self) -> DriftState {
        self.state
    }
}

/// Background thread advancing the shared counter
#[derive(Debug)]
struct TimerThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TimerThread {
    fn spawn(counter: Arc<AtomicU32>, tick_ms: u32, band: DriftBand) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let handle = std::thread::Builder::new()
            .name("warden-timer".into())
            .spawn(move || run_timer(counter, tick_ms, band, thread_stop))
            .map_err(|e| CoreError::ClockInit(format!("failed to start timer thread: {}", e)))?;
        info!("Independent tick timer started ({} ms period)", tick_ms);
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_timer(counter: Arc<AtomicU32>, tick_ms: u32, band: DriftBand, stop: Arc<AtomicBool>) {
    let period = Duration::from_millis(u64::from(tick_ms));
    let start_wall = wall_millis() as i64;
    let start_ticks = counter.load(Ordering::Acquire);
    let mut monitor = DriftMonitor::new(band);

    while !stop.load(Ordering::Acquire) {
        std::thread::sleep(period);
        let now = counter.fetch_add(1, Ordering::AcqRel).wrapping_add(1);

        let counter_ms = i64::from(now.wrapping_sub(start_ticks)) * i64::from(tick_ms);
        let wall_ms = wall_millis() as i64 - start_wall;
        match monitor.observe(counter_ms - wall_ms) {
            Some(DriftState::Ahead) => warn!(
                "timer fell ahead of the system clock by {} ms",
                counter_ms - wall_ms
            ),
            Some(DriftState::Behind) => warn!(
                "timer fell behind the system clock by {} ms",
                wall_ms - counter_ms
            ),
            Some(DriftState::InBand) => info!("timer back in sync with the system clock"),
            None => {}
        }
    }
    debug!("Tick timer thread exiting");
}
