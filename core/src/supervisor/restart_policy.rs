//! Exit classification and restart backoff
//!
//! An exit is first classified ([`classify_exit`]), then mapped to a
//! [`RestartDecision`] through the exit policy ([`decision_for`]). Exits that
//! call for `restartWithBackoff` are counted by [`BackoffTracker`], which
//! yields the delay before the next launch or tells the supervisor to give up.

use schema::{BackoffConfig, ExitClass, ExitPolicy, ProcessExit, RestartConfig, RestartDecision};
use std::time::Duration;
use tracing::{debug, warn};

/// Action to take after a counted failure
#[derive(Debug, Clone, PartialEq)]
pub enum RestartAction {
    /// Restart the process after the specified delay
    Restart { delay: Duration },
    /// Do not restart; retries are exhausted
    Stop,
}

/// Classify an exit.
///
/// A signal always means `Abnormal`. The restart exit code is checked before
/// the clean codes.
pub fn classify_exit(exit: &ProcessExit, policy: &ExitPolicy) -> ExitClass {
    match (exit.signal, exit.exit_code) {
        (Some(_), _) | (None, None) => ExitClass::Abnormal,
        (None, Some(code)) if policy.restart_exit_code == Some(code) => {
            ExitClass::RestartRequested
        }
        (None, Some(code)) if policy.clean_exit_codes.contains(&code) => ExitClass::CleanStop,
        (None, Some(_)) => ExitClass::Ordinary,
    }
}

/// Decision for a classified exit; per-code overrides win over the class
pub fn decision_for(exit: &ProcessExit, class: ExitClass, policy: &ExitPolicy) -> RestartDecision {
    if let Some(code) = exit.exit_code {
        if let Some(o) = policy.codes.iter().find(|o| o.code == code) {
            debug!("Exit code {} overridden to {:?}", code, o.action);
            return o.action;
        }
    }
    match class {
        ExitClass::CleanStop => policy.on_clean,
        ExitClass::Abnormal => policy.on_abnormal,
        ExitClass::RestartRequested => policy.on_restart_request,
        ExitClass::Ordinary => policy.on_ordinary,
    }
}

/// Counts consecutive failures and computes backoff delays
#[derive(Debug, Clone)]
pub struct BackoffTracker {
    config: BackoffConfig,
    max_retries: u32,
    consecutive_failures: u32,
}

impl BackoffTracker {
    pub fn new(restart: &RestartConfig) -> Self {
        Self {
            config: restart.backoff,
            max_retries: restart.max_retries,
            consecutive_failures: 0,
        }
    }

    /// Count one failure.
    ///
    /// Returns [`RestartAction::Stop`] once the count exceeds `maxRetries`.
    pub fn record_failure(&mut self) -> RestartAction {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let n = self.consecutive_failures;
        if n > self.max_retries {
            warn!(
                "Managed process failed {} times in a row (maxRetries {}), giving up",
                n, self.max_retries
            );
            return RestartAction::Stop;
        }
        let delay = self.jittered(self.delay_for(n));
        debug!("Failure {} of {}: restarting in {:?}", n, self.max_retries, delay);
        RestartAction::Restart { delay }
    }

    /// Unjittered delay for the n-th consecutive failure (n >= 1)
    pub fn delay_for(&self, failure: u32) -> Duration {
        let first = self.config.first_delay().as_secs_f64();
        let max = self.config.max_delay().as_secs_f64();
        let exponent = failure.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = (first * self.config.multiplier.powi(exponent)).min(max);
        Duration::from_secs_f64(delay.max(0.0))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.config.jitter <= 0.0 {
            return delay;
        }
        let factor = 1.0 + self.config.jitter * (2.0 * rand::random::<f64>() - 1.0);
        Duration::from_secs_f64((delay.as_secs_f64() * factor).max(0.0))
    }

    /// Clear the failure count
    pub fn reset(&mut self) {
        if self.consecutive_failures > 0 {
            debug!(
                "Resetting failure counter, had {} failures",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
