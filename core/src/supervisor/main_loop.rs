//! Supervisor main loop
//!
//! [`SupervisorContext::run`] ticks at the clock period. Each
//! [`SupervisorContext::step`]:
//!
//! 1. takes the urgent flags (shutdown, interrupt, close, logoff)
//! 2. drains the control queue and dispatches every event
//! 3. advances the managed process (reap, stop deadline, launch, stable reset)
//! 4. samples resource diagnostics when due
//! 5. publishes the status snapshot
//!
//! The step returns the run outcome once the supervisor reaches `Stopped`.

use super::{AfterExit, ReapedExit, RunOutcome, SupervisorContext};
use crate::clock::Tick;
use crate::control::GateDecision;
use schema::{
    ControlCode, CustomAction, ProcessState, RunMode, SupervisorState, UrgentFlag,
};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

impl SupervisorContext {
    /// Run until the supervisor stops
    pub async fn run(mut self) -> RunOutcome {
        info!(
            "Supervising '{}': {} {:?}",
            self.spec.name, self.spec.process.command, self.spec.process.args
        );
        let mut tick = interval(self.clock.period());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tick.tick().await;
            if let Some(outcome) = self.step().await {
                self.process.release();
                info!("Supervisor for '{}' stopped: {:?}", self.spec.name, outcome);
                return outcome;
            }
        }
    }

    /// One loop iteration
    pub async fn step(&mut self) -> Option<RunOutcome> {
        let now = self.clock.now();
        if self.machine.state() == SupervisorState::Starting {
            self.machine.transition(SupervisorState::Started);
        }

        self.handle_urgent(now).await;
        self.dispatch_events(now).await;
        self.advance_process(now).await;
        self.sample_diagnostics(now);
        self.publish();

        (self.machine.state() == SupervisorState::Stopped).then_some(self.outcome)
    }

    async fn handle_urgent(&mut self, now: Tick) {
        let urgent = self.queue.take_urgent();
        for flag in urgent.iter() {
            match flag {
                UrgentFlag::Shutdown => {
                    info!("System shutdown requested");
                    self.request_stop(now).await;
                }
                UrgentFlag::Interrupt | UrgentFlag::Close => {
                    let gate = if flag == UrgentFlag::Interrupt {
                        &mut self.interrupt_gate
                    } else {
                        &mut self.close_gate
                    };
                    match gate.observe(&self.clock, now) {
                        GateDecision::GracefulStop => {
                            info!("{:?} received, stopping gracefully", flag);
                            self.request_stop(now).await;
                        }
                        GateDecision::ForceKill => {
                            warn!("{:?} received again, forcing shutdown", flag);
                            self.force_kill().await;
                        }
                        GateDecision::Ignore => {
                            info!(
                                "{:?} repeated within {}s, press again later to force shutdown",
                                flag, self.spec.timing.forced_shutdown_delay_secs
                            );
                        }
                    }
                }
                UrgentFlag::Logoff => match self.mode {
                    RunMode::Service => debug!("Ignoring logoff in service mode"),
                    RunMode::Console => {
                        info!("Session logoff, stopping");
                        self.request_stop(now).await;
                    }
                },
            }
        }
    }

    async fn dispatch_events(&mut self, now: Tick) {
        for event in self.queue.drain_all() {
            let waited = self.clock.age_seconds(event.enqueued_at, now);
            debug!("Dispatching {} (queued {}s)", event.code, waited);
            match event.code {
                ControlCode::Stop | ControlCode::Shutdown => self.request_stop(now).await,
                ControlCode::Pause => self.pause(now).await,
                ControlCode::Resume => self.resume(),
                ControlCode::Interrogate => {
                    let snapshot = self.snapshot();
                    info!("Interrogate: {:?}", snapshot);
                    self.machine.report_current();
                }
                ControlCode::Dump => self.dump("dump event").await,
                ControlCode::Restart => self.restart(now).await,
                ControlCode::ForwardUsr1 => self.process.signal(libc::SIGUSR1).await,
                ControlCode::ForwardUsr2 => self.process.signal(libc::SIGUSR2).await,
                ControlCode::Custom(code) => match self.spec.custom_action(code) {
                    Some(CustomAction::Restart) => self.restart(now).await,
                    Some(CustomAction::Dump) => self.dump(&format!("custom control {}", code)).await,
                    Some(CustomAction::Stop) => self.request_stop(now).await,
                    Some(CustomAction::Ignore) => debug!("Ignoring custom control {}", code),
                    None => warn!("No action configured for custom control code {}", code),
                },
            }
        }
    }

    /// Enter `Stopping` and ask the child to exit
    pub(crate) async fn request_stop(&mut self, now: Tick) {
        if !self.machine.transition(SupervisorState::Stopping) {
            return;
        }
        self.pending_restart = false;
        self.process.cancel_relaunch();
        let timeout = self.spec.timing.shutdown_timeout();
        self.process.request_stop(&self.clock, now, timeout).await;
    }

    async fn force_kill(&mut self) {
        self.machine.transition(SupervisorState::Stopping);
        self.process.kill().await;
        if let Err(e) = self.process.poll_exit() {
            error!("Failed to reap managed process after kill: {}", e);
        }
        self.machine.transition(SupervisorState::Stopped);
    }

    async fn pause(&mut self, now: Tick) {
        if !self.machine.transition(SupervisorState::Pausing) {
            info!("Pause ignored in state {:?}", self.machine.state());
            return;
        }
        self.pending_restart = false;
        self.process.cancel_relaunch();
        let timeout = self.spec.timing.shutdown_timeout();
        self.process.request_stop(&self.clock, now, timeout).await;
    }

    fn resume(&mut self) {
        if !self.machine.transition(SupervisorState::Resuming) {
            info!("Resume ignored in state {:?}", self.machine.state());
        }
    }

    async fn restart(&mut self, now: Tick) {
        if self.machine.state() != SupervisorState::Started {
            info!("Restart ignored in state {:?}", self.machine.state());
            return;
        }
        match self.process.state() {
            ProcessState::Up => {
                info!("Restarting managed process");
                self.pending_restart = true;
                let timeout = self.spec.timing.shutdown_timeout();
                self.process.request_stop(&self.clock, now, timeout).await;
            }
            ProcessState::Down => {
                info!("Restart requested, launching without waiting for backoff");
                self.process.launch_now();
            }
            _ => debug!("Restart already in progress"),
        }
    }

    async fn dump(&mut self, reason: &str) {
        let snapshot = self.snapshot();
        info!("State dump ({}): {:?}", reason, snapshot);
        self.dumps.dump(reason, Some(snapshot), Some(&self.ring));
        self.process.signal(libc::SIGQUIT).await;
    }

    async fn advance_process(&mut self, now: Tick) {
        self.process.poll_output();
        match self.process.poll_exit() {
            Ok(Some(reaped)) => self.on_exit(reaped, now).await,
            Ok(None) => {}
            Err(e) => error!("Failed to poll managed process: {}", e),
        }

        if self.process.stop_deadline_passed(&self.clock, now) {
            warn!(
                "Managed process did not exit within {}s",
                self.spec.timing.shutdown_timeout_secs
            );
            self.process.kill().await;
            if self.machine.state() == SupervisorState::Stopping {
                self.machine.transition(SupervisorState::Stopped);
            }
        }

        match (self.machine.state(), self.process.state()) {
            (SupervisorState::Stopping, ProcessState::Down) => {
                self.machine.transition(SupervisorState::Stopped);
            }
            (SupervisorState::Pausing, ProcessState::Down) => {
                self.machine.transition(SupervisorState::Paused);
            }
            (SupervisorState::Resuming, _) => {
                self.machine.transition(SupervisorState::Started);
            }
            _ => {}
        }

        if self.machine.state() == SupervisorState::Started
            && self.process.can_launch(&self.clock, now)
        {
            self.launch(now).await;
        }

        self.process
            .check_stable(&self.clock, now, self.spec.restart.stable_after());
    }

    async fn on_exit(&mut self, reaped: ReapedExit, now: Tick) {
        if reaped.requested {
            info!(
                "Managed process {} stopped (code {:?}, signal {:?})",
                reaped.exit.pid, reaped.exit.exit_code, reaped.exit.signal
            );
            if std::mem::take(&mut self.pending_restart) {
                self.process.launch_now();
            }
            return;
        }
        if self.machine.state() != SupervisorState::Started {
            info!(
                "Managed process {} exited while {:?}",
                reaped.exit.pid,
                self.machine.state()
            );
            return;
        }

        match self
            .process
            .handle_exit(&reaped.exit, &self.spec, &self.clock, now)
        {
            AfterExit::Relaunch { .. } => {}
            AfterExit::Stop { outcome } => {
                self.outcome = outcome;
                self.request_stop(now).await;
            }
        }
    }

    async fn launch(&mut self, now: Tick) {
        let result = self
            .process
            .launch(&*self.adapter, &self.spec, &self.ring, &self.clock)
            .await;
        let Err(e) = result else {
            return;
        };

        error!(
            "Failed to launch '{}': {}. Check that the command exists, is executable \
             and that the working directory {:?} is accessible",
            self.spec.process.command, e, self.spec.process.working_directory
        );
        if !self.spec.restart.restart_on_spawn_failure {
            self.outcome = RunOutcome::SupervisorFailure;
            self.request_stop(now).await;
            return;
        }
        if let AfterExit::Stop { outcome } = self.process.schedule_backoff(&self.clock, now) {
            self.outcome = outcome;
            self.request_stop(now).await;
        }
    }

    fn sample_diagnostics(&mut self, now: Tick) {
        let interval_secs = self.spec.timing.diagnostics_interval_secs;
        if interval_secs == 0 || !self.capabilities.can_sample() {
            return;
        }
        let Some(pid) = self.process.pid() else {
            return;
        };
        let due = self
            .last_sample
            .map_or(true, |last| self.clock.age_seconds(last, now) >= interval_secs as i64);
        if !due {
            return;
        }
        self.last_sample = Some(now);
        if let Some(sample) = self.capabilities.sample(pid) {
            info!(
                "Managed process {}: rss {:?} KiB, cpu time {:?} ms",
                pid, sample.rss_kib, sample.cpu_time_ms
            );
        }
    }

    fn publish(&mut self) {
        let snapshot = self.snapshot();
        self.status_tx.send_replace(snapshot);
    }
}
