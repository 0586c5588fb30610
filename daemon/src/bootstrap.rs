//! Daemon bootstrap: wire the supervisor, signal listeners and control socket
//!
//! [`Bootstrap::run`] owns one supervisor run from start to exit code:
//! tick clock, pid file, capabilities, registry selection, panic hook,
//! signal listeners, control socket, main loop and cleanup.
//!
//! The main loop runs in its own task. A panic there, or in any background
//! task, ends the run with [`RunOutcome::SupervisorFailure`], so the process
//! still exits with the configured error code after cleanup.

use crate::control_plane::SupervisorControlPlane;
use crate::{signals, Result};
use ipc::server::ControlServer;
use schema::{RunMode, SupervisorSpec, UrgentFlag};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use warden_core::capabilities::Capabilities;
use warden_core::clock::TickClock;
use warden_core::diagnostics::install_panic_hook;
use warden_core::pidfile::PidFile;
use warden_core::registry::{LogRegistry, ServiceRegistry, SystemdNotifier};
use warden_core::supervisor::{
    ProcessAdapter, RunOutcome, SupervisorContext, UnixProcessAdapter,
};

/// Builder for one supervisor run
#[allow(missing_debug_implementations)]
pub struct Bootstrap {
    spec: SupervisorSpec,
    mode: RunMode,
    adapter: Arc<dyn ProcessAdapter>,
    registry: Option<Arc<dyn ServiceRegistry>>,
    process_hooks: bool,
}

impl Bootstrap {
    pub fn new(spec: SupervisorSpec, mode: RunMode) -> Self {
        Self {
            spec,
            mode,
            adapter: Arc::new(UnixProcessAdapter::new()),
            registry: None,
            process_hooks: true,
        }
    }

    /// Use a different process adapter
    pub fn with_adapter(mut self, adapter: Arc<dyn ProcessAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    /// Report to `registry` instead of choosing one from the run mode
    pub fn with_registry(mut self, registry: Arc<dyn ServiceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Skip the process-wide panic hook and signal handlers
    pub fn without_process_hooks(mut self) -> Self {
        self.process_hooks = false;
        self
    }

    /// Run the supervisor to completion and return the process exit code
    ///
    /// # Errors
    ///
    /// Fails before the main loop starts when the clock cannot start, another
    /// supervisor holds the pid file, or a handler or socket cannot be set up.
    pub async fn run(self) -> Result<i32> {
        let Bootstrap {
            spec,
            mode,
            adapter,
            registry,
            process_hooks,
        } = self;

        let clock = TickClock::start(&spec.timing)?;
        let pid_file = spec
            .paths
            .pid_file
            .as_ref()
            .map(|path| PidFile::acquire(path, std::process::id()))
            .transpose()?;

        let capabilities = Capabilities::detect();
        if let Some(set_subreaper) = capabilities.set_child_subreaper {
            match set_subreaper() {
                Ok(()) => debug!("Adopting orphaned descendants as subreaper"),
                Err(e) => warn!("Could not become child subreaper: {}", e),
            }
        }

        let registry = registry.unwrap_or_else(|| default_registry(mode));
        let (context, handles) = SupervisorContext::new(
            spec.clone(),
            mode,
            clock,
            adapter,
            registry,
            capabilities,
        );

        let dump_writer = context.dump_writer().clone();
        let mut tasks: JoinSet<()> = JoinSet::new();
        let setup = async {
            if process_hooks {
                install_panic_hook(dump_writer, handles.status_rx.clone(), handles.ring.clone());
                tasks.spawn(signals::listener(
                    handles.producer.clone(),
                    handles.urgent.clone(),
                    spec.signals,
                )?);
            }
            if let Some(path) = &spec.paths.control_socket {
                let plane = Arc::new(SupervisorControlPlane::new(&handles));
                let server = ControlServer::bind(path, plane)?;
                tasks.spawn(async move {
                    if let Err(e) = server.serve().await {
                        warn!("Control socket terminated: {}", e);
                    }
                });
            }
            Ok::<(), crate::DaemonError>(())
        };
        if let Err(e) = setup.await {
            tasks.shutdown().await;
            if let Some(pid_file) = pid_file {
                pid_file.release();
            }
            return Err(e);
        }

        info!("Starting supervisor '{}' in {:?} mode", spec.name, mode);
        let mut main_loop = tokio::spawn(context.run());
        let mut background_failed = false;
        let outcome = loop {
            tokio::select! {
                joined = &mut main_loop => break match joined {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!("Supervisor main loop failed: {}", e);
                        RunOutcome::SupervisorFailure
                    }
                },
                Some(joined) = tasks.join_next() => {
                    if let Err(e) = joined {
                        error!("Background task failed: {}, shutting down", e);
                        background_failed = true;
                        handles.urgent.set_urgent(UrgentFlag::Shutdown);
                    }
                }
            }
        };
        let outcome = if background_failed {
            RunOutcome::SupervisorFailure
        } else {
            outcome
        };

        tasks.shutdown().await;
        if let Some(pid_file) = pid_file {
            pid_file.release();
        }

        let code = outcome.exit_code(spec.error_exit_code);
        info!("Supervisor '{}' exiting with code {}", spec.name, code);
        Ok(code)
    }
}

/// Run a supervisor with the real process adapter and process-wide hooks
pub async fn run_supervisor(spec: SupervisorSpec, mode: RunMode) -> Result<i32> {
    Bootstrap::new(spec, mode).run().await
}

fn default_registry(mode: RunMode) -> Arc<dyn ServiceRegistry> {
    if mode == RunMode::Service {
        if let Some(notifier) = SystemdNotifier::from_env() {
            info!("Reporting state changes to systemd");
            return Arc::new(notifier);
        }
        debug!("NOTIFY_SOCKET not set, reporting state changes to the log");
    }
    Arc::new(LogRegistry)
}
