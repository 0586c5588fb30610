//! Unix signal listeners
//!
//! Signals are translated into urgent flags or queued control events and
//! never touch supervisor state directly:
//!
//! | signal  | effect                                  |
//! |---------|-----------------------------------------|
//! | SIGINT  | urgent `Interrupt`                      |
//! | SIGHUP  | urgent `Close`                          |
//! | SIGTERM | urgent `Shutdown`                       |
//! | SIGQUIT | `Dump` event                            |
//! | SIGUSR1 | configured [`SignalAction`]             |
//! | SIGUSR2 | configured [`SignalAction`]             |

use crate::{DaemonError, Result};
use schema::{ControlCode, SignalAction, SignalConfig, UrgentFlag};
use std::future::Future;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::{debug, info, warn};
use warden_core::control::{ControlProducer, UrgentHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorSignal {
    Interrupt,
    Hangup,
    Terminate,
    Quit,
    User1,
    User2,
}

/// Where a received signal goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalRoute {
    Urgent(UrgentFlag),
    Event(ControlCode),
    Ignore,
}

/// Resolve a signal against the configured user-signal actions
pub fn route_signal(sig: SupervisorSignal, config: &SignalConfig) -> SignalRoute {
    match sig {
        SupervisorSignal::Interrupt => SignalRoute::Urgent(UrgentFlag::Interrupt),
        SupervisorSignal::Hangup => SignalRoute::Urgent(UrgentFlag::Close),
        SupervisorSignal::Terminate => SignalRoute::Urgent(UrgentFlag::Shutdown),
        SupervisorSignal::Quit => SignalRoute::Event(ControlCode::Dump),
        SupervisorSignal::User1 => user_route(config.usr1, ControlCode::ForwardUsr1),
        SupervisorSignal::User2 => user_route(config.usr2, ControlCode::ForwardUsr2),
    }
}

fn user_route(action: SignalAction, forward: ControlCode) -> SignalRoute {
    match action {
        SignalAction::Ignore => SignalRoute::Ignore,
        SignalAction::Forward => SignalRoute::Event(forward),
        SignalAction::Pause => SignalRoute::Event(ControlCode::Pause),
        SignalAction::Resume => SignalRoute::Event(ControlCode::Resume),
        SignalAction::Restart => SignalRoute::Event(ControlCode::Restart),
        SignalAction::Shutdown => SignalRoute::Urgent(UrgentFlag::Shutdown),
    }
}

/// Deliver a routed signal to the main loop
pub fn deliver(route: SignalRoute, producer: &ControlProducer, urgent: &UrgentHandle) {
    match route {
        SignalRoute::Urgent(flag) => urgent.set_urgent(flag),
        SignalRoute::Event(code) => {
            if !producer.try_enqueue(code) {
                debug!("Signal event {} dropped", code);
            }
        }
        SignalRoute::Ignore => {}
    }
}

fn install(kind: SignalKind, name: &str) -> Result<Signal> {
    signal(kind)
        .map_err(|e| DaemonError::SignalError(format!("Failed to install {} handler: {}", name, e)))
}

/// Install all handlers and return the listener loop
///
/// Handlers are installed before this returns, so a signal arriving before
/// the loop is first polled is not lost.
pub fn listener(
    producer: ControlProducer,
    urgent: UrgentHandle,
    config: SignalConfig,
) -> Result<impl Future<Output = ()> + Send + 'static> {
    let mut sigint = install(SignalKind::interrupt(), "SIGINT")?;
    let mut sighup = install(SignalKind::hangup(), "SIGHUP")?;
    let mut sigterm = install(SignalKind::terminate(), "SIGTERM")?;
    let mut sigquit = install(SignalKind::quit(), "SIGQUIT")?;
    let mut sigusr1 = install(SignalKind::user_defined1(), "SIGUSR1")?;
    let mut sigusr2 = install(SignalKind::user_defined2(), "SIGUSR2")?;
    info!("Signal handlers installed");

    Ok(async move {
        loop {
            let sig = tokio::select! {
                Some(()) = sigint.recv() => SupervisorSignal::Interrupt,
                Some(()) = sighup.recv() => SupervisorSignal::Hangup,
                Some(()) = sigterm.recv() => SupervisorSignal::Terminate,
                Some(()) = sigquit.recv() => SupervisorSignal::Quit,
                Some(()) = sigusr1.recv() => SupervisorSignal::User1,
                Some(()) = sigusr2.recv() => SupervisorSignal::User2,
                else => {
                    warn!("All signal streams closed");
                    break;
                }
            };
            let route = route_signal(sig, &config);
            debug!("Received {:?}, routing to {:?}", sig, route);
            deliver(route, &producer, &urgent);
        }
    })
}
