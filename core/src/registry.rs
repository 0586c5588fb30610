//! Service-registry reporting
//!
//! Every accepted supervisor transition is reported to a [`ServiceRegistry`]
//! together with a wait hint: how long the registry should expect the
//! transitional state to last.
//!
//! ## Implementations
//!
//! - [`LogRegistry`]: logs transitions, used in console mode
//! - [`SystemdNotifier`]: speaks the `sd_notify` datagram protocol on
//!   `$NOTIFY_SOCKET`, used in service mode under systemd

use schema::SupervisorState;
use std::io;
use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Receiver of supervisor state reports
pub trait ServiceRegistry: Send + Sync {
    /// Report an accepted transition
    fn report(&self, state: SupervisorState, wait_hint: Duration);

    /// Free-form status line
    fn status(&self, _text: &str) {}
}

/// Registry that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRegistry;

impl ServiceRegistry for LogRegistry {
    fn report(&self, state: SupervisorState, wait_hint: Duration) {
        if wait_hint.is_zero() {
            info!("Supervisor state: {:?}", state);
        } else {
            info!("Supervisor state: {:?} (wait hint {:?})", state, wait_hint);
        }
    }
}

/// `sd_notify` client
#[derive(Debug)]
pub struct SystemdNotifier {
    target: NotifyTarget,
    socket: UnixDatagram,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NotifyTarget {
    Path(PathBuf),
    #[cfg(target_os = "linux")]
    Abstract(Vec<u8>),
}

impl SystemdNotifier {
    /// Connect to `$NOTIFY_SOCKET`; `None` when not running under systemd
    pub fn from_env() -> Option<Self> {
        let raw = std::env::var_os("NOTIFY_SOCKET")?;
        let raw = raw.to_string_lossy().into_owned();
        match Self::new(&raw) {
            Ok(notifier) => Some(notifier),
            Err(e) => {
                warn!("Ignoring NOTIFY_SOCKET {:?}: {}", raw, e);
                None
            }
        }
    }

    /// Create a notifier for a socket path; a leading `@` names an abstract socket
    pub fn new(address: &str) -> io::Result<Self> {
        let target = parse_target(address)?;
        let socket = UnixDatagram::unbound()?;
        Ok(Self { target, socket })
    }

    /// Send one raw notification
    pub fn notify(&self, message: &str) -> io::Result<()> {
        debug!("sd_notify: {}", message.replace('\n', " "));
        match &self.target {
            NotifyTarget::Path(path) => self.socket.send_to(message.as_bytes(), path)?,
            #[cfg(target_os = "linux")]
            NotifyTarget::Abstract(name) => {
                use std::os::linux::net::SocketAddrExt;
                let addr = std::os::unix::net::SocketAddr::from_abstract_name(name)?;
                self.socket.send_to_addr(message.as_bytes(), &addr)?
            }
        };
        Ok(())
    }
}

fn parse_target(address: &str) -> io::Result<NotifyTarget> {
    if address.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty socket address"));
    }
    if let Some(name) = address.strip_prefix('@') {
        #[cfg(target_os = "linux")]
        return Ok(NotifyTarget::Abstract(name.as_bytes().to_vec()));
        #[cfg(not(target_os = "linux"))]
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("abstract socket {} not supported on this platform", name),
        ));
    }
    Ok(NotifyTarget::Path(PathBuf::from(address)))
}

/// Notification payload for a transition
pub fn notify_message(state: SupervisorState, wait_hint: Duration) -> String {
    let extend = |status: &str| {
        if wait_hint.is_zero() {
            format!("STATUS={}", status)
        } else {
            format!(
                "EXTEND_TIMEOUT_USEC={}\nSTATUS={}",
                wait_hint.as_micros(),
                status
            )
        }
    };
    match state {
        SupervisorState::Starting => extend("starting"),
        SupervisorState::Started => "READY=1\nSTATUS=running".to_string(),
        SupervisorState::Pausing => extend("pausing"),
        SupervisorState::Paused => "STATUS=paused".to_string(),
        SupervisorState::Resuming => extend("resuming"),
        SupervisorState::Stopping => format!("STOPPING=1\n{}", extend("stopping")),
        SupervisorState::Stopped => "STATUS=stopped".to_string(),
    }
}

impl ServiceRegistry for SystemdNotifier {
    fn report(&self, state: SupervisorState, wait_hint: Duration) {
        if let Err(e) = self.notify(&notify_message(state, wait_hint)) {
            warn!("Failed to notify systemd of {:?}: {}", state, e);
        }
    }

    fn status(&self, text: &str) {
        if let Err(e) = self.notify(&format!("STATUS={}", text)) {
            warn!("Failed to send status to systemd: {}", e);
        }
    }
}
