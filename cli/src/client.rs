//! Control socket client used by the socket verbs

use crate::{CliError, Result};
use ipc::ControlClient;
use schema::{Message, Response, StatusSnapshot};
use std::fmt::Write as _;
use std::path::Path;
use tracing::debug;

/// CLI client for talking to a running supervisor
#[derive(Debug, Clone)]
pub struct Client {
    inner: ControlClient,
}

impl Client {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            inner: ControlClient::new(socket_path.as_ref()),
        }
    }

    /// Wrap an already configured control client
    pub fn from_control_client(inner: ControlClient) -> Self {
        Self { inner }
    }

    /// Send a request and turn an error response into [`CliError::SupervisorError`]
    pub async fn request(&self, message: Message) -> Result<Response> {
        debug!("Sending {:?} to {}", message, self.inner.socket_path().display());
        match self.inner.send_message(&message).await? {
            Response::Error { message, code } => Err(CliError::SupervisorError(match code {
                Some(code) => format!("{} [{}]", message, code),
                None => message,
            })),
            response => Ok(response),
        }
    }

    /// Fetch the current status snapshot
    pub async fn fetch_status(&self) -> Result<StatusSnapshot> {
        match self.request(Message::Status).await? {
            Response::Status(snapshot) => Ok(snapshot),
            other => Err(CliError::CommandFailed(format!(
                "unexpected response to status: {:?}",
                other
            ))),
        }
    }

    /// Print supervisor status
    pub async fn status(&self) -> Result<()> {
        let snapshot = self.fetch_status().await?;
        print!("{}", format_status(&snapshot));
        Ok(())
    }

    /// Send a command that answers with a plain acknowledgement and print it
    pub async fn command(&self, message: Message) -> Result<()> {
        match self.request(message).await? {
            Response::Ok { message } => {
                println!("✓ {}", message);
                Ok(())
            }
            other => Err(CliError::CommandFailed(format!(
                "unexpected response: {:?}",
                other
            ))),
        }
    }
}

/// Human-readable status report
pub fn format_status(snapshot: &StatusSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Supervisor Status:");
    let _ = writeln!(out, "  Supervisor: {:?}", snapshot.supervisor_state);
    let _ = writeln!(out, "  Process: {:?}", snapshot.process_state);
    if let Some(pid) = snapshot.pid {
        let _ = writeln!(out, "  PID: {}", pid);
        let _ = writeln!(out, "  Uptime: {} seconds", snapshot.uptime_secs);
    }
    let _ = writeln!(out, "  Restarts: {}", snapshot.restarts);
    if snapshot.consecutive_failures > 0 {
        let _ = writeln!(
            out,
            "  Consecutive failures: {}",
            snapshot.consecutive_failures
        );
    }
    if snapshot.dropped_events > 0 {
        let _ = writeln!(out, "  Dropped control events: {}", snapshot.dropped_events);
    }
    out
}
