//! CLI error types

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Supervisor error: {0}")]
    SupervisorError(String),

    #[error("Service unit error: {0}")]
    ServiceUnit(String),

    #[error(transparent)]
    Core(#[from] warden_core::CoreError),

    #[error(transparent)]
    Ipc(#[from] ipc::IpcError),

    #[error(transparent)]
    Daemon(#[from] daemon::DaemonError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CliError {
    /// Get error code for this error type
    ///
    /// Wrapped errors keep the code of the crate that raised them.
    pub fn code(&self) -> &'static str {
        match self {
            CliError::CommandFailed(_) => "CLI001",
            CliError::InvalidArgument(_) => "CLI002",
            CliError::SupervisorError(_) => "CLI003",
            CliError::ServiceUnit(_) => "CLI004",
            CliError::Core(e) => e.code(),
            CliError::Ipc(e) => e.code(),
            CliError::Daemon(e) => e.code(),
            CliError::IoError(_) => "CLI008",
        }
    }

    /// Whether retrying through the privileged relaunch channel could help
    pub fn needs_elevation(&self) -> bool {
        matches!(self, CliError::Ipc(e) if e.needs_elevation())
    }
}

/// CLI-specific result type
pub type Result<T> = std::result::Result<T, CliError>;
