//! Daemon error types

use ipc::IpcError;
use thiserror::Error;
use warden_core::CoreError;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Ipc(#[from] IpcError),

    #[error("Signal handling error: {0}")]
    SignalError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DaemonError {
    /// Stable code; wrapped errors keep their own
    pub fn code(&self) -> &'static str {
        match self {
            DaemonError::Core(e) => e.code(),
            DaemonError::Ipc(e) => e.code(),
            DaemonError::SignalError(_) => "DAEMON001",
            DaemonError::IoError(_) => "DAEMON002",
        }
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;
