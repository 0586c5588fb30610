//! IPC error types and utilities

use thiserror::Error;

/// IPC-specific error types
#[derive(Error, Debug)]
pub enum IpcError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Failed to send message: {0}")]
    SendFailed(String),

    #[error("Failed to receive response: {0}")]
    ReceiveFailed(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Received empty response")]
    EmptyResponse,

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Elevation channel failed: {0}")]
    ElevationFailed(String),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl IpcError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            IpcError::ConnectionFailed(_) => "IPC001",
            IpcError::SendFailed(_) => "IPC002",
            IpcError::ReceiveFailed(_) => "IPC003",
            IpcError::SerializationFailed(_) => "IPC004",
            IpcError::DeserializationFailed(_) => "IPC005",
            IpcError::EmptyResponse => "IPC006",
            IpcError::ProtocolError(_) => "IPC007",
            IpcError::Timeout(_) => "IPC008",
            IpcError::PermissionDenied(_) => "IPC009",
            IpcError::ElevationFailed(_) => "IPC010",
            IpcError::Rejected(_) => "IPC011",
        }
    }

    /// Whether retrying with elevated privileges could succeed
    pub fn needs_elevation(&self) -> bool {
        matches!(self, IpcError::PermissionDenied(_))
    }
}

/// IPC-specific result type
pub type Result<T> = std::result::Result<T, IpcError>;
