#![allow(unused_crate_dependencies)]
//! IPC (Inter-Process Communication) module
//!
//! This crate carries the two local channels of warden:
//! - the control socket: newline-delimited JSON [`Message`]/[`Response`]
//!   frames between the `warden` verbs and a running supervisor
//! - the privileged relaunch channel ([`elevation`]), which runs an elevated
//!   copy of the executable and relays its standard streams

pub mod error;
#[cfg(unix)]
pub mod elevation;
#[cfg(unix)]
pub mod server;

#[cfg(test)]
mod error_tests;

pub use error::{IpcError, Result};

use schema::{Message, Response};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

/// Maximum allowed frame size for IPC messages (64KB)
/// This prevents unbounded memory growth from malicious or buggy peers
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Default time allowed for one request/response exchange
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Read one newline-terminated frame with bounded buffering
///
/// Returns `Ok(None)` when the peer closed the stream before sending anything.
pub async fn read_frame<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut buffer = Vec::with_capacity(4096);
    loop {
        let chunk = reader
            .fill_buf()
            .await
            .map_err(|e| IpcError::ReceiveFailed(e.to_string()))?;
        if chunk.is_empty() {
            if buffer.is_empty() {
                return Ok(None);
            }
            return Err(IpcError::ProtocolError(
                "incomplete frame: connection closed before newline terminator".to_string(),
            ));
        }

        let newline_pos = chunk.iter().position(|b| *b == b'\n');
        let to_copy = newline_pos.map_or(chunk.len(), |idx| idx + 1);
        let next_len = buffer.len() + to_copy;
        if next_len > MAX_FRAME_SIZE {
            return Err(IpcError::ProtocolError(format!(
                "Frame size {next_len} exceeds maximum allowed size of {MAX_FRAME_SIZE} bytes"
            )));
        }

        buffer.extend_from_slice(&chunk[..to_copy]);
        reader.consume(to_copy);
        if newline_pos.is_some() {
            break;
        }
    }

    // Trim trailing newline/carriage return
    if matches!(buffer.last(), Some(b'\n')) {
        buffer.pop();
        if matches!(buffer.last(), Some(b'\r')) {
            buffer.pop();
        }
    }
    Ok(Some(buffer))
}

/// Serialize `value` as one JSON line and flush it
pub async fn write_frame<W: AsyncWrite + Unpin, T: Serialize>(writer: &mut W, value: &T) -> Result<()> {
    let mut data =
        serde_json::to_vec(value).map_err(|e| IpcError::SerializationFailed(e.to_string()))?;
    data.push(b'\n');
    writer
        .write_all(&data)
        .await
        .map_err(|e| IpcError::SendFailed(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| IpcError::SendFailed(e.to_string()))
}

/// Client for a running supervisor's control socket
#[derive(Debug, Clone)]
pub struct ControlClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl ControlClient {
    /// Create a client for the socket at `socket_path`
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Connect to the supervisor and send a message
    ///
    /// # Errors
    ///
    /// Returns [`IpcError::PermissionDenied`] when the socket exists but this
    /// user may not open it, [`IpcError::Timeout`] when the exchange takes
    /// longer than the configured timeout, and the usual transport and
    /// serialization errors otherwise.
    #[cfg(unix)]
    pub async fn send_message(&self, message: &Message) -> Result<Response> {
        tokio::time::timeout(self.timeout, self.exchange(message))
            .await
            .map_err(|_| {
                IpcError::Timeout(format!(
                    "no reply from {:?} within {:?}",
                    self.socket_path, self.timeout
                ))
            })?
    }

    #[cfg(unix)]
    async fn exchange(&self, message: &Message) -> Result<Response> {
        debug!("Connecting to supervisor at {:?}", self.socket_path);
        let stream = tokio::net::UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::PermissionDenied => {
                    IpcError::PermissionDenied(format!("{:?}: {}", self.socket_path, e))
                }
                _ => IpcError::ConnectionFailed(format!("{:?}: {}", self.socket_path, e)),
            })?;

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        write_frame(&mut writer, message).await?;

        let frame = read_frame(&mut reader).await?.ok_or(IpcError::EmptyResponse)?;
        let response: Response = serde_json::from_slice(&frame)
            .map_err(|e| IpcError::DeserializationFailed(e.to_string()))?;

        Ok(response)
    }
}
