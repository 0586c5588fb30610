//! Local control socket server
//!
//! Listens on a Unix Domain Socket created with mode 0600 and answers one
//! newline-delimited JSON [`Message`] per line with one [`Response`] line.
//! Requests are delegated to a [`ControlPlane`] implementation.

use crate::{read_frame, write_frame, IpcError, Result};
use schema::{Message, Response, StatusSnapshot};
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

/// Abstract control plane that the server delegates to
#[async_trait::async_trait]
#[allow(missing_docs)]
pub trait ControlPlane: Send + Sync {
    async fn status(&self) -> Result<StatusSnapshot>;
    async fn stop(&self) -> Result<()>;
    async fn pause(&self) -> Result<()>;
    async fn resume(&self) -> Result<()>;
    async fn control(&self, code: u8) -> Result<()>;
    async fn dump(&self) -> Result<()>;
}

/// Answer one message through the control plane
pub async fn route(router: &dyn ControlPlane, message: Message) -> Response {
    let result = match message {
        Message::Status => router.status().await.map(Response::Status),
        Message::Stop => router.stop().await.map(|()| ok("stop requested")),
        Message::Pause => router.pause().await.map(|()| ok("pause requested")),
        Message::Resume => router.resume().await.map(|()| ok("resume requested")),
        Message::Control { code } => router
            .control(code)
            .await
            .map(|()| ok(format!("control code {} delivered", code))),
        Message::Dump => router.dump().await.map(|()| ok("dump requested")),
    };
    result.unwrap_or_else(|e| error_response(&e))
}

fn ok(message: impl Into<String>) -> Response {
    Response::Ok {
        message: message.into(),
    }
}

fn error_response(e: &IpcError) -> Response {
    Response::Error {
        message: e.to_string(),
        code: Some(e.code().to_string()),
    }
}

/// Pause after a failed accept so a persistent error cannot spin the loop
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// A bound control socket
///
/// The socket file is removed when the server is dropped.
#[allow(missing_debug_implementations)]
pub struct ControlServer {
    path: PathBuf,
    listener: UnixListener,
    router: Arc<dyn ControlPlane>,
}

impl ControlServer {
    /// Bind the socket at `path`, replacing a stale socket file
    ///
    /// Anything at `path` that is not a socket is left alone and the bind fails.
    pub fn bind(path: impl Into<PathBuf>, router: Arc<dyn ControlPlane>) -> Result<Self> {
        let path = path.into();
        if let Ok(meta) = std::fs::symlink_metadata(&path) {
            if !meta.file_type().is_socket() {
                return Err(IpcError::ConnectionFailed(format!(
                    "Refusing to replace {:?}: exists and is not a socket",
                    path
                )));
            }
            match std::fs::remove_file(&path) {
                Ok(_) => debug!("Removed existing socket at {:?}", path),
                Err(e) => {
                    return Err(IpcError::ProtocolError(format!(
                        "Failed to remove existing socket {:?}: {}",
                        path, e
                    )));
                }
            }
        }

        let listener = UnixListener::bind(&path).map_err(|e| {
            IpcError::ConnectionFailed(format!("Failed to bind UDS {:?}: {}", path, e))
        })?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).map_err(|e| {
            IpcError::ConnectionFailed(format!("Failed to restrict UDS {:?}: {}", path, e))
        })?;
        info!("Control socket listening at {:?}", path);

        Ok(Self {
            path,
            listener,
            router,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until the task is dropped
    pub async fn serve(self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    let router = self.router.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, router).await {
                            warn!("Control connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept control connection: {}", e);
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove control socket {:?}: {}", self.path, e);
            }
        }
    }
}

async fn handle_connection(stream: UnixStream, router: Arc<dyn ControlPlane>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    while let Some(frame) = read_frame(&mut reader).await? {
        let response = match serde_json::from_slice::<Message>(&frame) {
            Ok(message) => {
                debug!("Control request: {:?}", message);
                route(router.as_ref(), message).await
            }
            Err(e) => error_response(&IpcError::DeserializationFailed(e.to_string())),
        };
        write_frame(&mut writer, &response).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ControlClient;
    use std::sync::Mutex;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

    #[derive(Default)]
    struct RecordingPlane {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingPlane {
        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    #[async_trait::async_trait]
    impl ControlPlane for RecordingPlane {
        async fn status(&self) -> Result<StatusSnapshot> {
            self.record("status");
            Ok(StatusSnapshot::initial())
        }
        async fn stop(&self) -> Result<()> {
            self.record("stop");
            Ok(())
        }
        async fn pause(&self) -> Result<()> {
            self.record("pause");
            Err(IpcError::Rejected("control queue full".to_string()))
        }
        async fn resume(&self) -> Result<()> {
            self.record("resume");
            Ok(())
        }
        async fn control(&self, code: u8) -> Result<()> {
            self.record(format!("control {}", code));
            Ok(())
        }
        async fn dump(&self) -> Result<()> {
            self.record("dump");
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_route_maps_results_to_responses() {
        let plane = RecordingPlane::default();
        assert_eq!(
            route(&plane, Message::Status).await,
            Response::Status(StatusSnapshot::initial())
        );
        match route(&plane, Message::Pause).await {
            Response::Error { message, code } => {
                assert!(message.contains("control queue full"));
                assert_eq!(code.as_deref(), Some("IPC011"));
            }
            other => panic!("expected error response, got {other:?}"),
        }
        assert_eq!(
            route(&plane, Message::Control { code: 200 }).await,
            Response::Ok {
                message: "control code 200 delivered".to_string()
            }
        );
        assert_eq!(
            *plane.calls.lock().unwrap(),
            vec!["status", "pause", "control 200"]
        );
    }

    #[tokio::test]
    async fn test_server_answers_client_and_restricts_socket() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("warden.sock");
        drop(std::os::unix::net::UnixListener::bind(&sock).unwrap());
        assert!(sock.exists(), "stale socket file left behind");

        let plane = Arc::new(RecordingPlane::default());
        let server = ControlServer::bind(&sock, plane.clone()).unwrap();
        let mode = std::fs::metadata(&sock).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let task = tokio::spawn(server.serve());

        let client = ControlClient::new(&sock);
        let response = client.send_message(&Message::Stop).await.unwrap();
        assert_eq!(
            response,
            Response::Ok {
                message: "stop requested".to_string()
            }
        );
        let response = client.send_message(&Message::Status).await.unwrap();
        assert!(matches!(response, Response::Status(_)));

        task.abort();
        let _ = task.await;
        assert!(!sock.exists(), "socket should be removed with the server");
        assert_eq!(*plane.calls.lock().unwrap(), vec!["stop", "status"]);
    }

    #[tokio::test]
    async fn test_bind_refuses_to_replace_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.sock");
        std::fs::write(&path, b"not a socket").unwrap();

        let err = match ControlServer::bind(&path, Arc::new(RecordingPlane::default())) {
            Ok(_) => panic!("bind replaced a regular file"),
            Err(e) => e,
        };
        assert_eq!(err.code(), "IPC001");
        assert!(err.to_string().contains("not a socket"), "{}", err);
        assert_eq!(std::fs::read(&path).unwrap(), b"not a socket");
    }

    #[tokio::test]
    async fn test_invalid_request_gets_error_line_and_connection_survives() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("warden.sock");
        let server = ControlServer::bind(&sock, Arc::new(RecordingPlane::default())).unwrap();
        let task = tokio::spawn(server.serve());

        let stream = UnixStream::connect(&sock).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer.write_all(b"{\"reboot\":true}\n").await.unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        let response: Response = serde_json::from_str(&line).unwrap();
        match response {
            Response::Error { code, .. } => assert_eq!(code.as_deref(), Some("IPC005")),
            other => panic!("expected error response, got {other:?}"),
        }

        writer.write_all(b"\"dump\"\n").await.unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        let response: Response = serde_json::from_str(&line).unwrap();
        assert_eq!(
            response,
            Response::Ok {
                message: "dump requested".to_string()
            }
        );

        task.abort();
    }
}
