//! Privileged relaunch channel
//!
//! When an action needs rights this process lacks, warden re-invokes itself
//! through the configured elevation command and relays the elevated copy's
//! standard streams over three Unix sockets:
//!
//! ```text
//!  warden (user)                          warden (root)
//!  ┌────────────┐  warden-<id>-in.sock   ┌────────────┐
//!  │ terminal ──┼───────────────────────►│ fd 0       │
//!  │ relay   ◄──┼───────────────────────-│ fd 1       │ warden-<id>-out.sock
//!  │ stderr  ◄──┼───────────────────────-│ fd 2       │ warden-<id>-err.sock
//!  └────────────┘                        └────────────┘
//! ```
//!
//! The session id is a random 32-character alphanumeric token. Endpoints are
//! created with mode 0600 before the child is spawned and removed when the
//! session is dropped.

pub mod child;
pub mod prompt;
pub mod relay;
pub mod terminal;

pub use child::{attach, is_attached, split_elevation_args, Prompter, SessionArgs};
pub use relay::{relay, RelayConsole, RelayTiming, SessionStreams, TerminalConsole};

use crate::{IpcError, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use schema::ElevationConfig;
use std::ffi::OsString;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::net::UnixListener;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Length of a session id
pub const SESSION_ID_LEN: usize = 32;

/// Argument carrying the session id to the relaunched instance
pub const SESSION_ARG: &str = "--elevation-session";

/// Argument carrying the endpoint directory to the relaunched instance
pub const DIR_ARG: &str = "--elevation-dir";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Input,
    Output,
    Error,
}

impl Endpoint {
    pub const ALL: [Endpoint; 3] = [Endpoint::Input, Endpoint::Output, Endpoint::Error];

    fn suffix(self) -> &'static str {
        match self {
            Endpoint::Input => "in",
            Endpoint::Output => "out",
            Endpoint::Error => "err",
        }
    }
}

/// Generate a fresh session id
pub fn generate_session_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect()
}

pub fn is_valid_session_id(id: &str) -> bool {
    id.len() == SESSION_ID_LEN && id.bytes().all(|b| b.is_ascii_alphanumeric())
}

pub fn endpoint_path(directory: &Path, session_id: &str, endpoint: Endpoint) -> PathBuf {
    directory.join(format!("warden-{}-{}.sock", session_id, endpoint.suffix()))
}

/// Directory holding the session endpoints
pub fn runtime_directory(config: &ElevationConfig) -> PathBuf {
    config
        .runtime_directory
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}

/// The listening side of one relaunch session
#[derive(Debug)]
pub struct ElevationSession {
    id: String,
    directory: PathBuf,
    input: UnixListener,
    output: UnixListener,
    error: UnixListener,
}

impl ElevationSession {
    /// Bind the three endpoints of a new session in `directory`
    pub fn create(directory: &Path, id: String) -> Result<Self> {
        let input = bind_endpoint(directory, &id, Endpoint::Input)?;
        let output = bind_endpoint(directory, &id, Endpoint::Output).map_err(|e| {
            remove_endpoints(directory, &id, &[Endpoint::Input]);
            e
        })?;
        let error = bind_endpoint(directory, &id, Endpoint::Error).map_err(|e| {
            remove_endpoints(directory, &id, &[Endpoint::Input, Endpoint::Output]);
            e
        })?;
        debug!("Elevation session {} listening in {:?}", id, directory);
        Ok(Self {
            id,
            directory: directory.to_path_buf(),
            input,
            output,
            error,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Accept one connection per endpoint
    pub async fn accept(&self) -> Result<SessionStreams> {
        let accept_err = |e: std::io::Error| IpcError::ElevationFailed(format!("accept: {}", e));
        let (input, output, error) = tokio::try_join!(
            async { self.input.accept().await.map_err(accept_err) },
            async { self.output.accept().await.map_err(accept_err) },
            async { self.error.accept().await.map_err(accept_err) },
        )?;
        let (input_requests, input) = input.0.into_split();
        Ok(SessionStreams {
            input: Box::new(input),
            input_requests: Box::new(input_requests),
            output: Box::new(output.0),
            error: Box::new(error.0),
        })
    }
}

impl Drop for ElevationSession {
    fn drop(&mut self) {
        remove_endpoints(&self.directory, &self.id, &Endpoint::ALL);
    }
}

fn bind_endpoint(directory: &Path, id: &str, endpoint: Endpoint) -> Result<UnixListener> {
    let path = endpoint_path(directory, id, endpoint);
    let listener = UnixListener::bind(&path)
        .map_err(|e| IpcError::ElevationFailed(format!("bind {:?}: {}", path, e)))?;
    if let Err(e) = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)) {
        let _ = std::fs::remove_file(&path);
        return Err(IpcError::ElevationFailed(format!("restrict {:?}: {}", path, e)));
    }
    Ok(listener)
}

fn remove_endpoints(directory: &Path, id: &str, endpoints: &[Endpoint]) {
    for endpoint in endpoints {
        let _ = std::fs::remove_file(endpoint_path(directory, id, *endpoint));
    }
}

/// Runs commands through an elevated copy of an executable
#[derive(Debug, Clone)]
pub struct ElevationChannel {
    config: ElevationConfig,
    program: PathBuf,
}

impl ElevationChannel {
    pub fn new(config: ElevationConfig, program: impl Into<PathBuf>) -> Self {
        Self {
            config,
            program: program.into(),
        }
    }

    /// Channel relaunching the running executable
    pub fn for_current_exe(config: ElevationConfig) -> Result<Self> {
        let program = std::env::current_exe()
            .map_err(|e| IpcError::ElevationFailed(format!("resolve current executable: {}", e)))?;
        Ok(Self::new(config, program))
    }

    /// Full command line of the elevated instance
    pub fn command_line(&self, session: &ElevationSession, args: &[String]) -> Vec<OsString> {
        let mut argv: Vec<OsString> = self.config.command.iter().map(OsString::from).collect();
        argv.push(self.program.clone().into_os_string());
        argv.push(SESSION_ARG.into());
        argv.push(session.id().into());
        argv.push(DIR_ARG.into());
        argv.push(session.directory().as_os_str().to_os_string());
        argv.extend(args.iter().map(OsString::from));
        argv
    }

    /// Run `args` elevated and return the elevated instance's exit code
    ///
    /// # Errors
    ///
    /// [`IpcError::ElevationFailed`] when an endpoint cannot be created, the
    /// elevated instance exits or times out before connecting, the relay
    /// breaks, or the instance does not exit with a code.
    pub async fn run(&self, args: &[String], console: &mut dyn RelayConsole) -> Result<i32> {
        let directory = runtime_directory(&self.config);
        let session = ElevationSession::create(&directory, generate_session_id())?;
        let argv = self.command_line(&session, args);
        let (program, rest) = argv
            .split_first()
            .ok_or_else(|| IpcError::ElevationFailed("empty elevation command".to_string()))?;

        info!("Relaunching with elevated privileges via {:?}", program);
        let mut child = Command::new(program)
            .args(rest)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| IpcError::ElevationFailed(format!("spawn {:?}: {}", program, e)))?;

        let connect_timeout = Duration::from_secs(self.config.connect_timeout_secs);
        let streams = tokio::select! {
            accepted = tokio::time::timeout(connect_timeout, session.accept()) => match accepted {
                Ok(Ok(streams)) => streams,
                Ok(Err(e)) => {
                    kill(&mut child).await;
                    return Err(e);
                }
                Err(_) => {
                    kill(&mut child).await;
                    return Err(IpcError::ElevationFailed(format!(
                        "elevated instance did not connect within {}s",
                        self.config.connect_timeout_secs
                    )));
                }
            },
            status = child.wait() => {
                let status = status.map_err(|e| IpcError::ElevationFailed(e.to_string()))?;
                return Err(IpcError::ElevationFailed(format!(
                    "elevated instance exited ({}) before connecting",
                    status
                )));
            }
        };
        debug!("Elevated instance connected to session {}", session.id());

        let timing = RelayTiming {
            poll_interval: Duration::from_millis(self.config.poll_interval_ms),
            generic_prompt_wait: Duration::from_millis(self.config.generic_prompt_wait_ms),
        };
        if let Err(e) = relay(streams, console, timing).await {
            kill(&mut child).await;
            return Err(e);
        }

        let exit_wait = Duration::from_secs(self.config.exit_wait_secs);
        let status = match tokio::time::timeout(exit_wait, child.wait()).await {
            Ok(status) => status.map_err(|e| IpcError::ElevationFailed(e.to_string()))?,
            Err(_) => {
                warn!(
                    "Elevated instance still running {}s after closing its streams, killing it",
                    self.config.exit_wait_secs
                );
                kill(&mut child).await;
                return Err(IpcError::ElevationFailed(
                    "elevated instance did not exit".to_string(),
                ));
            }
        };
        exit_code(status)
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!("Failed to kill elevated instance: {}", e);
    }
}

fn exit_code(status: ExitStatus) -> Result<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.code().ok_or_else(|| {
        IpcError::ElevationFailed(format!(
            "elevated instance terminated by signal {:?}",
            status.signal()
        ))
    })
}
