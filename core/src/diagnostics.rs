//! Diagnostic dumps
//!
//! A dump is a JSON document holding the reason, a backtrace of the calling
//! thread, the last published status snapshot and the recent output of the
//! managed process. Dumps are written on request (dump event, control
//! socket) and from the fatal-error paths: the panic hook and the top-level
//! error boundary.

use crate::logging::{snapshot_shared, LogEntry, SharedLogRing};
use crate::persistence::write_file_atomic;
use crate::Result;
use schema::StatusSnapshot;
use serde::Serialize;
use std::backtrace::Backtrace;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::{error, info};

/// Contents of one dump file
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticDump {
    pub reason: String,
    pub timestamp: String,
    pub supervisor_pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusSnapshot>,
    pub backtrace: String,
    pub recent_output: Vec<LogEntry>,
}

impl DiagnosticDump {
    pub fn capture(
        reason: impl Into<String>,
        status: Option<StatusSnapshot>,
        recent_output: Vec<LogEntry>,
    ) -> Self {
        Self {
            reason: reason.into(),
            timestamp: schema::current_timestamp(),
            supervisor_pid: std::process::id(),
            status,
            backtrace: Backtrace::force_capture().to_string(),
            recent_output,
        }
    }
}

/// Writes dumps into a directory
#[derive(Debug, Clone)]
pub struct DumpWriter {
    directory: PathBuf,
    name: String,
}

static DUMP_SEQ: AtomicU64 = AtomicU64::new(0);

impl DumpWriter {
    /// `directory` defaults to the system temp dir
    pub fn new(directory: Option<&str>, name: &str) -> Self {
        Self {
            directory: directory
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            name: name.to_string(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Write a dump and return its path
    pub fn write(&self, dump: &DiagnosticDump) -> Result<PathBuf> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let seq = DUMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let path = self.directory.join(format!(
            "{}-dump-{}-{}-{}.json",
            self.name,
            std::process::id(),
            millis,
            seq
        ));
        let json = serde_json::to_vec_pretty(dump)?;
        write_file_atomic(&path, &json)?;
        info!("Diagnostic dump written to {}", path.display());
        Ok(path)
    }

    /// Capture and write in one step; failures are logged, not returned
    pub fn dump(
        &self,
        reason: &str,
        status: Option<StatusSnapshot>,
        ring: Option<&SharedLogRing>,
    ) -> Option<PathBuf> {
        let recent = ring.map(snapshot_shared).unwrap_or_default();
        let dump = DiagnosticDump::capture(reason, status, recent);
        match self.write(&dump) {
            Ok(path) => Some(path),
            Err(e) => {
                error!("Failed to write diagnostic dump: {}", e);
                None
            }
        }
    }
}

/// Install a panic hook that logs the panic, flushes stderr and writes a dump.
///
/// The previous hook still runs afterwards.
pub fn install_panic_hook(
    writer: DumpWriter,
    status: watch::Receiver<StatusSnapshot>,
    ring: SharedLogRing,
) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let reason = format!("panic: {}", panic_info);
        error!("{}", reason);
        let snapshot = status.borrow().clone();
        writer.dump(&reason, Some(snapshot), Some(&ring));
        let _ = std::io::stderr().flush();
        previous(panic_info);
    }));
}
