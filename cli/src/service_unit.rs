//! systemd unit management for the `install`, `remove`, `start` and `stop` verbs

use crate::{CliError, Result};
use schema::{ServiceUnitConfig, SupervisorSpec};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};
use warden_core::persistence::write_file_atomic;

/// Render a `Type=notify` unit that runs `exe --config <config> service`
pub fn render_unit(spec: &SupervisorSpec, exe: &Path, config: &Path) -> String {
    let description = spec
        .description
        .clone()
        .unwrap_or_else(|| format!("warden supervisor for {}", spec.name));
    // Leave room for the graceful stop plus the forced-kill grace period.
    let stop_timeout = spec.timing.shutdown_timeout_secs + spec.timing.forced_shutdown_delay_secs + 5;

    let mut unit = String::new();
    let _ = writeln!(unit, "[Unit]");
    let _ = writeln!(unit, "Description={}", description);
    let _ = writeln!(unit, "After=network.target");
    let _ = writeln!(unit);
    let _ = writeln!(unit, "[Service]");
    let _ = writeln!(unit, "Type=notify");
    let _ = writeln!(unit, "NotifyAccess=main");
    let _ = writeln!(
        unit,
        "ExecStart={} --config {} service",
        quote(&exe.to_string_lossy()),
        quote(&config.to_string_lossy())
    );
    if let Some(user) = &spec.service.user {
        let _ = writeln!(unit, "User={}", user);
    }
    if let Some(dir) = &spec.process.working_directory {
        let _ = writeln!(unit, "WorkingDirectory={}", dir);
    }
    let _ = writeln!(unit, "KillMode=mixed");
    let _ = writeln!(unit, "TimeoutStopSec={}", stop_timeout);
    let _ = writeln!(unit, "Restart=no");
    let _ = writeln!(unit);
    let _ = writeln!(unit, "[Install]");
    let _ = writeln!(unit, "WantedBy=multi-user.target");
    unit
}

/// Quote an `ExecStart` argument when it contains whitespace or quotes
fn quote(arg: &str) -> String {
    if arg.chars().any(|c| c.is_whitespace() || c == '"' || c == '\\') {
        let escaped = arg.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{}\"", escaped)
    } else {
        arg.to_string()
    }
}

/// Installs and drives one systemd unit
#[derive(Debug, Clone)]
pub struct UnitManager {
    config: ServiceUnitConfig,
    unit_name: String,
}

impl UnitManager {
    pub fn new(spec: &SupervisorSpec) -> Self {
        Self {
            config: spec.service.clone(),
            unit_name: format!("{}.service", spec.name),
        }
    }

    pub fn unit_name(&self) -> &str {
        &self.unit_name
    }

    pub fn unit_path(&self) -> PathBuf {
        Path::new(&self.config.unit_directory).join(&self.unit_name)
    }

    pub fn is_installed(&self) -> bool {
        self.unit_path().exists()
    }

    /// Write the unit file, reload systemd and enable the unit
    pub async fn install(&self, unit: &str) -> Result<PathBuf> {
        let path = self.unit_path();
        if path.exists() {
            info!("Replacing existing unit {}", path.display());
        }
        write_file_atomic(&path, unit.as_bytes())?;
        info!("Wrote unit file {}", path.display());

        self.systemctl(&["daemon-reload"]).await?;
        self.systemctl(&["enable", &self.unit_name]).await?;
        Ok(path)
    }

    /// Disable the unit and delete its file
    pub async fn remove(&self) -> Result<PathBuf> {
        let path = self.unit_path();
        if !path.exists() {
            return Err(CliError::ServiceUnit(format!(
                "{} is not installed ({} does not exist)",
                self.unit_name,
                path.display()
            )));
        }
        if let Err(e) = self.systemctl(&["disable", &self.unit_name]).await {
            warn!("Could not disable {}: {}", self.unit_name, e);
        }
        std::fs::remove_file(&path)?;
        info!("Removed unit file {}", path.display());
        self.systemctl(&["daemon-reload"]).await?;
        Ok(path)
    }

    pub async fn start(&self) -> Result<()> {
        self.systemctl(&["start", &self.unit_name]).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.systemctl(&["stop", &self.unit_name]).await
    }

    async fn systemctl(&self, args: &[&str]) -> Result<()> {
        debug!("Running {} {}", self.config.systemctl, args.join(" "));
        let output = Command::new(&self.config.systemctl)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                CliError::ServiceUnit(format!("failed to run {}: {}", self.config.systemctl, e))
            })?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(CliError::ServiceUnit(format!(
            "{} {} failed ({}): {}",
            self.config.systemctl,
            args.join(" "),
            output.status,
            stderr.trim()
        )))
    }
}
