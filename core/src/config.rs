//! Configuration loading and validation for Warden
//!
//! This module parses a TOML configuration into a `schema::SupervisorSpec`,
//! applies sane defaults (via serde defaults on schema types), and performs
//! strict validation with field-path error messages.

use crate::{CoreError, Result};
use schema::*;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Load a supervisor spec from a TOML file path
pub fn load_spec_from_toml_path(path: impl AsRef<Path>) -> Result<SupervisorSpec> {
    let data = fs::read_to_string(&path).map_err(|e| {
        CoreError::ConfigurationError(format!("Failed to read config {:?}: {}", path.as_ref(), e))
    })?;
    load_spec_from_toml_str(&data)
}

/// Load a supervisor spec from a TOML string
pub fn load_spec_from_toml_str(input: &str) -> Result<SupervisorSpec> {
    let spec: SupervisorSpec = toml::from_str(input)
        .map_err(|e| CoreError::ConfigurationError(format!("TOML parse error: {}", e)))?;
    validate_spec(&spec)?;
    Ok(spec)
}

fn invalid(message: String) -> CoreError {
    CoreError::ValidationError(message)
}

/// Validate the configuration and return `Result<()>` with field-path errors
pub fn validate_spec(spec: &SupervisorSpec) -> Result<()> {
    if spec.name.trim().is_empty() {
        return Err(invalid("name: cannot be empty".to_string()));
    }
    if spec.process.command.trim().is_empty() {
        return Err(invalid("process.command: cannot be empty".to_string()));
    }
    for key in spec.process.environment.keys() {
        if key.trim().is_empty() || key.contains('=') {
            return Err(invalid(format!(
                "process.environment: invalid variable name '{}'",
                key
            )));
        }
    }

    let b = &spec.restart.backoff;
    if b.first_delay_secs > b.max_delay_secs {
        return Err(invalid(
            "restart.backoff.firstDelaySecs: must not exceed maxDelaySecs".to_string(),
        ));
    }
    if !(b.jitter >= 0.0 && b.jitter <= 1.0) {
        return Err(invalid(
            "restart.backoff.jitter: must be between 0.0 and 1.0".to_string(),
        ));
    }
    if !(b.multiplier >= 1.0) {
        return Err(invalid("restart.backoff.multiplier: must be >= 1.0".to_string()));
    }

    let policy = &spec.exit_policy;
    if let Some(code) = policy.restart_exit_code {
        if policy.clean_exit_codes.contains(&code) {
            return Err(invalid(format!(
                "exitPolicy.restartExitCode: {} is also listed in cleanExitCodes",
                code
            )));
        }
    }
    let mut seen = HashSet::new();
    for (i, o) in policy.codes.iter().enumerate() {
        if !seen.insert(o.code) {
            return Err(invalid(format!(
                "exitPolicy.codes[{}].code: duplicate exit code {}",
                i, o.code
            )));
        }
    }

    let t = &spec.timing;
    if t.tick_ms == 0 || 1000 % t.tick_ms != 0 {
        return Err(invalid(format!(
            "timing.tickMs: {} must divide 1000",
            t.tick_ms
        )));
    }
    if t.shutdown_timeout_secs == 0 {
        return Err(invalid("timing.shutdownTimeoutSecs: must be > 0".to_string()));
    }

    if spec.output.ring_capacity == 0 {
        return Err(invalid("output.ringCapacity: must be > 0".to_string()));
    }
    if spec.control_queue_capacity == 0 {
        return Err(invalid("controlQueueCapacity: must be > 0".to_string()));
    }

    let mut seen = HashSet::new();
    for (i, binding) in spec.custom_actions.iter().enumerate() {
        if binding.code < CUSTOM_CODE_MIN {
            return Err(invalid(format!(
                "customActions[{}].code: must be in 128..=255",
                i
            )));
        }
        if !seen.insert(binding.code) {
            return Err(invalid(format!(
                "customActions[{}].code: duplicate code {}",
                i, binding.code
            )));
        }
    }

    let e = &spec.elevation;
    if e.command.is_empty() || e.command[0].trim().is_empty() {
        return Err(invalid("elevation.command: cannot be empty".to_string()));
    }
    if e.poll_interval_ms == 0 {
        return Err(invalid("elevation.pollIntervalMs: must be > 0".to_string()));
    }
    if e.connect_timeout_secs == 0 {
        return Err(invalid("elevation.connectTimeoutSecs: must be > 0".to_string()));
    }

    if spec.service.systemctl.trim().is_empty() {
        return Err(invalid("service.systemctl: cannot be empty".to_string()));
    }

    if let (Some(pid_file), Some(app_pid_file)) = (&spec.paths.pid_file, &spec.paths.app_pid_file) {
        if pid_file == app_pid_file {
            return Err(invalid(
                "paths.appPidFile: must differ from paths.pidFile".to_string(),
            ));
        }
    }

    Ok(())
}
