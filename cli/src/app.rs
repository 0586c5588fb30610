//! Verb dispatch
//!
//! Supervisor verbs run the engine in-process. Unit verbs need root and go
//! through the privileged relaunch channel when the effective user is not
//! root. Socket verbs retry through the same channel when the socket
//! refuses this user.

use crate::client::Client;
use crate::service_unit::{render_unit, UnitManager};
use crate::{CliError, Commands, Result};
use ipc::elevation::{is_attached, ElevationChannel, Prompter, TerminalConsole};
use schema::{Message, RunMode, SupervisorSpec};
use std::path::Path;
use tracing::info;

/// Execute one verb and return the process exit code
///
/// `relaunch_args` are the arguments after the program name, replayed when
/// the verb is relaunched with elevated privileges.
pub async fn execute(
    command: Commands,
    spec: &SupervisorSpec,
    config_path: &Path,
    relaunch_args: &[String],
) -> Result<i32> {
    match command {
        Commands::Console => Ok(daemon::run_supervisor(spec.clone(), RunMode::Console).await?),
        Commands::Service => Ok(daemon::run_supervisor(spec.clone(), RunMode::Service).await?),
        command if command.needs_root() => {
            if !nix::unistd::geteuid().is_root() {
                info!("'{:?}' needs root, relaunching with elevated privileges", command);
                return elevate(spec, relaunch_args).await;
            }
            unit_command(command, spec, config_path).await?;
            Ok(0)
        }
        command => {
            let socket = spec.paths.control_socket.as_ref().ok_or_else(|| {
                CliError::InvalidArgument("paths.controlSocket is not configured".to_string())
            })?;
            match socket_command(command, &Client::new(socket)).await {
                Err(e) if e.needs_elevation() && !is_attached() => {
                    info!("{}, relaunching with elevated privileges", e);
                    elevate(spec, relaunch_args).await
                }
                result => result.map(|()| 0),
            }
        }
    }
}

async fn socket_command(command: Commands, client: &Client) -> Result<()> {
    match command {
        Commands::Status => client.status().await,
        Commands::Pause => client.command(Message::Pause).await,
        Commands::Resume => client.command(Message::Resume).await,
        Commands::Control { code } => client.command(Message::Control { code }).await,
        Commands::Dump => client.command(Message::Dump).await,
        other => Err(CliError::InvalidArgument(format!(
            "{:?} does not use the control socket",
            other
        ))),
    }
}

async fn unit_command(command: Commands, spec: &SupervisorSpec, config_path: &Path) -> Result<()> {
    let manager = UnitManager::new(spec);
    match command {
        Commands::Install => {
            let exe = std::env::current_exe()?;
            let config = std::fs::canonicalize(config_path)?;
            let path = manager.install(&render_unit(spec, &exe, &config)).await?;
            println!("✓ Installed {} at {}", manager.unit_name(), path.display());
        }
        Commands::Remove => {
            let question = format!("Remove service {}? (y/n)", manager.unit_name());
            let prompter = Prompter::detect();
            let confirmed = tokio::task::spawn_blocking(move || prompter.confirm(&question))
                .await
                .map_err(|e| CliError::CommandFailed(format!("prompt task failed: {}", e)))??;
            if !confirmed {
                println!("Removal of {} cancelled", manager.unit_name());
                return Ok(());
            }
            let path = manager.remove().await?;
            println!("✓ Removed {} ({})", manager.unit_name(), path.display());
        }
        Commands::Start => {
            manager.start().await?;
            println!("✓ Started {}", manager.unit_name());
        }
        Commands::Stop => {
            manager.stop().await?;
            println!("✓ Stopped {}", manager.unit_name());
        }
        other => {
            return Err(CliError::InvalidArgument(format!(
                "{:?} does not manage the service unit",
                other
            )))
        }
    }
    Ok(())
}

/// Relaunch with `relaunch_args` through the elevation command
async fn elevate(spec: &SupervisorSpec, relaunch_args: &[String]) -> Result<i32> {
    if is_attached() {
        return Err(CliError::CommandFailed(
            "still lacking privileges after relaunch".to_string(),
        ));
    }
    let channel = ElevationChannel::for_current_exe(spec.elevation.clone())?;
    Ok(channel.run(relaunch_args, &mut TerminalConsole).await?)
}
