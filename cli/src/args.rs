//! Command-line arguments

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(about = "Keep one application process alive and manage it as a service")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Supervisor configuration file
    #[arg(long, global = true, value_name = "FILE", default_value = "warden.toml")]
    pub config: PathBuf,

    /// Log level or filter, overrides `logLevel` from the configuration
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Run the supervisor attached to this terminal
    Console,
    /// Run the supervisor under the service manager
    Service,
    /// Install and enable the systemd unit
    Install,
    /// Disable and delete the systemd unit
    Remove,
    /// Start the installed service
    Start,
    /// Stop the installed service
    Stop,
    /// Pause the managed application
    Pause,
    /// Resume the managed application
    Resume,
    /// Show supervisor status
    Status,
    /// Send a custom control code to the running supervisor
    Control {
        /// Code in 128..=255
        #[arg(value_parser = clap::value_parser!(u8).range(128..=255))]
        code: u8,
    },
    /// Ask the running supervisor to write a diagnostic dump
    Dump,
}

impl Commands {
    /// Whether the verb manages the systemd unit and so needs root
    pub fn needs_root(self) -> bool {
        matches!(
            self,
            Commands::Install | Commands::Remove | Commands::Start | Commands::Stop
        )
    }

    /// Whether the verb talks to a running supervisor over the control socket
    pub fn uses_control_socket(self) -> bool {
        matches!(
            self,
            Commands::Pause
                | Commands::Resume
                | Commands::Status
                | Commands::Control { .. }
                | Commands::Dump
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["warden", "status"]).unwrap();
        assert_eq!(cli.command, Commands::Status);
        assert_eq!(cli.config, PathBuf::from("warden.toml"));
        assert_eq!(cli.log_level, None);
    }

    #[test]
    fn test_global_options_after_verb() {
        let cli = Cli::try_parse_from([
            "warden",
            "console",
            "--config",
            "/etc/warden/app.toml",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.command, Commands::Console);
        assert_eq!(cli.config, PathBuf::from("/etc/warden/app.toml"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_control_code_range() {
        let cli = Cli::try_parse_from(["warden", "control", "200"]).unwrap();
        assert_eq!(cli.command, Commands::Control { code: 200 });
        assert!(Cli::try_parse_from(["warden", "control", "127"]).is_err());
        assert!(Cli::try_parse_from(["warden", "control", "256"]).is_err());
    }

    #[test]
    fn test_verb_groups() {
        assert!(Commands::Install.needs_root());
        assert!(Commands::Stop.needs_root());
        assert!(!Commands::Status.needs_root());
        assert!(Commands::Control { code: 130 }.uses_control_socket());
        assert!(!Commands::Console.uses_control_socket());
        assert!(!Commands::Remove.uses_control_socket());
    }
}
