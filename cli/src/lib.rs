//! The `warden` command-line interface
//!
//! Parses arguments, runs the supervisor in console or service mode, manages
//! the systemd unit and talks to a running supervisor over its control socket.

#![allow(unused_crate_dependencies)]

pub mod app;
pub mod args;
pub mod client;
pub mod error;
pub mod service_unit;

pub use app::execute;
pub use args::{Cli, Commands};
pub use client::Client;
pub use error::{CliError, Result};
