//! warden binary
//!
//! Keeps one application process alive and manages it as a service.

#![allow(unused_crate_dependencies)]

use clap::Parser;
use cli::{Cli, CliError, Commands};
use ipc::elevation::{attach, split_elevation_args};
use schema::SupervisorSpec;
use tracing::error;
use warden_core::config::load_spec_from_toml_path;
use warden_core::diagnostics::DumpWriter;
use warden_core::utils::init_tracing;

#[tokio::main]
async fn main() {
    let code = run().await;
    std::process::exit(code);
}

async fn run() -> i32 {
    // The elevated copy must be attached before anything touches stdio.
    let (session, args) = match split_elevation_args(std::env::args().collect()) {
        Ok(split) => split,
        Err(e) => {
            eprintln!("warden: {}", e);
            return 1;
        }
    };
    if let Some(session) = &session {
        if let Err(e) = attach(session) {
            eprintln!("warden: {}", e);
            return 1;
        }
    }

    let cli = Cli::parse_from(&args);
    let spec = load_spec_from_toml_path(&cli.config);

    let level = cli
        .log_level
        .clone()
        .or_else(|| spec.as_ref().ok().map(|s| s.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());
    if let Err(e) = init_tracing(&level) {
        eprintln!("warden: {}", e);
    }

    let spec = match spec {
        Ok(spec) => spec,
        Err(e) => return fail(&CliError::from(e), cli.command, None),
    };

    let relaunch_args = args.get(1..).unwrap_or_default().to_vec();
    let command = cli.command;
    let config = cli.config;
    let task = {
        let spec = spec.clone();
        tokio::spawn(async move {
            cli::execute(command, &spec, &config, &relaunch_args).await
        })
    };
    let result = match task.await {
        Ok(result) => result,
        Err(e) => Err(CliError::CommandFailed(format!("internal error: {}", e))),
    };
    match result {
        Ok(code) => code,
        Err(e) => fail(&e, command, Some(&spec)),
    }
}

/// Top-level error boundary for errors and panics: log, dump for supervisor runs,
/// pick the exit code
fn fail(err: &CliError, command: Commands, spec: Option<&SupervisorSpec>) -> i32 {
    error!("{} [{}]", err, err.code());
    let (directory, name, code) = match spec {
        Some(spec) => (
            spec.paths.dump_directory.as_deref(),
            spec.name.as_str(),
            spec.error_exit_code,
        ),
        None => (None, "warden", 1),
    };
    if matches!(command, Commands::Console | Commands::Service) {
        DumpWriter::new(directory, name).dump(&format!("fatal: {}", err), None, None);
    }
    code
}
