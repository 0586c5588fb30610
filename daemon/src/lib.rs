//! Runtime wiring for the warden supervisor
//!
//! The engine in `warden_core` is free of process-wide side effects. This
//! crate attaches it to the running process: Unix signal listeners, the
//! local control socket, the supervisor pid file and the panic hook.

#![allow(unused_crate_dependencies)]

pub mod bootstrap;
pub mod control_plane;
pub mod error;
pub mod signals;

#[cfg(test)]
mod error_tests;

pub use bootstrap::{run_supervisor, Bootstrap};
pub use error::{DaemonError, Result};
