//! Process management for the managed application
//!
//! ## Platform Support
//!
//! - **Unix**: spawn into a fresh process group, group-wide signals
//!
//! ## Output
//!
//! [`output`] decodes the child's stdout/stderr into lines, logs them under
//! the `warden::app` target and keeps the tail in the shared log ring.

pub mod output;
#[cfg(unix)]
pub mod unix;

#[cfg(unix)]
pub use unix::*;
