//! Supervision engine for the warden process supervisor
//!
//! This crate contains the tick clock, the control event queue, both
//! lifecycle state machines and the main loop, plus the thin collaborators
//! they depend on: configuration loading, pid files, diagnostic dumps and
//! service-registry reporting.

pub mod capabilities;
pub mod clock;
pub mod config;
pub mod control;
pub mod diagnostics;
pub mod error;
pub mod logging;
pub mod persistence;
pub mod pidfile;
#[cfg(unix)]
pub mod process;
pub mod registry;
#[cfg(unix)]
pub mod supervisor;


// Re-export schema types for convenience
pub use schema::*;

pub use error::{CoreError, Result};

/// Core utilities and helper functions
pub mod utils {
    use tracing::info;

    /// Initialize tracing for the application.
    ///
    /// `RUST_LOG` wins over `level` when set.
    pub fn init_tracing(level: &str) -> crate::Result<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level))
            .map_err(|e| {
                crate::CoreError::ConfigurationError(format!(
                    "logLevel: invalid filter '{}': {}",
                    level, e
                ))
            })?;

        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| crate::CoreError::InitializationError(e.to_string()))?;

        info!("Tracing initialized with level: {}", level);
        Ok(())
    }
}
