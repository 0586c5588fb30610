//! Test utilities for integration tests in the daemon crate.

use schema::{SupervisorSpec, TimerMode};
use std::path::Path;
use std::time::Duration;

/// Run the given future with a timeout, failing the test if it elapses.
pub async fn run_with_timeout<F, T>(duration: Duration, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(duration, fut)
        .await
        .expect("test timed out")
}

/// Run a future with a default timeout of 60 seconds.
pub async fn run_with_default_timeout<F, T>(fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    run_with_timeout(Duration::from_secs(60), fut).await
}

/// Spec running `script` under `/bin/sh` with all paths inside `dir`
pub fn shell_spec(dir: &Path, script: &str) -> SupervisorSpec {
    let mut spec = SupervisorSpec::for_command("/bin/sh", vec!["-c".into(), script.into()]);
    spec.name = "test-app".to_string();
    spec.timing.timer_mode = TimerMode::WallClock;
    spec.timing.shutdown_timeout_secs = 5;
    spec.paths.pid_file = Some(path_string(dir, "warden.pid"));
    spec.paths.dump_directory = Some(dir.to_string_lossy().into_owned());
    spec
}

pub fn path_string(dir: &Path, name: &str) -> String {
    dir.join(name).to_string_lossy().into_owned()
}
