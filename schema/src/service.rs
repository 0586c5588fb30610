//! Supervisor specification types
//!
//! This module contains the configuration model for a supervised application:
//! how the child is launched, how its exits are classified and restarted, how
//! the supervisor keeps time, and where it keeps its pid files and sockets.
//!
//! All types deserialize from camelCase keys and carry serde defaults, so a
//! minimal configuration only needs `process.command`.
//!
//! ## Restart decisions
//!
//! Every classified exit maps to one of:
//! - `restart`: relaunch immediately without touching the failure counter
//! - `restartWithBackoff`: count a failure and relaunch after the backoff delay
//! - `stop`: stop the supervisor

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Complete specification for one supervised application
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorSpec {
    /// Service name used for the systemd unit and log context
    #[serde(default = "default_name")]
    pub name: String,

    /// Human-readable description of the service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Managed process command line
    pub process: ProcessSpec,

    /// Restart and backoff behaviour
    #[serde(default)]
    pub restart: RestartConfig,

    /// Exit classification and per-class restart decisions
    #[serde(default)]
    pub exit_policy: ExitPolicy,

    /// Tick clock and timeout configuration
    #[serde(default)]
    pub timing: TimingConfig,

    /// Managed process output handling
    #[serde(default)]
    pub output: OutputConfig,

    /// Behaviour of the user-defined signals
    #[serde(default)]
    pub signals: SignalConfig,

    /// Actions bound to custom control codes (128..=255)
    #[serde(default)]
    pub custom_actions: Vec<CustomActionBinding>,

    /// Pid files, control socket and dump directory
    #[serde(default)]
    pub paths: PathsConfig,

    /// Privileged relaunch settings
    #[serde(default)]
    pub elevation: ElevationConfig,

    /// Service-registry (systemd) settings
    #[serde(default)]
    pub service: ServiceUnitConfig,

    /// Capacity of the pending control event queue
    #[serde(default = "default_control_queue_capacity")]
    pub control_queue_capacity: usize,

    /// Exit code used for supervisor-detected failures
    #[serde(default = "default_error_exit_code")]
    pub error_exit_code: i32,

    /// Default log level when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl SupervisorSpec {
    /// Build a spec with defaults around the given command
    pub fn for_command(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: default_name(),
            description: None,
            process: ProcessSpec {
                command: command.into(),
                args,
                environment: HashMap::new(),
                working_directory: None,
            },
            restart: RestartConfig::default(),
            exit_policy: ExitPolicy::default(),
            timing: TimingConfig::default(),
            output: OutputConfig::default(),
            signals: SignalConfig::default(),
            custom_actions: Vec::new(),
            paths: PathsConfig::default(),
            elevation: ElevationConfig::default(),
            service: ServiceUnitConfig::default(),
            control_queue_capacity: default_control_queue_capacity(),
            error_exit_code: default_error_exit_code(),
            log_level: default_log_level(),
        }
    }

    /// Look up the action bound to a custom control code
    pub fn custom_action(&self, code: u8) -> Option<CustomAction> {
        self.custom_actions
            .iter()
            .find(|binding| binding.code == code)
            .map(|binding| binding.action)
    }
}

fn default_name() -> String {
    "warden".to_string()
}

const fn default_control_queue_capacity() -> usize {
    10
}

const fn default_error_exit_code() -> i32 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Command line of the managed process
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSpec {
    /// Program to execute (must be in PATH or an absolute path)
    pub command: String,

    /// Command-line arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables set for the child on top of the inherited ones
    #[serde(default)]
    pub environment: HashMap<String, String>,

    /// Working directory for the child
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

/// Restart behaviour after restart-worthy exits
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RestartConfig {
    /// Delay growth between consecutive failures
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Maximum consecutive failures before the supervisor gives up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Seconds the child must stay up before the failure counter resets
    #[serde(default = "default_stable_after_secs")]
    pub stable_after_secs: u64,

    /// Treat spawn failures as restart-worthy instead of fatal
    #[serde(default)]
    pub restart_on_spawn_failure: bool,
}

impl RestartConfig {
    /// Get the stable threshold as a Duration
    pub fn stable_after(&self) -> Duration {
        Duration::from_secs(self.stable_after_secs)
    }
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            max_retries: default_max_retries(),
            stable_after_secs: default_stable_after_secs(),
            restart_on_spawn_failure: false,
        }
    }
}

const fn default_max_retries() -> u32 {
    5
}

const fn default_stable_after_secs() -> u64 {
    300
}

/// Configuration for restart delays
///
/// The delay for the n-th consecutive failure is
/// `firstDelaySecs * multiplier^(n-1)`, capped at `maxDelaySecs`.
/// A multiplier of `1.0` gives a fixed delay.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackoffConfig {
    /// Delay in seconds after the first failure
    #[serde(default = "default_first_delay_secs")]
    pub first_delay_secs: u64,

    /// Multiplicative factor between consecutive delays
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Maximum delay in seconds
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,

    /// Jitter fraction (0.0 to 1.0) applied to each delay
    #[serde(default)]
    pub jitter: f64,
}

impl BackoffConfig {
    /// Get the first delay as a Duration
    pub fn first_delay(&self) -> Duration {
        Duration::from_secs(self.first_delay_secs)
    }

    /// Get the maximum delay as a Duration
    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            first_delay_secs: default_first_delay_secs(),
            multiplier: default_multiplier(),
            max_delay_secs: default_max_delay_secs(),
            jitter: 0.0,
        }
    }
}

const fn default_first_delay_secs() -> u64 {
    1
}

const fn default_multiplier() -> f64 {
    2.0
}

const fn default_max_delay_secs() -> u64 {
    30
}

/// What to do after a classified exit
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum RestartDecision {
    /// Relaunch immediately
    Restart,
    /// Count a failure and relaunch after the backoff delay
    RestartWithBackoff,
    /// Stop the supervisor
    Stop,
}

/// Exit classification rules
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExitPolicy {
    /// Exit codes that mean the application stopped on purpose
    #[serde(default = "default_clean_exit_codes")]
    pub clean_exit_codes: Vec<i32>,

    /// Exit code the application uses to ask for a restart
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_exit_code: Option<i32>,

    /// Decision for clean exits
    #[serde(default = "default_on_clean")]
    pub on_clean: RestartDecision,

    /// Decision for exits caused by a signal
    #[serde(default = "default_on_abnormal")]
    pub on_abnormal: RestartDecision,

    /// Decision when the application requested a restart
    #[serde(default = "default_on_restart_request")]
    pub on_restart_request: RestartDecision,

    /// Decision for any other exit code
    #[serde(default = "default_on_ordinary")]
    pub on_ordinary: RestartDecision,

    /// Per-exit-code overrides, checked before the class decision
    #[serde(default)]
    pub codes: Vec<ExitCodeOverride>,
}

impl Default for ExitPolicy {
    fn default() -> Self {
        Self {
            clean_exit_codes: default_clean_exit_codes(),
            restart_exit_code: None,
            on_clean: default_on_clean(),
            on_abnormal: default_on_abnormal(),
            on_restart_request: default_on_restart_request(),
            on_ordinary: default_on_ordinary(),
            codes: Vec::new(),
        }
    }
}

fn default_clean_exit_codes() -> Vec<i32> {
    vec![0]
}

const fn default_on_clean() -> RestartDecision {
    RestartDecision::Stop
}

const fn default_on_abnormal() -> RestartDecision {
    RestartDecision::RestartWithBackoff
}

const fn default_on_restart_request() -> RestartDecision {
    RestartDecision::Restart
}

const fn default_on_ordinary() -> RestartDecision {
    RestartDecision::RestartWithBackoff
}

/// Decision bound to one specific exit code
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExitCodeOverride {
    /// Exit code to match
    pub code: i32,
    /// Decision to apply
    pub action: RestartDecision,
}

/// Tick clock source
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TimerMode {
    /// Derive ticks from the system clock on every read
    WallClock,
    /// Advance ticks from a dedicated timer thread
    Independent,
}

impl Default for TimerMode {
    fn default() -> Self {
        TimerMode::Independent
    }
}

/// Tick clock and timeout configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimingConfig {
    /// Tick period in milliseconds (must divide 1000)
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u32,

    /// Tick source
    #[serde(default)]
    pub timer_mode: TimerMode,

    /// Drift (seconds) at which the independent timer reports running ahead
    #[serde(default = "default_drift_threshold_secs")]
    pub timer_fast_threshold_secs: u32,

    /// Drift (seconds) at which the independent timer reports falling behind
    #[serde(default = "default_drift_threshold_secs")]
    pub timer_slow_threshold_secs: u32,

    /// Seconds to wait for the child to exit after a stop request
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// A second interrupt after this many seconds forces a kill
    #[serde(default = "default_forced_shutdown_delay_secs")]
    pub forced_shutdown_delay_secs: u64,

    /// Resource sampling interval in seconds (0 disables sampling)
    #[serde(default)]
    pub diagnostics_interval_secs: u64,

    /// Wait hint reported to the service registry while starting
    #[serde(default = "default_startup_wait_hint_secs")]
    pub startup_wait_hint_secs: u64,
}

impl TimingConfig {
    /// Get the tick period as a Duration
    pub fn tick(&self) -> Duration {
        Duration::from_millis(u64::from(self.tick_ms))
    }

    /// Get the shutdown timeout as a Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            timer_mode: TimerMode::default(),
            timer_fast_threshold_secs: default_drift_threshold_secs(),
            timer_slow_threshold_secs: default_drift_threshold_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            forced_shutdown_delay_secs: default_forced_shutdown_delay_secs(),
            diagnostics_interval_secs: 0,
            startup_wait_hint_secs: default_startup_wait_hint_secs(),
        }
    }
}

const fn default_tick_ms() -> u32 {
    25
}

const fn default_drift_threshold_secs() -> u32 {
    5
}

const fn default_shutdown_timeout_secs() -> u64 {
    30
}

const fn default_forced_shutdown_delay_secs() -> u64 {
    2
}

const fn default_startup_wait_hint_secs() -> u64 {
    30
}

/// How managed process output is drained
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DrainStrategy {
    /// A reader task per stream
    Task,
    /// The main loop polls the streams once per tick
    Poll,
}

impl Default for DrainStrategy {
    fn default() -> Self {
        DrainStrategy::Task
    }
}

/// Text encoding of the child's output
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum OutputEncoding {
    /// UTF-8 (invalid sequences replaced)
    Utf8,
    /// ISO-8859-1
    Latin1,
}

/// Managed process output handling
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    /// Drain strategy
    #[serde(default)]
    pub drain: DrainStrategy,

    /// Explicit encoding; derived from the child's locale when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<OutputEncoding>,

    /// Number of recent output lines kept for diagnostic dumps
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            drain: DrainStrategy::default(),
            encoding: None,
            ring_capacity: default_ring_capacity(),
        }
    }
}

const fn default_ring_capacity() -> usize {
    256
}

/// Action bound to a user-defined signal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SignalAction {
    /// Ignore the signal
    Ignore,
    /// Forward the signal to the managed process
    Forward,
    /// Pause the supervisor
    Pause,
    /// Resume the supervisor
    Resume,
    /// Restart the managed process
    Restart,
    /// Shut the supervisor down
    Shutdown,
}

impl Default for SignalAction {
    fn default() -> Self {
        SignalAction::Ignore
    }
}

/// Behaviour of SIGUSR1/SIGUSR2
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignalConfig {
    /// Action for SIGUSR1
    #[serde(default)]
    pub usr1: SignalAction,
    /// Action for SIGUSR2
    #[serde(default)]
    pub usr2: SignalAction,
}

/// Action bound to a custom control code
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CustomAction {
    /// Restart the managed process
    Restart,
    /// Produce a diagnostic dump
    Dump,
    /// Stop the supervisor
    Stop,
    /// Log and ignore
    Ignore,
}

/// Binding of a custom control code to an action
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CustomActionBinding {
    /// Control code (128..=255)
    pub code: u8,
    /// Action to perform
    pub action: CustomAction,
}

/// Filesystem locations used by the supervisor
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PathsConfig {
    /// Pid file of the supervisor itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid_file: Option<String>,

    /// Pid file of the managed process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_pid_file: Option<String>,

    /// Unix socket of the local control plane
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_socket: Option<String>,

    /// Directory receiving diagnostic dumps (defaults to the temp dir)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dump_directory: Option<String>,
}

/// Privileged relaunch settings
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ElevationConfig {
    /// Command prefix used to gain privileges
    #[serde(default = "default_elevation_command")]
    pub command: Vec<String>,

    /// Directory holding the session endpoints (defaults to the temp dir)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_directory: Option<String>,

    /// Seconds to wait for the elevated instance to connect
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Seconds to wait for the elevated instance to exit after its streams close
    #[serde(default = "default_exit_wait_secs")]
    pub exit_wait_secs: u64,

    /// Relay poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Idle time after which an unterminated line is treated as a prompt
    #[serde(default = "default_generic_prompt_wait_ms")]
    pub generic_prompt_wait_ms: u64,
}

impl Default for ElevationConfig {
    fn default() -> Self {
        Self {
            command: default_elevation_command(),
            runtime_directory: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            exit_wait_secs: default_exit_wait_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            generic_prompt_wait_ms: default_generic_prompt_wait_ms(),
        }
    }
}

fn default_elevation_command() -> Vec<String> {
    vec!["sudo".to_string(), "--".to_string()]
}

const fn default_connect_timeout_secs() -> u64 {
    60
}

const fn default_exit_wait_secs() -> u64 {
    5
}

const fn default_poll_interval_ms() -> u64 {
    100
}

const fn default_generic_prompt_wait_ms() -> u64 {
    1000
}

/// systemd unit settings
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceUnitConfig {
    /// Directory where the unit file is installed
    #[serde(default = "default_unit_directory")]
    pub unit_directory: String,

    /// systemctl executable
    #[serde(default = "default_systemctl")]
    pub systemctl: String,

    /// User the service runs as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl Default for ServiceUnitConfig {
    fn default() -> Self {
        Self {
            unit_directory: default_unit_directory(),
            systemctl: default_systemctl(),
            user: None,
        }
    }
}

fn default_unit_directory() -> String {
    "/etc/systemd/system".to_string()
}

fn default_systemctl() -> String {
    "systemctl".to_string()
}
