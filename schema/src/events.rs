//! Control events and process exit records
//!
//! Control codes are the vocabulary shared by the signal listeners, the local
//! control socket and the supervisor main loop. Codes 1..=9 are predefined,
//! 128..=255 are application-defined and resolved through `customActions`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// First code available for application-defined controls
pub const CUSTOM_CODE_MIN: u8 = 128;

/// A control request delivered to the supervisor main loop
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ControlCode {
    /// Stop the supervisor gracefully
    Stop,
    /// Pause the supervisor
    Pause,
    /// Resume a paused supervisor
    Resume,
    /// Report the current state
    Interrogate,
    /// System shutdown
    Shutdown,
    /// Log a state dump and forward SIGQUIT to the child
    Dump,
    /// Gracefully restart the managed process without backoff
    Restart,
    /// Forward SIGUSR1 to the managed process
    ForwardUsr1,
    /// Forward SIGUSR2 to the managed process
    ForwardUsr2,
    /// Application-defined code (128..=255)
    Custom(u8),
}

impl ControlCode {
    /// Numeric wire value of this code
    pub fn as_u8(&self) -> u8 {
        match self {
            ControlCode::Stop => 1,
            ControlCode::Pause => 2,
            ControlCode::Resume => 3,
            ControlCode::Interrogate => 4,
            ControlCode::Shutdown => 5,
            ControlCode::Dump => 6,
            ControlCode::Restart => 7,
            ControlCode::ForwardUsr1 => 8,
            ControlCode::ForwardUsr2 => 9,
            ControlCode::Custom(code) => *code,
        }
    }

    /// Decode a numeric code; unknown values below 128 are rejected
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            1 => Some(ControlCode::Stop),
            2 => Some(ControlCode::Pause),
            3 => Some(ControlCode::Resume),
            4 => Some(ControlCode::Interrogate),
            5 => Some(ControlCode::Shutdown),
            6 => Some(ControlCode::Dump),
            7 => Some(ControlCode::Restart),
            8 => Some(ControlCode::ForwardUsr1),
            9 => Some(ControlCode::ForwardUsr2),
            c if c >= CUSTOM_CODE_MIN => Some(ControlCode::Custom(c)),
            _ => None,
        }
    }

    /// Build a custom code, rejecting values outside 128..=255
    pub fn custom(code: u8) -> Option<Self> {
        (code >= CUSTOM_CODE_MIN).then_some(ControlCode::Custom(code))
    }
}

impl fmt::Display for ControlCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCode::Custom(code) => write!(f, "custom({})", code),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Urgent notification classes checked before the queue every tick
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum UrgentFlag {
    /// Terminal interrupt (SIGINT)
    Interrupt,
    /// Terminal closed (SIGHUP)
    Close,
    /// User session ended
    Logoff,
    /// System shutdown (SIGTERM)
    Shutdown,
}

impl UrgentFlag {
    /// All flags in the order the main loop handles them
    pub const ALL: [UrgentFlag; 4] = [
        UrgentFlag::Shutdown,
        UrgentFlag::Interrupt,
        UrgentFlag::Close,
        UrgentFlag::Logoff,
    ];

    /// Bit used for this flag in the atomic urgent set
    pub const fn bit(self) -> u8 {
        match self {
            UrgentFlag::Interrupt => 0b0001,
            UrgentFlag::Close => 0b0010,
            UrgentFlag::Logoff => 0b0100,
            UrgentFlag::Shutdown => 0b1000,
        }
    }
}

/// Log stream identifier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LogStream {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

/// Information about a managed process exit
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessExit {
    /// Process ID that exited
    pub pid: u32,

    /// Exit code (None if killed by signal)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Signal that killed the process
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,

    /// Timestamp when the exit was detected
    pub timestamp: String,
}

impl ProcessExit {
    /// Check if this represents a successful exit (code 0)
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Check if the process was terminated by a signal
    pub fn is_signaled(&self) -> bool {
        self.signal.is_some()
    }
}

/// Classification of a managed process exit
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ExitClass {
    /// Exit code listed in `cleanExitCodes`
    CleanStop,
    /// Terminated by a signal
    Abnormal,
    /// Exit code equals `restartExitCode`
    RestartRequested,
    /// Any other exit code
    Ordinary,
}

/// Create a current timestamp string in RFC3339 format
#[must_use]
pub fn current_timestamp() -> String {
    humantime::format_rfc3339_seconds(SystemTime::now()).to_string()
}
