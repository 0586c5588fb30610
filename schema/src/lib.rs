//! Schema definitions for Warden
//!
//! This crate contains the data structures shared across the warden
//! workspace: the supervisor configuration model, lifecycle states, control
//! codes and the local control protocol. All types implement JSON Schema
//! generation for external consumption.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod events;
pub mod service;
pub mod state;


pub use events::*;
pub use service::*;
pub use state::*;

/// Requests sent to a running supervisor over its control socket
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Message {
    /// Request the current status snapshot
    Status,
    /// Stop the supervisor
    Stop,
    /// Pause the supervisor
    Pause,
    /// Resume the supervisor
    Resume,
    /// Deliver a control code
    Control { code: u8 },
    /// Produce a diagnostic dump
    Dump,
}

/// Responses from the supervisor
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Response {
    /// Successful operation with message
    Ok { message: String },
    /// Error response with details
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    /// Status information
    Status(StatusSnapshot),
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::schema_for;

    #[test]
    fn test_message_serialization() {
        let json = serde_json::to_string(&Message::Control { code: 200 }).unwrap();
        assert_eq!(json, r#"{"control":{"code":200}}"#);
        assert_eq!(serde_json::to_string(&Message::Pause).unwrap(), r#""pause""#);
    }

    #[test]
    fn test_response_serialization() {
        let resp = Response::Ok {
            message: "success".to_string(),
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("success"));

        let err = Response::Error {
            message: "nope".to_string(),
            code: None,
        };
        let json = serde_json::to_string(&err).unwrap();
        assert!(!json.contains("code"));
    }

    #[test]
    fn test_schema_generation() {
        let message_schema = schema_for!(Message);
        let spec_schema = schema_for!(SupervisorSpec);
        assert!(serde_json::to_string(&message_schema).is_ok());
        assert!(serde_json::to_string(&spec_schema).is_ok());
    }
}
