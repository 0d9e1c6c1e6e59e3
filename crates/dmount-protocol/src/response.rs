//! Response envelope sent back on every transport.

use dmount_core::{DatasetSummary, MountError, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CommandEnvelope, ProtocolError};

/// Mount result code for a successful mount.
pub const MOUNT_SUCCESS: &str = "success";

/// Action reported when a frame could not be decoded at all.
pub const ERROR_ACTION: &str = "error";

/// Reply to one command.
///
/// Mirrors the request's verb, correlation token and path, and carries either
/// a `result` payload or an `error` reason, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Verb of the request (as sent by the client)
    pub action: String,

    /// Correlation token copied from the request
    #[serde(rename = "clientID", default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<Value>,

    /// Dataset path copied from the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Successful payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Creates a successful response for `request`.
    pub fn ok(request: &CommandEnvelope, result: Value) -> Self {
        Self {
            result: Some(result),
            ..Self::echo(request)
        }
    }

    /// Creates a failed response for `request`.
    pub fn error(request: &CommandEnvelope, reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::echo(request)
        }
    }

    /// Creates the response for a frame that could not be decoded.
    ///
    /// There is no request to echo, so only the reason is reported.
    pub fn undecodable(err: &ProtocolError) -> Self {
        Self {
            action: ERROR_ACTION.to_string(),
            client_id: None,
            path: None,
            result: None,
            error: Some(err.to_string()),
        }
    }

    /// Creates the response for a mount attempt.
    ///
    /// The result code is `"success"` or the `MountError` display string.
    pub fn mount(request: &CommandEnvelope, outcome: &Result<(), MountError>) -> Self {
        match outcome {
            Ok(()) => Self::ok(request, Value::from(MOUNT_SUCCESS)),
            Err(e) => Self::error(request, e.to_string()),
        }
    }

    /// Creates the response for a status request.
    pub fn status(request: &CommandEnvelope, datasets: &[DatasetSummary]) -> Self {
        match serde_json::to_value(datasets) {
            Ok(value) => Self::ok(request, value),
            Err(e) => Self::error(request, e.to_string()),
        }
    }

    /// Creates the response for a row lookup hit.
    pub fn row(request: &CommandEnvelope, row: &Row) -> Self {
        Self::ok(
            request,
            Value::Array(row.iter().cloned().map(Value::String).collect()),
        )
    }

    /// Serializes the response as one JSON text frame.
    pub fn to_frame(&self) -> String {
        // A struct of strings and JSON values always serializes.
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"action":"{ERROR_ACTION}","error":"{e}"}}"#)
        })
    }

    fn echo(request: &CommandEnvelope) -> Self {
        Self {
            action: request.action.clone(),
            client_id: request.client_id.clone(),
            path: request.path.clone(),
            result: None,
            error: None,
        }
    }
}

/// Host description returned by `sysinfo` and `ping`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostInfo {
    /// Operating system name
    pub os: String,

    /// CPU architecture
    pub arch: String,

    /// Logical CPU count
    #[serde(rename = "numCPU")]
    pub num_cpu: usize,

    /// CPU description ("<n> cores <brand>")
    pub cpu: String,

    /// Total memory, formatted as "<gb>GB"
    pub ram: String,

    /// Node role
    #[serde(rename = "computerType")]
    pub computer_type: String,

    /// Sandbox root served by this node
    #[serde(rename = "cachePath")]
    pub cache_path: String,
}
