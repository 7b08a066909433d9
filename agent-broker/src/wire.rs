// Wire codec: the JSON text-frame envelope exchanged with agents.
//
// Kind <-> payload schema is a fixed table (see module docs on Envelope).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    AgentRegister,
    Registered,
    AgentPing,
    Pong,
    ExecuteCommand,
    ReadFile,
    CommandResult,
}

/// The envelope every frame is wrapped in. `payload`'s schema is selected by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: Kind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("missing payload for kind requiring one")]
    MissingPayload,
}

impl Envelope {
    pub fn decode(text: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("Envelope always serializes")
    }

    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, WireError> {
        let payload = self.payload.clone().ok_or(WireError::MissingPayload)?;
        Ok(serde_json::from_value(payload)?)
    }

    pub fn registered(id: Option<String>, success: bool, message: impl Into<String>) -> Self {
        Self {
            kind: Kind::Registered,
            id,
            timestamp: Utc::now(),
            payload: Some(serde_json::json!({
                "success": success,
                "message": message.into(),
            })),
        }
    }

    pub fn pong() -> Self {
        Self {
            kind: Kind::Pong,
            id: None,
            timestamp: Utc::now(),
            payload: None,
        }
    }

    pub fn execute_command(request_id: &str, req: &ExecuteCommandRequest) -> Self {
        Self {
            kind: Kind::ExecuteCommand,
            id: Some(request_id.to_string()),
            timestamp: Utc::now(),
            payload: Some(serde_json::json!({
                "request_id": request_id,
                "command": req.command,
                "target_type": req.target_type,
                "target_id": req.target_id,
                "timeout": req.timeout_seconds,
            })),
        }
    }

    pub fn read_file(request_id: &str, req: &ReadFileRequest) -> Self {
        Self {
            kind: Kind::ReadFile,
            id: Some(request_id.to_string()),
            timestamp: Utc::now(),
            payload: Some(serde_json::json!({
                "request_id": request_id,
                "path": req.path,
                "target_type": req.target_type,
                "target_id": req.target_id,
                "max_bytes": req.max_bytes,
            })),
        }
    }
}

/// `{ agent_id, hostname, version, platform, tags, token }`, sent agent -> broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPayload {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub tags: HashSet<String>,
    #[serde(default)]
    pub token: String,
}

/// Caller-supplied parameters for `Broker::execute_command`.
#[derive(Debug, Clone)]
pub struct ExecuteCommandRequest {
    pub request_id: String,
    pub command: String,
    pub target_type: String,
    pub target_id: String,
    /// Values <= 0 fall back to `BrokerConfig::default_command_timeout`.
    pub timeout_seconds: i64,
}

/// Caller-supplied parameters for `Broker::read_file`.
#[derive(Debug, Clone)]
pub struct ReadFileRequest {
    pub request_id: String,
    pub path: String,
    pub target_type: String,
    pub target_id: String,
    pub max_bytes: i64,
}

/// `{ request_id, success, stdout, stderr, exit_code, duration, error? }`, agent -> broker.
///
/// Shared by both `execute_command` and `read_file` replies: the wire protocol has a
/// single `command_result` kind and the reader routes it by `(agent_id, request_id)`
/// regardless of which operation produced the matching pending entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandResult {
    pub request_id: String,
    pub success: bool,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub exit_code: i32,
    pub duration: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
