//! WebSocket message envelope.
//!
//! All server-to-client traffic uses one generic envelope; feature payloads
//! are carried as JSON values so new status kinds never break old clients.

use serde::{Deserialize, Serialize};

/// Server -> client message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerMessage {
    /// Message type identifier (e.g. "connected", "folder_status").
    #[serde(rename = "type")]
    pub msg_type: String,
    pub payload: serde_json::Value,
}

impl ServerMessage {
    pub fn new(msg_type: impl Into<String>, payload: impl Serialize) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn empty(msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload: serde_json::Value::Null,
        }
    }
}

/// Client -> server message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Reserved message type constants.
pub mod msg_types {
    /// Sent by the server on successful connection.
    pub const CONNECTED: &str = "connected";
    /// Client heartbeat request / server response.
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    /// Folder status transition (§ status broadcasts).
    pub const FOLDER_STATUS: &str = "folder_status";
    /// Job lifecycle update.
    pub const JOB_STATUS: &str = "job_status";
    /// Something under an inbox tree changed.
    pub const FS_UPDATE: &str = "fs_update";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_message_serializes_with_type_tag() {
        let msg = ServerMessage::new("folder_status", serde_json::json!({"hash": "h1"}));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"folder_status\""));
        assert!(json.contains("\"hash\":\"h1\""));
    }

    #[test]
    fn client_message_deserializes_without_payload() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg.msg_type, "ping");
        assert_eq!(msg.payload, serde_json::Value::Null);
    }
}
