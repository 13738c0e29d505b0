//! # Sync Protocol Messages
//!
//! Message types exchanged with the registration service.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Sync Protocol Messages                             │
//! │                                                                         │
//! │  ONE EXCHANGE PER SYNC                                                 │
//! │  ─────────────────────                                                 │
//! │  CLIENT ───► Register { app_id, access_token, sequence, snapshot }     │
//! │  SERVER ◄─── RegisterAck { sequence, server_time }                     │
//! │         or   Error { code, message }                                   │
//! │                                                                         │
//! │  KEEPALIVE (either side, while waiting for the ack)                    │
//! │  ─────────                                                             │
//! │  Both   ◄──► Ping { timestamp }                                        │
//! │  Both   ◄──► Pong { timestamp }                                        │
//! │                                                                         │
//! │  ERROR CODES                                                           │
//! │  ───────────                                                           │
//! │  UNAUTHORIZED, FORBIDDEN, INVALID_APP, BAD_REQUEST,                    │
//! │  UNSUPPORTED_VERSION            → permanent, engine suspends           │
//! │  anything else (UNAVAILABLE...) → retryable                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! Messages are serialized as tagged JSON using serde's adjacently tagged enum:
//! ```json
//! { "type": "Register", "payload": { "appId": "...", "snapshot": { ... } } }
//! ```

use serde::{Deserialize, Serialize};

use herald_core::Snapshot;

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Server error codes that no amount of retrying will fix.
pub const PERMANENT_ERROR_CODES: &[&str] = &[
    "UNAUTHORIZED",
    "FORBIDDEN",
    "INVALID_APP",
    "BAD_REQUEST",
    "UNSUPPORTED_VERSION",
];

// =============================================================================
// Main Message Enum (Tagged Union)
// =============================================================================

/// All sync protocol messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SyncMessage {
    /// Full state snapshot from the client.
    Register(RegisterPayload),

    /// Server accepted the snapshot with the given sequence.
    RegisterAck(RegisterAck),

    /// Keepalive probe.
    Ping { timestamp: String },

    /// Keepalive answer.
    Pong {
        ping_timestamp: String,
        pong_timestamp: String,
    },

    /// Error message.
    Error { code: String, message: String },
}

// =============================================================================
// Payloads
// =============================================================================

/// Snapshot upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    /// Application identifier.
    pub app_id: String,

    /// Application access token.
    pub access_token: String,

    /// Protocol version spoken by this client.
    pub protocol_version: u32,

    /// Client-chosen sequence number echoed in the ack.
    pub sequence: u64,

    /// The composed state.
    pub snapshot: Snapshot,
}

/// Acknowledgement for a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAck {
    /// Sequence of the acknowledged Register message.
    pub sequence: u64,

    /// Server time (RFC 3339).
    #[serde(default)]
    pub server_time: Option<String>,
}

// =============================================================================
// Helper Functions
// =============================================================================

impl SyncMessage {
    /// Returns the message type name as a string (for logging).
    pub fn type_name(&self) -> &'static str {
        match self {
            SyncMessage::Register(_) => "Register",
            SyncMessage::RegisterAck(_) => "RegisterAck",
            SyncMessage::Ping { .. } => "Ping",
            SyncMessage::Pong { .. } => "Pong",
            SyncMessage::Error { .. } => "Error",
        }
    }

    /// Creates a Register message.
    pub fn register(app_id: &str, access_token: &str, sequence: u64, snapshot: Snapshot) -> Self {
        SyncMessage::Register(RegisterPayload {
            app_id: app_id.to_string(),
            access_token: access_token.to_string(),
            protocol_version: PROTOCOL_VERSION,
            sequence,
            snapshot,
        })
    }

    /// Creates a RegisterAck message.
    pub fn ack(sequence: u64) -> Self {
        SyncMessage::RegisterAck(RegisterAck {
            sequence,
            server_time: Some(chrono::Utc::now().to_rfc3339()),
        })
    }

    /// Creates a Ping message.
    pub fn ping() -> Self {
        SyncMessage::Ping {
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Creates a Pong message.
    pub fn pong(ping_timestamp: &str) -> Self {
        SyncMessage::Pong {
            ping_timestamp: ping_timestamp.to_string(),
            pong_timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Creates an Error message.
    pub fn error(code: &str, message: &str) -> Self {
        SyncMessage::Error {
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    /// Serializes to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes from JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Returns true if a server error code means the request can never succeed
/// as configured.
pub fn is_permanent_code(code: &str) -> bool {
    PERMANENT_ERROR_CODES
        .iter()
        .any(|c| c.eq_ignore_ascii_case(code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use herald_core::DeviceInfo;

    fn snapshot() -> Snapshot {
        Snapshot {
            app_id: "app-1".into(),
            device: DeviceInfo::new("dev-1"),
            token: Some("cafe".into()),
            push_enabled: true,
            subscriber_key: None,
            tags: ["vip".to_string()].into_iter().collect(),
            attributes: Default::default(),
            facts: vec![],
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn test_register_wire_format() {
        let msg = SyncMessage::register("app-1", "tok", 7, snapshot());
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"Register\""));
        assert!(json.contains("\"accessToken\":\"tok\""));
        assert!(json.contains("\"sequence\":7"));

        match SyncMessage::from_json(&json).unwrap() {
            SyncMessage::Register(payload) => {
                assert_eq!(payload.protocol_version, PROTOCOL_VERSION);
                assert!(payload.snapshot.tags.contains("vip"));
            }
            other => panic!("Expected Register, got {}", other.type_name()),
        }
    }

    #[test]
    fn test_ack_without_server_time() {
        let msg = SyncMessage::from_json(r#"{"type":"RegisterAck","payload":{"sequence":3}}"#)
            .unwrap();
        match msg {
            SyncMessage::RegisterAck(ack) => {
                assert_eq!(ack.sequence, 3);
                assert!(ack.server_time.is_none());
            }
            other => panic!("Expected RegisterAck, got {}", other.type_name()),
        }
    }

    #[test]
    fn test_permanent_codes() {
        assert!(is_permanent_code("UNAUTHORIZED"));
        assert!(is_permanent_code("invalid_app"));
        assert!(!is_permanent_code("UNAVAILABLE"));
        assert!(!is_permanent_code("RATE_LIMITED"));
    }

    #[test]
    fn test_error_message() {
        let json = SyncMessage::error("FORBIDDEN", "App disabled").to_json().unwrap();
        assert!(json.contains("FORBIDDEN"));
        assert_eq!(SyncMessage::from_json(&json).unwrap().type_name(), "Error");
    }
}
