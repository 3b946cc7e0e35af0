//! JSON payload bodies carried inside message envelopes
//!
//! Field names follow the remote agent's wire format (PascalCase keys,
//! numeric action statuses), so these types serialize byte-compatibly
//! with what the peer expects.

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Schema version string sent in the open-channel bootstrap
pub const MESSAGE_SCHEMA_VERSION: &str = "1.0";

/// A client action requested by the remote agent during handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestedClientAction {
    /// Kind of action the agent wants the client to perform
    pub action_type: ActionType,
    /// Action-specific parameters, passed through uninterpreted
    #[serde(default)]
    pub action_parameters: serde_json::Value,
}

/// A processed action reported back to the remote agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProcessedClientAction {
    /// Echo of the requested action type
    pub action_type: ActionType,
    /// Outcome of processing the action
    pub action_status: ActionStatus,
    /// Optional failure detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Handshake action type.
///
/// Carried as a plain string on the wire; only [`ActionType::SESSION_TYPE`]
/// is currently meaningful, but unrecognized types must survive a
/// request/response round trip, so the raw string is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionType(pub String);

impl ActionType {
    /// The only action type this client supports
    pub const SESSION_TYPE: &'static str = "SessionType";

    /// Construct the supported `SessionType` action type
    pub fn session_type() -> Self {
        Self(Self::SESSION_TYPE.to_string())
    }

    /// Whether this is the supported `SessionType` action
    pub fn is_session_type(&self) -> bool {
        self.0 == Self::SESSION_TYPE
    }
}

/// Handshake action outcome, a bare integer on the wire.
///
/// The zero value is deliberately representable: an unsupported action is
/// reported with `Unset`, which a conformant peer reads as failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum ActionStatus {
    /// Zero value; peer interprets as unsupported/failed
    #[default]
    Unset = 0,
    /// Action processed successfully
    Success = 1,
    /// Action processing failed
    Failed = 2,
    /// Action type not supported by this client
    Unsupported = 3,
}

impl Serialize for ActionStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(*self as u32)
    }
}

impl<'de> Deserialize<'de> for ActionStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u32::deserialize(deserializer)? {
            0 => Ok(Self::Unset),
            1 => Ok(Self::Success),
            2 => Ok(Self::Failed),
            3 => Ok(Self::Unsupported),
            other => Err(de::Error::invalid_value(
                de::Unexpected::Unsigned(other as u64),
                &"an action status in 0..=3",
            )),
        }
    }
}

/// Handshake request sent by the remote agent before port data may flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HandshakeRequestPayload {
    /// Remote agent version (informational)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
    /// Actions the agent asks this client to perform
    pub requested_client_actions: Vec<RequestedClientAction>,
}

/// Handshake response declaring which actions this client handled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HandshakeResponsePayload {
    /// Version this client reports; certain remote features are gated on it
    pub client_version: String,
    /// One entry per requested action, in request order
    pub processed_client_actions: Vec<ProcessedClientAction>,
}

/// Body of a `ChannelClosed` message.
///
/// The remote may attach trailing output that must still reach the reader
/// before end-of-stream is signaled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChannelClosedPayload {
    /// Final output flushed with the close
    #[serde(default)]
    pub output: String,
}

/// Terminal dimensions for a shell session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizePayload {
    /// Number of columns
    pub cols: u32,
    /// Number of rows
    pub rows: u32,
}

/// Body of an `Acknowledge` message, echoing the message it confirms
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AcknowledgePayload {
    /// Message type tag of the acknowledged message
    pub acknowledged_message_type: String,
    /// Identifier of the acknowledged message
    pub acknowledged_message_id: String,
    /// Sequence number of the acknowledged message
    pub acknowledged_message_sequence_number: i64,
    /// Always true; acknowledgment is per-message, not windowed
    pub is_sequential_message: bool,
}

/// JSON bootstrap sent immediately after the transport connects, before
/// any framed envelope traffic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OpenChannelRequest {
    /// Fixed schema version string
    pub message_schema_version: String,
    /// Fresh identifier for this open request
    pub request_id: String,
    /// One-time token issued by the control plane
    pub token_value: String,
}

impl OpenChannelRequest {
    /// Build a bootstrap message for the given session token
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            message_schema_version: MESSAGE_SCHEMA_VERSION.to_string(),
            request_id: Uuid::new_v4().to_string(),
            token_value: token.into(),
        }
    }
}

/// Session-control values carried inside a `Flag`-typed payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SessionControlFlag {
    /// Tear down one forwarding stream; the channel stays usable
    DisconnectToPort = 1,
    /// Tear down the whole session
    TerminateSession = 2,
}

impl SessionControlFlag {
    /// Encode as the 4-byte big-endian payload the protocol expects
    pub fn to_payload(self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u32(self as u32);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_request_parses_wire_json() {
        let raw = r#"{
            "AgentVersion": "3.1.0",
            "RequestedClientActions": [
                {"ActionType": "SessionType", "ActionParameters": {"SessionType": "Port"}},
                {"ActionType": "KMSEncryption", "ActionParameters": {}}
            ]
        }"#;

        let req: HandshakeRequestPayload = serde_json::from_str(raw).unwrap();
        assert_eq!(req.agent_version.as_deref(), Some("3.1.0"));
        assert_eq!(req.requested_client_actions.len(), 2);
        assert!(req.requested_client_actions[0].action_type.is_session_type());
        assert!(!req.requested_client_actions[1].action_type.is_session_type());
    }

    #[test]
    fn test_action_status_serializes_as_integer() {
        let action = ProcessedClientAction {
            action_type: ActionType::session_type(),
            action_status: ActionStatus::Success,
            error: None,
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["ActionType"], "SessionType");
        assert_eq!(json["ActionStatus"], 1);
        assert!(json.get("Error").is_none());
    }

    #[test]
    fn test_action_status_zero_value_roundtrip() {
        let json = serde_json::to_string(&ActionStatus::Unset).unwrap();
        assert_eq!(json, "0");
        let back: ActionStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ActionStatus::Unset);
        assert!(serde_json::from_str::<ActionStatus>("9").is_err());
    }

    #[test]
    fn test_channel_closed_ignores_extra_fields() {
        let raw = r#"{"SessionId": "s-1234", "Output": "goodbye", "SchemaVersion": 1}"#;
        let payload: ChannelClosedPayload = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.output, "goodbye");

        let empty: ChannelClosedPayload = serde_json::from_str("{}").unwrap();
        assert!(empty.output.is_empty());
    }

    #[test]
    fn test_open_channel_request_shape() {
        let req = OpenChannelRequest::new("token-abc");
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["MessageSchemaVersion"], "1.0");
        assert_eq!(json["TokenValue"], "token-abc");
        assert!(Uuid::parse_str(json["RequestId"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_session_control_flag_payload() {
        assert_eq!(
            SessionControlFlag::TerminateSession.to_payload().as_ref(),
            &[0, 0, 0, 2]
        );
        assert_eq!(
            SessionControlFlag::DisconnectToPort.to_payload().as_ref(),
            &[0, 0, 0, 1]
        );
    }

    #[test]
    fn test_size_payload_keys_are_lowercase() {
        let json = serde_json::to_value(SizePayload { cols: 80, rows: 24 }).unwrap();
        assert_eq!(json["cols"], 80);
        assert_eq!(json["rows"], 24);
    }
}
