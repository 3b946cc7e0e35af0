//! portico-protocol: Wire protocol for Portico managed-session channels
//!
//! This crate defines the binary envelope format, JSON payload bodies, and
//! handshake negotiation used by the client data channel to talk to a
//! remote managed-session endpoint.

pub mod envelope;
pub mod error;
pub mod handshake;
pub mod payload;

pub use envelope::{AgentMessage, Flag, MessageType, PayloadType, HEADER_SIZE, SCHEMA_VERSION};
pub use error::ProtocolError;
pub use handshake::{build_handshake_response, CLIENT_VERSION};
pub use payload::{
    AcknowledgePayload, ActionStatus, ActionType, ChannelClosedPayload, HandshakeRequestPayload,
    HandshakeResponsePayload, OpenChannelRequest, ProcessedClientAction, RequestedClientAction,
    SessionControlFlag, SizePayload, MESSAGE_SCHEMA_VERSION,
};
