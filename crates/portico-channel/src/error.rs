//! Channel error types

use portico_protocol::{MessageType, PayloadType, ProtocolError};
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the data channel.
///
/// All of these are fatal to the channel: there is no internal retry or
/// reconnect, and a caller seeing one should call
/// [`crate::DataChannel::close`] and open a new channel if the session is
/// to be resumed.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Control-plane session creation failed; the source error is
    /// propagated unchanged
    #[error("Session creation failed: {0}")]
    Broker(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Transport could not connect to the stream endpoint
    #[error("Failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: std::io::Error,
    },

    /// Transport send or receive failed
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Inbound frame failed envelope validation; the stream cannot be
    /// resynchronized after a corrupt frame
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Handshake body could not be parsed or built
    #[error("Handshake error: {0}")]
    Handshake(#[source] serde_json::Error),

    /// Remote closed the channel before the handshake completed
    #[error("Channel closed before handshake completed")]
    HandshakeAborted,

    /// Inbound message type this client does not handle
    #[error("Unexpected message type {message_type} (message {message_id}, seq {sequence_number})")]
    UnexpectedMessage {
        message_type: MessageType,
        message_id: Uuid,
        sequence_number: i64,
    },

    /// Inbound payload type this client does not handle on a data message
    #[error("Unexpected payload type {payload_type:?} on output stream (message {message_id})")]
    UnexpectedPayload {
        payload_type: PayloadType,
        message_id: Uuid,
    },

    /// Operation attempted after the channel was closed
    #[error("Channel is closed")]
    Closed,
}
