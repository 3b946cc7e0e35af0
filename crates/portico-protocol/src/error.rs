//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding protocol messages
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame is shorter than the fixed envelope header
    #[error("Frame too short: {actual} bytes, header requires {expected}")]
    FrameTooShort { expected: usize, actual: usize },

    /// Declared payload length does not match the bytes on the wire
    #[error("Payload length mismatch: header declares {declared} bytes, frame carries {actual}")]
    PayloadLengthMismatch { declared: usize, actual: usize },

    /// Recomputed payload digest differs from the one in the envelope
    #[error("Payload digest mismatch: expected {expected}, computed {computed}")]
    DigestMismatch { expected: String, computed: String },

    /// Message type tag is not one of the closed set
    #[error("Unknown message type tag: {0:?}")]
    UnknownMessageType(String),

    /// Payload type value is not one of the closed set
    #[error("Unknown payload type: {0}")]
    UnknownPayloadType(u32),

    /// Flags value is not one of the closed set
    #[error("Unknown flag value: {0}")]
    UnknownFlag(u64),

    /// JSON payload body could not be serialized or parsed
    #[error("Payload serialization error: {0}")]
    Payload(#[from] serde_json::Error),
}
