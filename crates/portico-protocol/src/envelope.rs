//! Agent message envelope encoding/decoding
//!
//! Every protocol message travels inside a fixed-layout binary envelope
//! with a 116-byte big-endian header followed by the payload:
//!
//! - message_type: 32 bytes (NUL-padded ASCII tag)
//! - schema_version: 4 bytes (u32)
//! - created_date: 8 bytes (u64, millis since epoch)
//! - sequence_number: 8 bytes (i64)
//! - flags: 8 bytes (u64)
//! - message_id: 16 bytes (UUID)
//! - payload_digest: 32 bytes (SHA-256 of payload)
//! - payload_type: 4 bytes (u32)
//! - payload_length: 4 bytes (u32)
//!
//! The transport is message-framed, so one frame carries exactly one
//! envelope and the payload must fill the remainder of the frame.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::error::ProtocolError;

/// Size of the envelope header in bytes
pub const HEADER_SIZE: usize = 116;

/// Width of the fixed message-type tag field
const MESSAGE_TYPE_WIDTH: usize = 32;

/// Width of the payload digest field (SHA-256)
const DIGEST_WIDTH: usize = 32;

/// Protocol schema version carried in every envelope
pub const SCHEMA_VERSION: u32 = 1;

/// Message type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Client-to-remote data and control
    InputStreamData,
    /// Remote-to-client data and control
    OutputStreamData,
    /// Per-message delivery confirmation
    Acknowledge,
    /// Remote-initiated channel teardown
    ChannelClosed,
}

impl MessageType {
    /// Wire tag for this message type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InputStreamData => "input_stream_data",
            Self::OutputStreamData => "output_stream_data",
            Self::Acknowledge => "acknowledge",
            Self::ChannelClosed => "channel_closed",
        }
    }

    /// Parse a wire tag
    pub fn from_str_tag(tag: &str) -> Option<Self> {
        match tag {
            "input_stream_data" => Some(Self::InputStreamData),
            "output_stream_data" => Some(Self::OutputStreamData),
            "acknowledge" => Some(Self::Acknowledge),
            "channel_closed" => Some(Self::ChannelClosed),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PayloadType {
    /// No meaningful payload interpretation (used by acknowledgments)
    Undefined = 0,
    /// Application stream bytes
    Output = 1,
    /// Terminal size update
    Size = 3,
    /// Capability negotiation request
    HandshakeRequest = 5,
    /// Capability negotiation response
    HandshakeResponse = 6,
    /// Handshake finished, data may flow
    HandshakeComplete = 7,
    /// Session-control flag (4-byte big-endian value)
    Flag = 10,
}

impl PayloadType {
    /// Convert to the wire value
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// Convert from the wire value
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Undefined),
            1 => Some(Self::Output),
            3 => Some(Self::Size),
            5 => Some(Self::HandshakeRequest),
            6 => Some(Self::HandshakeResponse),
            7 => Some(Self::HandshakeComplete),
            10 => Some(Self::Flag),
            _ => None,
        }
    }
}

/// Message role flag; exactly one is set per message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum Flag {
    /// Ordinary data-bearing message
    Data = 0,
    /// First message on a channel
    Syn = 1,
    /// Session-terminating message
    Fin = 2,
    /// Acknowledgment message
    Ack = 3,
}

impl Flag {
    /// Convert to the wire value
    pub fn as_u64(&self) -> u64 {
        *self as u64
    }

    /// Convert from the wire value
    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            0 => Some(Self::Data),
            1 => Some(Self::Syn),
            2 => Some(Self::Fin),
            3 => Some(Self::Ack),
            _ => None,
        }
    }
}

/// A protocol message envelope.
///
/// `payload_length` and `payload_digest` exist only on the wire: they are
/// computed from `payload` during [`AgentMessage::encode`] and verified
/// during [`AgentMessage::decode`], so a constructed message can never
/// carry a stale digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentMessage {
    /// Message type tag
    pub message_type: MessageType,
    /// Protocol schema version
    pub schema_version: u32,
    /// Creation timestamp, millis since epoch (informational)
    pub created_date: u64,
    /// Position in the channel's shared sequence space
    pub sequence_number: i64,
    /// Role of this message
    pub flags: Flag,
    /// Unique message identifier
    pub message_id: Uuid,
    /// Payload discriminator
    pub payload_type: PayloadType,
    /// Payload bytes, interpreted per `payload_type`
    pub payload: Bytes,
}

impl AgentMessage {
    /// Create a message with a fresh id and current timestamp.
    ///
    /// Sequence number and flags default to 0/`Data`; callers assign them
    /// before sending.
    pub fn new(message_type: MessageType, payload_type: PayloadType, payload: Bytes) -> Self {
        let created_date = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            message_type,
            schema_version: SCHEMA_VERSION,
            created_date,
            sequence_number: 0,
            flags: Flag::Data,
            message_id: Uuid::new_v4(),
            payload_type,
            payload,
        }
    }

    /// Encode the envelope into one wire frame.
    ///
    /// The payload length and SHA-256 digest are computed from the current
    /// payload.
    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());

        let mut tag = [0u8; MESSAGE_TYPE_WIDTH];
        let s = self.message_type.as_str().as_bytes();
        tag[..s.len()].copy_from_slice(s);
        dst.put_slice(&tag);

        dst.put_u32(self.schema_version);
        dst.put_u64(self.created_date);
        dst.put_i64(self.sequence_number);
        dst.put_u64(self.flags.as_u64());
        dst.put_slice(self.message_id.as_bytes());
        dst.put_slice(&payload_digest(&self.payload));
        dst.put_u32(self.payload_type.as_u32());
        dst.put_u32(self.payload.len() as u32);
        dst.put_slice(&self.payload);

        dst.freeze()
    }

    /// Decode one wire frame into an envelope.
    ///
    /// Fails if the frame is shorter than the header, if the declared
    /// payload length does not match the remaining bytes exactly, if the
    /// digest does not verify, or if any enum field holds a value outside
    /// its closed set. Partial frames are never accepted.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        if frame.len() < HEADER_SIZE {
            return Err(ProtocolError::FrameTooShort {
                expected: HEADER_SIZE,
                actual: frame.len(),
            });
        }

        let mut src = frame;

        let mut tag = [0u8; MESSAGE_TYPE_WIDTH];
        src.copy_to_slice(&mut tag);
        let end = tag.iter().position(|&b| b == 0).unwrap_or(MESSAGE_TYPE_WIDTH);
        let tag_str = String::from_utf8_lossy(&tag[..end]).into_owned();
        let message_type = MessageType::from_str_tag(tag_str.trim())
            .ok_or(ProtocolError::UnknownMessageType(tag_str))?;

        let schema_version = src.get_u32();
        let created_date = src.get_u64();
        let sequence_number = src.get_i64();
        let flags_raw = src.get_u64();
        let flags = Flag::from_u64(flags_raw).ok_or(ProtocolError::UnknownFlag(flags_raw))?;

        let mut id_bytes = [0u8; 16];
        src.copy_to_slice(&mut id_bytes);
        let message_id = Uuid::from_bytes(id_bytes);

        let mut digest = [0u8; DIGEST_WIDTH];
        src.copy_to_slice(&mut digest);

        let payload_type_raw = src.get_u32();
        let payload_type = PayloadType::from_u32(payload_type_raw)
            .ok_or(ProtocolError::UnknownPayloadType(payload_type_raw))?;

        let declared = src.get_u32() as usize;
        if declared != src.remaining() {
            return Err(ProtocolError::PayloadLengthMismatch {
                declared,
                actual: src.remaining(),
            });
        }

        let payload = Bytes::copy_from_slice(src);
        let computed = payload_digest(&payload);
        if computed != digest {
            return Err(ProtocolError::DigestMismatch {
                expected: hex::encode(digest),
                computed: hex::encode(computed),
            });
        }

        Ok(Self {
            message_type,
            schema_version,
            created_date,
            sequence_number,
            flags,
            message_id,
            payload_type,
            payload,
        })
    }
}

/// SHA-256 digest of a payload
fn payload_digest(payload: &[u8]) -> [u8; DIGEST_WIDTH] {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hasher.finalize().into()
}
