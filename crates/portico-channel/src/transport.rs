//! Transport collaborator
//!
//! The channel runs over a persistent, message-framed, full-duplex
//! connection (a websocket in the original deployment). Framing is the
//! transport's job: one `send_frame` produces exactly one frame on the
//! wire, one `recv_frame` yields exactly one complete inbound frame.

use async_trait::async_trait;
use bytes::Bytes;

/// A connected, message-framed duplex transport.
///
/// `close` must make a concurrently blocked `recv_frame` return an error
/// promptly; it is the only way to interrupt the receive loop.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one complete frame
    async fn send_frame(&self, frame: Bytes) -> std::io::Result<()>;

    /// Receive one complete frame
    async fn recv_frame(&self) -> std::io::Result<Bytes>;

    /// Close the connection, unblocking any pending receive
    async fn close(&self) -> std::io::Result<()>;
}

/// Dials a transport to a stream URL obtained from the control plane
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// The transport type produced by this connector
    type Transport: Transport;

    /// Connect to the given stream URL
    async fn connect(&self, url: &str) -> std::io::Result<Self::Transport>;
}
