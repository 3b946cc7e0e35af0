//! The data channel: session lifecycle, sequencing, and dispatch
//!
//! One channel instance owns one transport connection. Any number of
//! tasks may write (explicit writes plus the receive path's own
//! acknowledgment and handshake-response sends); one logical reader
//! drives [`DataChannel::read_message`], normally through
//! [`DataChannel::write_to`] or [`DataChannel::wait_for_handshake_complete`].

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, Mutex};

use portico_protocol::{
    build_handshake_response, AcknowledgePayload, AgentMessage, ChannelClosedPayload, Flag,
    HandshakeRequestPayload, MessageType, OpenChannelRequest, PayloadType, SessionControlFlag,
    SizePayload,
};

use crate::broker::{SessionBroker, SessionParams};
use crate::error::ChannelError;
use crate::transport::{Transport, TransportConnector};

/// Chunk size used when draining a source into the channel; matches the
/// frame limit commonly enforced by the stream transport.
pub const TRANSPORT_CHUNK_SIZE: usize = 1536;

/// Observable channel lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    /// Not yet connected
    Unopened = 0,
    /// Control-plane call and transport connect in progress
    Connecting = 1,
    /// Connected, pumping reads until the handshake gate fires
    AwaitingHandshake = 2,
    /// Open for application traffic
    Ready = 3,
    /// Torn down; all operations fail fast
    Closed = 4,
}

impl ChannelState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Unopened,
            1 => Self::Connecting,
            2 => Self::AwaitingHandshake,
            3 => Self::Ready,
            _ => Self::Closed,
        }
    }
}

/// One logical delivery produced by a single inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Frame consumed with no application bytes (acknowledgment or
    /// handshake traffic); "no data yet", not end of stream
    Quiet,
    /// One frame of application output; may be empty
    Data(Bytes),
    /// Remote closed the channel; any trailing output must still reach
    /// the reader before end-of-stream
    Closed(Bytes),
}

/// Client side of a managed-session data channel.
///
/// Obtained from [`DataChannel::open`], which creates the session via the
/// control plane, connects the transport, and sends the open-channel
/// bootstrap. Port-forwarding callers must then
/// [`DataChannel::wait_for_handshake_complete`] before exchanging data;
/// plain shell sessions skip the handshake.
#[derive(Debug)]
pub struct DataChannel<T: Transport> {
    transport: T,
    /// Serializes encode+send so frames never interleave on the wire.
    /// Held for exactly one send, never across a read.
    write_lock: Mutex<()>,
    /// Outbound sequence counter, shared by explicit writes and the
    /// receive path's internal sends
    seq_num: AtomicI64,
    /// Whether the initial Syn-flagged message has been sent
    syn_sent: AtomicBool,
    state: AtomicU8,
    /// Single-fire handshake gate; the sender side is taken at most once
    handshake_tx: Mutex<Option<oneshot::Sender<()>>>,
    /// Receiver side, consumed by exactly one waiter
    handshake_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

impl<T: Transport> DataChannel<T> {
    /// Create a session, connect the transport, and open the channel.
    ///
    /// Any broker, connect, or bootstrap failure tears the channel down
    /// and is returned to the caller; there is no retry at this layer.
    pub async fn open<B, C>(
        broker: &B,
        connector: &C,
        params: &SessionParams,
    ) -> Result<Self, ChannelError>
    where
        B: SessionBroker + ?Sized,
        C: TransportConnector<Transport = T> + ?Sized,
    {
        let credentials = broker
            .create_session(params)
            .await
            .map_err(ChannelError::Broker)?;

        tracing::debug!(session_target = %params.target, "session created, connecting stream transport");
        let transport = connector
            .connect(&credentials.stream_url)
            .await
            .map_err(|source| ChannelError::Connect {
                url: credentials.stream_url.clone(),
                source,
            })?;

        let channel = Self::with_transport(transport);
        if let Err(err) = channel.open_channel(&credentials.token).await {
            let _ = channel.close().await;
            return Err(err);
        }

        channel.set_state(ChannelState::Ready);
        tracing::debug!("data channel open");
        Ok(channel)
    }

    /// Wrap an already-connected transport.
    ///
    /// The caller is responsible for sending the open-channel bootstrap
    /// via [`DataChannel::open_channel`] before any framed traffic.
    pub fn with_transport(transport: T) -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            transport,
            write_lock: Mutex::new(()),
            seq_num: AtomicI64::new(0),
            syn_sent: AtomicBool::new(false),
            state: AtomicU8::new(ChannelState::Connecting as u8),
            handshake_tx: Mutex::new(Some(tx)),
            handshake_rx: Mutex::new(Some(rx)),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Send the JSON open-channel bootstrap with a fresh request id and
    /// the control-plane token. Must precede all envelope traffic.
    pub async fn open_channel(&self, token: &str) -> Result<(), ChannelError> {
        let request = OpenChannelRequest::new(token);
        let frame = serde_json::to_vec(&request).map_err(|e| ChannelError::Protocol(e.into()))?;

        let _guard = self.write_lock.lock().await;
        self.transport.send_frame(Bytes::from(frame)).await?;
        Ok(())
    }

    /// Pump the receive loop until the handshake-completion gate fires.
    ///
    /// Required for port-forwarding sessions before any application data
    /// is exchanged; plain shell sessions never call this. Returns an
    /// error if the transport fails or the remote closes the channel
    /// before the handshake finishes.
    pub async fn wait_for_handshake_complete(&self) -> Result<(), ChannelError> {
        let mut rx = match self.handshake_rx.lock().await.take() {
            Some(rx) => rx,
            // Gate already consumed by an earlier waiter
            None => return Ok(()),
        };
        self.set_state(ChannelState::AwaitingHandshake);

        loop {
            match rx.try_recv() {
                Ok(()) | Err(oneshot::error::TryRecvError::Closed) => {
                    self.set_state(ChannelState::Ready);
                    tracing::debug!("handshake complete");
                    return Ok(());
                }
                Err(oneshot::error::TryRecvError::Empty) => match self.read_message().await? {
                    Inbound::Quiet | Inbound::Data(_) => {}
                    Inbound::Closed(_) => return Err(ChannelError::HandshakeAborted),
                },
            }
        }
    }

    /// Send application bytes as one `Output` message.
    ///
    /// Returns the number of payload bytes accepted.
    pub async fn write(&self, payload: &[u8]) -> Result<usize, ChannelError> {
        let mut msg = AgentMessage::new(
            MessageType::InputStreamData,
            PayloadType::Output,
            Bytes::copy_from_slice(payload),
        );
        msg.flags = Flag::Data;
        self.send_sequenced(msg).await
    }

    /// Encode and send one message frame, as given.
    ///
    /// The very first message on the channel is forced to sequence number
    /// 0 with the Syn flag, whatever the caller supplied; every later
    /// message goes out untouched. Returns the payload byte count.
    pub async fn write_msg(&self, mut msg: AgentMessage) -> Result<usize, ChannelError> {
        self.ensure_open()?;

        let _guard = self.write_lock.lock().await;
        self.stamp_first_write(&mut msg);
        self.send_locked(msg).await
    }

    /// Assign the next sequence number and send. Assignment happens under
    /// the write lock so concurrent writers can neither reuse nor skip a
    /// sequence number, and frames leave in sequence order.
    async fn send_sequenced(&self, mut msg: AgentMessage) -> Result<usize, ChannelError> {
        self.ensure_open()?;

        let _guard = self.write_lock.lock().await;
        if !self.stamp_first_write(&mut msg) {
            msg.sequence_number = self.next_seq();
        }
        self.send_locked(msg).await
    }

    /// First-write override: the initial frame opens the shared sequence
    /// space at 0 and carries the Syn flag. Returns true if applied.
    /// Caller must hold the write lock.
    fn stamp_first_write(&self, msg: &mut AgentMessage) -> bool {
        if self.syn_sent.load(Ordering::Acquire) {
            return false;
        }
        self.seq_num.store(0, Ordering::Release);
        msg.sequence_number = 0;
        msg.flags = Flag::Syn;
        self.syn_sent.store(true, Ordering::Release);
        true
    }

    async fn send_locked(&self, msg: AgentMessage) -> Result<usize, ChannelError> {
        let n = msg.payload.len();
        self.transport.send_frame(msg.encode()).await?;
        Ok(n)
    }

    /// Read, acknowledge, and dispatch one inbound frame.
    ///
    /// Every inbound message is acknowledged before its effect is
    /// delivered, so a caller observing data implies the peer already saw
    /// the receipt. Decode failures are fatal; the stream cannot be
    /// resynchronized after a corrupt frame.
    pub async fn read_message(&self) -> Result<Inbound, ChannelError> {
        self.ensure_open()?;

        let frame = self.transport.recv_frame().await?;
        let msg = AgentMessage::decode(&frame)?;
        self.send_acknowledge(&msg).await?;

        match msg.message_type {
            MessageType::Acknowledge => Ok(Inbound::Quiet),
            MessageType::OutputStreamData => match msg.payload_type {
                PayloadType::Output => Ok(Inbound::Data(msg.payload)),
                PayloadType::HandshakeRequest => {
                    self.process_handshake_request(&msg).await?;
                    Ok(Inbound::Quiet)
                }
                PayloadType::HandshakeComplete => {
                    self.fire_handshake_gate().await;
                    Ok(Inbound::Quiet)
                }
                payload_type => Err(ChannelError::UnexpectedPayload {
                    payload_type,
                    message_id: msg.message_id,
                }),
            },
            MessageType::ChannelClosed => {
                let payload: ChannelClosedPayload = serde_json::from_slice(&msg.payload)
                    .map_err(|e| ChannelError::Protocol(e.into()))?;
                tracing::debug!(trailing = payload.output.len(), "remote closed channel");
                Ok(Inbound::Closed(Bytes::from(payload.output)))
            }
            message_type => Err(ChannelError::UnexpectedMessage {
                message_type,
                message_id: msg.message_id,
                sequence_number: msg.sequence_number,
            }),
        }
    }

    /// Acknowledge an inbound message, echoing its type, id, and sequence
    /// number. Required for every inbound frame; a send failure is fatal.
    pub async fn send_acknowledge(&self, msg: &AgentMessage) -> Result<(), ChannelError> {
        let body = AcknowledgePayload {
            acknowledged_message_type: msg.message_type.as_str().to_string(),
            acknowledged_message_id: msg.message_id.to_string(),
            acknowledged_message_sequence_number: msg.sequence_number,
            is_sequential_message: true,
        };
        let payload = serde_json::to_vec(&body).map_err(|e| ChannelError::Protocol(e.into()))?;

        let mut ack = AgentMessage::new(
            MessageType::Acknowledge,
            PayloadType::Undefined,
            Bytes::from(payload),
        );
        ack.sequence_number = msg.sequence_number;
        ack.flags = Flag::Ack;

        self.write_msg(ack).await.map(|_| ())
    }

    /// Handle a handshake request from the remote agent and send the
    /// negotiated response, echoing the request's sequence number.
    ///
    /// Handshake failure is never partial: a decode or send error here
    /// aborts the session.
    async fn process_handshake_request(&self, msg: &AgentMessage) -> Result<(), ChannelError> {
        let request: HandshakeRequestPayload =
            serde_json::from_slice(&msg.payload).map_err(ChannelError::Handshake)?;
        tracing::debug!(
            actions = request.requested_client_actions.len(),
            "processing handshake request"
        );

        let response = build_handshake_response(&request.requested_client_actions);
        let payload = serde_json::to_vec(&response).map_err(ChannelError::Handshake)?;

        let mut out = AgentMessage::new(
            MessageType::InputStreamData,
            PayloadType::HandshakeResponse,
            Bytes::from(payload),
        );
        out.sequence_number = msg.sequence_number;
        out.flags = Flag::Data;

        self.write_msg(out).await.map(|_| ())
    }

    /// Send the terminal dimensions for a shell session
    pub async fn set_terminal_size(&self, rows: u32, cols: u32) -> Result<(), ChannelError> {
        let payload = serde_json::to_vec(&SizePayload { cols, rows })
            .map_err(|e| ChannelError::Protocol(e.into()))?;

        let mut msg = AgentMessage::new(
            MessageType::InputStreamData,
            PayloadType::Size,
            Bytes::from(payload),
        );
        msg.flags = Flag::Data;

        self.send_sequenced(msg).await.map(|_| ())
    }

    /// Tell the remote that the whole session is ending.
    ///
    /// The connection to the remote instance is released; follow with
    /// [`DataChannel::close`].
    pub async fn terminate_session(&self) -> Result<(), ChannelError> {
        self.send_control_flag(SessionControlFlag::TerminateSession, Flag::Fin)
            .await
    }

    /// Tell the remote that one forwarding stream is ending.
    ///
    /// Unlike [`DataChannel::terminate_session`], the channel can still
    /// start a new forwarding stream without reconnecting.
    pub async fn disconnect_port(&self) -> Result<(), ChannelError> {
        self.send_control_flag(SessionControlFlag::DisconnectToPort, Flag::Data)
            .await
    }

    /// Drain the channel into `sink` until the remote closes it.
    ///
    /// Trailing output on the close is delivered before returning the
    /// total byte count. Transport and sink errors propagate.
    pub async fn write_to<W>(&self, sink: &mut W) -> Result<u64, ChannelError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut total = 0u64;
        loop {
            match self.read_message().await? {
                Inbound::Quiet => {}
                Inbound::Data(data) => {
                    total += data.len() as u64;
                    sink.write_all(&data).await?;
                }
                Inbound::Closed(trailing) => {
                    if !trailing.is_empty() {
                        total += trailing.len() as u64;
                        sink.write_all(&trailing).await?;
                    }
                    sink.flush().await?;
                    return Ok(total);
                }
            }
        }
    }

    /// Frame everything read from `source` into the channel, in
    /// [`TRANSPORT_CHUNK_SIZE`] chunks, until the source is exhausted.
    ///
    /// Clean source EOF ends the loop normally and returns the total
    /// byte count.
    pub async fn read_from<R>(&self, source: &mut R) -> Result<u64, ChannelError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = [0u8; TRANSPORT_CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                return Ok(total);
            }
            total += n as u64;
            self.write(&buf[..n]).await?;
        }
    }

    /// Close the transport and mark the channel closed.
    ///
    /// Sends no session-control message itself; callers wanting a
    /// graceful remote shutdown send [`DataChannel::terminate_session`]
    /// or [`DataChannel::disconnect_port`] first. A concurrent blocked
    /// read is unblocked by the transport close.
    pub async fn close(&self) -> Result<(), ChannelError> {
        self.set_state(ChannelState::Closed);
        self.transport.close().await?;
        Ok(())
    }

    async fn send_control_flag(
        &self,
        control: SessionControlFlag,
        flags: Flag,
    ) -> Result<(), ChannelError> {
        let mut msg = AgentMessage::new(
            MessageType::InputStreamData,
            PayloadType::Flag,
            control.to_payload(),
        );
        msg.flags = flags;

        tracing::debug!(?control, "sending session control flag");
        self.send_sequenced(msg).await.map(|_| ())
    }

    async fn fire_handshake_gate(&self) {
        // Present-check guards a duplicate HandshakeComplete from the peer
        if let Some(tx) = self.handshake_tx.lock().await.take() {
            let _ = tx.send(());
        }
    }

    fn next_seq(&self) -> i64 {
        self.seq_num.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn ensure_open(&self) -> Result<(), ChannelError> {
        if self.state() == ChannelState::Closed {
            return Err(ChannelError::Closed);
        }
        Ok(())
    }

    fn set_state(&self, next: ChannelState) {
        // Closed is terminal
        let _ = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                if current == ChannelState::Closed as u8 {
                    None
                } else {
                    Some(next as u8)
                }
            });
    }
}
