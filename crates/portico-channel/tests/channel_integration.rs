//! End-to-end channel tests: open through a broker and connector, then
//! run the port-forwarding handshake over a mock transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};

use portico_channel::{
    BrokerError, ChannelError, ChannelState, DataChannel, SessionBroker, SessionCredentials,
    SessionParams, Transport, TransportConnector,
};
use portico_protocol::{
    AgentMessage, Flag, HandshakeRequestPayload, HandshakeResponsePayload, MessageType,
    OpenChannelRequest, PayloadType, RequestedClientAction,
};

#[derive(Debug)]
struct MockTransport {
    inbound: Mutex<mpsc::UnboundedReceiver<Bytes>>,
    sent: std::sync::Mutex<Vec<Bytes>>,
    closed: AtomicBool,
}

/// Local wrapper so `Transport` can be implemented for a shared mock
/// without violating the orphan rule on `Arc<MockTransport>`.
#[derive(Debug)]
struct MockHandle(Arc<MockTransport>);

impl MockTransport {
    fn new() -> (Arc<Self>, mpsc::UnboundedSender<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            inbound: Mutex::new(rx),
            sent: std::sync::Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        (transport, tx)
    }

    fn sent_frames(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockHandle {
    async fn send_frame(&self, frame: Bytes) -> std::io::Result<()> {
        if self.0.closed.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "transport closed",
            ));
        }
        self.0.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn recv_frame(&self) -> std::io::Result<Bytes> {
        match self.0.inbound.lock().await.recv().await {
            Some(frame) => Ok(frame),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionAborted,
                "transport closed",
            )),
        }
    }

    async fn close(&self) -> std::io::Result<()> {
        self.0.closed.store(true, Ordering::SeqCst);
        self.0.inbound.lock().await.close();
        Ok(())
    }
}

struct MockConnector {
    transport: Arc<MockTransport>,
    connected_url: std::sync::Mutex<Option<String>>,
}

#[async_trait]
impl TransportConnector for MockConnector {
    type Transport = MockHandle;

    async fn connect(&self, url: &str) -> std::io::Result<Self::Transport> {
        *self.connected_url.lock().unwrap() = Some(url.to_string());
        Ok(MockHandle(Arc::clone(&self.transport)))
    }
}

struct MockBroker {
    fail: bool,
}

#[async_trait]
impl SessionBroker for MockBroker {
    async fn create_session(
        &self,
        params: &SessionParams,
    ) -> Result<SessionCredentials, BrokerError> {
        if self.fail {
            return Err("control plane rejected the request".into());
        }
        Ok(SessionCredentials {
            stream_url: format!("wss://stream.example/{}", params.target),
            token: "one-time-token".to_string(),
        })
    }
}

#[tokio::test]
async fn open_sends_bootstrap_and_connects_to_stream_url() {
    let (transport, _tx) = MockTransport::new();
    let connector = MockConnector {
        transport: Arc::clone(&transport),
        connected_url: std::sync::Mutex::new(None),
    };
    let broker = MockBroker { fail: false };

    let channel = DataChannel::open(&broker, &connector, &SessionParams::shell("i-0abc"))
        .await
        .unwrap();

    assert_eq!(channel.state(), ChannelState::Ready);
    assert_eq!(
        connector.connected_url.lock().unwrap().as_deref(),
        Some("wss://stream.example/i-0abc")
    );

    // The open-channel bootstrap goes out before any envelope traffic
    let sent = transport.sent_frames();
    assert_eq!(sent.len(), 1);
    let bootstrap: OpenChannelRequest = serde_json::from_slice(&sent[0]).unwrap();
    assert_eq!(bootstrap.message_schema_version, "1.0");
    assert_eq!(bootstrap.token_value, "one-time-token");
}

#[tokio::test]
async fn broker_failure_propagates_and_nothing_connects() {
    let (transport, _tx) = MockTransport::new();
    let connector = MockConnector {
        transport: Arc::clone(&transport),
        connected_url: std::sync::Mutex::new(None),
    };
    let broker = MockBroker { fail: true };

    let err = DataChannel::open(&broker, &connector, &SessionParams::shell("i-0abc"))
        .await
        .unwrap_err();

    assert!(matches!(err, ChannelError::Broker(_)));
    assert!(connector.connected_url.lock().unwrap().is_none());
    assert!(transport.sent_frames().is_empty());
}

#[tokio::test]
async fn port_session_handshake_end_to_end() {
    let (transport, tx) = MockTransport::new();
    let connector = MockConnector {
        transport: Arc::clone(&transport),
        connected_url: std::sync::Mutex::new(None),
    };
    let broker = MockBroker { fail: false };

    let mut params = SessionParams::shell("i-0abc");
    params.session_type = Some("PortForwarding".to_string());
    params
        .parameters
        .insert("portNumber".to_string(), vec!["22".to_string()]);

    let channel = DataChannel::open(&broker, &connector, &params).await.unwrap();

    // Remote side drives the handshake: request, then completion
    let request = HandshakeRequestPayload {
        agent_version: Some("3.1.1".to_string()),
        requested_client_actions: vec![RequestedClientAction {
            action_type: portico_protocol::ActionType::session_type(),
            action_parameters: serde_json::json!({"SessionType": "Port"}),
        }],
    };
    let mut request_msg = AgentMessage::new(
        MessageType::OutputStreamData,
        PayloadType::HandshakeRequest,
        Bytes::from(serde_json::to_vec(&request).unwrap()),
    );
    request_msg.sequence_number = 0;
    tx.send(request_msg.encode()).unwrap();

    let complete = AgentMessage::new(
        MessageType::OutputStreamData,
        PayloadType::HandshakeComplete,
        Bytes::new(),
    );
    tx.send(complete.encode()).unwrap();

    channel.wait_for_handshake_complete().await.unwrap();
    assert_eq!(channel.state(), ChannelState::Ready);

    // Wire order: bootstrap JSON, then framed envelopes. The first
    // envelope out carries the Syn flag at sequence 0.
    let sent = transport.sent_frames();
    let envelopes: Vec<AgentMessage> = sent[1..]
        .iter()
        .map(|f| AgentMessage::decode(f).unwrap())
        .collect();

    assert_eq!(envelopes[0].flags, Flag::Syn);
    assert_eq!(envelopes[0].sequence_number, 0);

    // Handshake response echoes the request's sequence number and
    // reports the negotiated action
    let response_msg = envelopes
        .iter()
        .find(|m| m.payload_type == PayloadType::HandshakeResponse)
        .expect("handshake response sent");
    assert_eq!(response_msg.message_type, MessageType::InputStreamData);
    assert_eq!(response_msg.sequence_number, 0);

    let response: HandshakeResponsePayload =
        serde_json::from_slice(&response_msg.payload).unwrap();
    assert_eq!(response.client_version, portico_protocol::CLIENT_VERSION);
    assert_eq!(response.processed_client_actions.len(), 1);

    // Both inbound frames were acknowledged
    let acks = envelopes
        .iter()
        .filter(|m| m.message_type == MessageType::Acknowledge)
        .count();
    assert_eq!(acks, 2);

    // Graceful teardown: disconnect the stream, then close the transport
    channel.disconnect_port().await.unwrap();
    channel.close().await.unwrap();
    assert_eq!(channel.state(), ChannelState::Closed);
    assert!(matches!(
        channel.write(b"late").await.unwrap_err(),
        ChannelError::Closed
    ));
}
