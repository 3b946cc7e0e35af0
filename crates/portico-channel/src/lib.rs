//! portico-channel: Client data channel for Portico managed sessions
//!
//! Opens a duplex, sequence-numbered message channel to a remote
//! managed-session endpoint over a caller-supplied transport and relays
//! interactive terminal or port-forwarding byte streams across it.
//!
//! # Collaborators
//!
//! The control plane (session creation, auth) and the transport (dial,
//! TLS, frame delivery) live behind the [`SessionBroker`] and
//! [`Transport`]/[`TransportConnector`] traits; this crate owns only the
//! protocol engine between them.

pub mod broker;
pub mod channel;
pub mod error;
pub mod transport;

pub use broker::{BrokerError, SessionBroker, SessionCredentials, SessionParams};
pub use channel::{ChannelState, DataChannel, Inbound, TRANSPORT_CHUNK_SIZE};
pub use error::ChannelError;
pub use transport::{Transport, TransportConnector};
