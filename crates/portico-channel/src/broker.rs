//! Control-plane collaborator
//!
//! Creating a session (and obtaining the stream URL plus one-time token)
//! is a control-plane concern with its own auth and retry policies; the
//! channel consumes it through this seam and propagates its errors
//! unchanged.

use async_trait::async_trait;
use std::collections::HashMap;

/// Error type returned by broker implementations; treated as opaque
pub type BrokerError = Box<dyn std::error::Error + Send + Sync>;

/// Parameters for creating a managed session
#[derive(Debug, Clone, Default)]
pub struct SessionParams {
    /// Target instance or endpoint identifier
    pub target: String,
    /// Session kind (e.g. a port-forwarding document name); None for a
    /// plain shell session
    pub session_type: Option<String>,
    /// Session-type-specific parameters (port number, host, ...)
    pub parameters: HashMap<String, Vec<String>>,
}

impl SessionParams {
    /// Parameters for a plain shell session on `target`
    pub fn shell(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }
}

/// Credentials for connecting the transport to a freshly created session
#[derive(Debug, Clone)]
pub struct SessionCredentials {
    /// URL the transport should connect to
    pub stream_url: String,
    /// One-time token sent in the open-channel bootstrap
    pub token: String,
}

/// Creates sessions against the control plane
#[async_trait]
pub trait SessionBroker: Send + Sync {
    /// Create a session and return its stream credentials
    async fn create_session(
        &self,
        params: &SessionParams,
    ) -> Result<SessionCredentials, BrokerError>;
}
