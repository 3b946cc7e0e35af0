//! Handshake response negotiation
//!
//! Port-forwarding sessions require a capability handshake before any
//! application data flows: the remote agent lists the client actions it
//! wants, and the client answers with exactly one processed action per
//! request, in order. Only the `SessionType` action is supported; anything
//! else is echoed back with an unset status, which the agent treats as
//! unsupported.

use crate::payload::{
    ActionStatus, HandshakeResponsePayload, ProcessedClientAction, RequestedClientAction,
};

/// Version this client reports in handshake responses.
///
/// The remote agent gates some features on the reported version (stream
/// muxing needs at least 1.1.70); this client stays below that line.
pub const CLIENT_VERSION: &str = "0.0.1";

/// Build the handshake response for a set of requested client actions.
///
/// Pure mapping with no side effects; it cannot fail.
pub fn build_handshake_response(actions: &[RequestedClientAction]) -> HandshakeResponsePayload {
    let processed = actions
        .iter()
        .map(|action| {
            let status = if action.action_type.is_session_type() {
                ActionStatus::Success
            } else {
                ActionStatus::Unset
            };

            ProcessedClientAction {
                action_type: action.action_type.clone(),
                action_status: status,
                error: None,
            }
        })
        .collect();

    HandshakeResponsePayload {
        client_version: CLIENT_VERSION.to_string(),
        processed_client_actions: processed,
    }
}
