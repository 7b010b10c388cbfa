//! Capability negotiation.
//!
//! Either side may send `NEGOTIATE` at any time after a connection opens.
//! The receiver replaces the sender's capability set with the flags it
//! advertised, answers with its own advertisement and fires the node's
//! `after_negotiation` hook. Negotiating again simply overwrites.

use crate::dispatch::{Dispatch, DropReason};
use crate::error::{WireError, WireResult};
use crate::message::{Envelope, NEGOTIATE};
use crate::node::Node;
use crate::session::PeerSession;
use duplex_types::serde_compat::null_as_default;
use duplex_types::{CapabilitySet, NodeConfig, VersionInfo};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// `NEGOTIATE` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationArgs {
    pub version: VersionInfo,
    pub spec_version: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub plugins: Vec<String>,
    pub is_bridge: bool,
    pub is_relay: bool,
    pub is_discovery: bool,
}

impl NegotiationArgs {
    /// The advertisement this node sends about itself.
    pub fn from_config(config: &NodeConfig) -> Self {
        Self {
            version: config.version.clone(),
            spec_version: config.spec_version,
            plugins: config.plugins.clone(),
            is_bridge: config.is_bridge,
            is_relay: config.is_relay,
            is_discovery: config.is_discovery,
        }
    }

    /// The capability set the sender is entitled to.
    pub fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::from_flags(self.is_bridge, self.is_relay, self.is_discovery)
    }
}

impl Default for NegotiationArgs {
    fn default() -> Self {
        Self {
            version: VersionInfo::current(),
            spec_version: 0,
            plugins: Vec::new(),
            is_bridge: false,
            is_relay: false,
            is_discovery: false,
        }
    }
}

/// Handshake progress for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// The connection is open; no advertisement has been exchanged.
    Connected,
    /// This side sent `NEGOTIATE` and is waiting for the answer.
    Negotiating,
    /// Capabilities have been applied at least once.
    Negotiated,
}

/// Built-in `NEGOTIATE` handler.
pub(crate) async fn handle_negotiate(
    node: &Node,
    session: &Arc<PeerSession>,
    envelope: Envelope,
) -> Dispatch {
    let args: NegotiationArgs = match envelope.payload_as() {
        Ok(args) => args,
        Err(e) => {
            warn!(peer = %session, error = %e, "Dropped NEGOTIATE");
            return Dispatch::Dropped(DropReason::InvalidPayload);
        }
    };

    apply(session, &args);

    let reply = Envelope::new(NEGOTIATE, node.negotiation_args())
        .with_ttl(1)
        .in_reply_to(&envelope);
    session.write(&reply).await;

    node.hooks().fire_after_negotiation(session);
    Dispatch::Builtin
}

/// Negotiate with the peer behind `session` as the initiating side.
///
/// The advertisement goes out under a fresh listener token so the peer's
/// reply is claimed here and never re-enters the built-in handler. Returns
/// the capabilities the peer advertised.
pub async fn negotiate(session: &Arc<PeerSession>) -> WireResult<CapabilitySet> {
    let node = session.node().ok_or(WireError::SessionClosed)?;
    let request = Envelope::new(NEGOTIATE, node.negotiation_args())
        .with_ttl(1)
        .with_listener(uuid::Uuid::new_v4().to_string());

    session.set_negotiation_state(NegotiationState::Negotiating);
    let reply = session.send_and_await_reply(NEGOTIATE, &request).await?;
    let args: NegotiationArgs = reply.payload_as()?;

    apply(session, &args);
    node.hooks().fire_after_negotiation(session);
    Ok(args.capabilities())
}

/// Replace the peer's capability set with what it advertised.
fn apply(session: &PeerSession, args: &NegotiationArgs) {
    let capabilities = args.capabilities();
    info!(
        peer = %session,
        version = %args.version,
        spec_version = args.spec_version,
        capabilities = %capabilities,
        "Peer negotiated"
    );
    session.set_capabilities(capabilities);
    session.set_negotiation_state(NegotiationState::Negotiated);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_wire_shape() {
        let args = NegotiationArgs {
            version: VersionInfo {
                kind: "Go".to_string(),
                major: 1,
                minor: 0,
                patch: 1,
            },
            spec_version: 2,
            plugins: vec!["chat".to_string()],
            is_bridge: true,
            is_relay: false,
            is_discovery: true,
        };
        let value = serde_json::to_value(&args).unwrap();
        assert_eq!(
            value,
            json!({
                "version": {"type": "Go", "major": 1, "minor": 0, "patch": 1},
                "spec_version": 2,
                "plugins": ["chat"],
                "is_bridge": true,
                "is_relay": false,
                "is_discovery": true
            })
        );
    }

    #[test]
    fn test_null_plugins_and_missing_flags() {
        let args: NegotiationArgs =
            serde_json::from_value(json!({"plugins": null, "is_relay": true})).unwrap();
        assert!(args.plugins.is_empty());
        assert!(!args.is_bridge);
        assert!(args.is_relay);
    }

    #[test]
    fn test_capabilities_follow_flags() {
        let args = NegotiationArgs {
            is_bridge: true,
            is_discovery: true,
            ..NegotiationArgs::default()
        };
        let caps = args.capabilities();
        assert!(caps.contains("bridge"));
        assert!(caps.contains("discovery"));
        assert!(!caps.contains("relay"));
    }

    #[test]
    fn test_from_config() {
        let config = NodeConfig {
            is_relay: true,
            spec_version: 3,
            plugins: vec!["files".to_string()],
            ..NodeConfig::default()
        };
        let args = NegotiationArgs::from_config(&config);
        assert!(args.is_relay);
        assert_eq!(args.spec_version, 3);
        assert_eq!(args.plugins, ["files"]);
        assert_eq!(args.version, config.version);
    }
}
