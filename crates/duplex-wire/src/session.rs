//! Per-connection peer state.

use crate::codec;
use crate::correlation::ListenerTable;
use crate::dispatch::{self, Dispatch, DropReason};
use crate::error::{WireError, WireResult};
use crate::message::Envelope;
use crate::negotiate::NegotiationState;
use crate::node::Node;
use crate::codec::MAX_FRAME_SIZE;
use crate::transport::{ConnectionId, Transport};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use duplex_types::CapabilitySet;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, RwLock, Weak};
use tracing::{debug, warn};

/// One live connection to a remote peer.
///
/// Owns the peer's advertised capabilities, its pending reply listeners, a
/// private key/value store for application handlers, and the write lock that
/// keeps outbound frames on this connection strictly ordered.
pub struct PeerSession {
    peer_id: String,
    connection: ConnectionId,
    node: Weak<Node>,
    transport: Arc<dyn Transport>,
    write_lock: tokio::sync::Mutex<()>,
    capabilities: RwLock<CapabilitySet>,
    state: RwLock<NegotiationState>,
    listeners: ListenerTable,
    store: DashMap<String, Value>,
    opened_at: DateTime<Utc>,
}

impl PeerSession {
    pub(crate) fn new(node: Weak<Node>, transport: Arc<dyn Transport>) -> Self {
        Self {
            peer_id: transport.peer_id().to_string(),
            connection: transport.connection_id(),
            node,
            transport,
            write_lock: tokio::sync::Mutex::new(()),
            capabilities: RwLock::new(CapabilitySet::new()),
            state: RwLock::new(NegotiationState::Connected),
            listeners: ListenerTable::new(),
            store: DashMap::new(),
            opened_at: Utc::now(),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// The connection this session was created for.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection
    }

    /// The owning node, unless it has been dropped.
    pub fn node(&self) -> Option<Arc<Node>> {
        self.node.upgrade()
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Connection metadata supplied by the transport.
    pub fn metadata(&self) -> Option<Value> {
        self.transport.metadata()
    }

    /// Snapshot of the capabilities the peer advertised.
    pub fn capabilities(&self) -> CapabilitySet {
        self.capabilities
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn set_capabilities(&self, capabilities: CapabilitySet) {
        *self.capabilities.write().unwrap_or_else(|e| e.into_inner()) = capabilities;
    }

    pub fn negotiation_state(&self) -> NegotiationState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set_negotiation_state(&self, state: NegotiationState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub fn listeners(&self) -> &ListenerTable {
        &self.listeners
    }

    // --- key store ---

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.store.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.store.get(key).map(|v| v.value().clone())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.store.remove(key).map(|(_, v)| v)
    }

    // --- outbound ---

    /// Encode and transmit `envelope`, logging any failure.
    pub async fn write<P: Serialize>(&self, envelope: &Envelope<P>) {
        if let Err(e) = self.send(envelope).await {
            warn!(peer = %self, opcode = %envelope.opcode, error = %e, "Write failed");
        }
    }

    /// Encode and transmit `envelope`.
    ///
    /// Nothing is sent when encoding fails.
    pub async fn send<P: Serialize>(&self, envelope: &Envelope<P>) -> WireResult<()> {
        let frame = codec::encode(envelope)?;
        debug!(peer = %self, opcode = %envelope.opcode, "Sending envelope");
        self.send_frame(&frame).await
    }

    /// Transmit an already encoded frame under the session write lock.
    pub async fn send_frame(&self, frame: &[u8]) -> WireResult<()> {
        let _guard = self.write_lock.lock().await;
        self.transport.send(frame).await
    }

    /// Send `request` and wait for the reply tagged with its listener token.
    ///
    /// The listener is registered before the request is transmitted. There is
    /// no built-in timeout: the wait ends when a reply with `expected_opcode`
    /// arrives or the session closes. Callers that need a bound should wrap
    /// the call in `tokio::time::timeout`.
    ///
    /// A request that cannot be transmitted fails immediately and leaves no
    /// listener behind.
    pub async fn send_and_await_reply<P: Serialize>(
        self: &Arc<Self>,
        expected_opcode: &str,
        request: &Envelope<P>,
    ) -> WireResult<Envelope> {
        let Some(token) = request.listener_token() else {
            warn!(peer = %self, opcode = %request.opcode, "Correlated request has no listener token");
            return Err(WireError::UnresolvedToken);
        };

        let frame = codec::encode(request)?;
        if frame.len() > MAX_FRAME_SIZE {
            return Err(WireError::FrameTooLarge {
                size: frame.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        let waiter = self.listeners.register(token, expected_opcode)?;

        // The reply slot is already registered, so a reply that races ahead
        // of this send is buffered for the wait below.
        debug!(peer = %self, opcode = %request.opcode, token = %waiter.token(), "Sending request");
        if let Err(e) = self.send_frame(&frame).await {
            warn!(peer = %self, opcode = %request.opcode, token = %waiter.token(), error = %e, "Request send failed");
            return Err(e);
        }

        waiter.wait().await
    }

    // --- inbound ---

    /// Route one decoded envelope through the owning node's dispatch tables.
    pub async fn dispatch(self: &Arc<Self>, envelope: Envelope) -> Dispatch {
        match self.node() {
            Some(node) => dispatch::resolve(&node, self, envelope).await,
            None => Dispatch::Dropped(DropReason::Detached),
        }
    }

    // --- lifecycle ---

    /// Fail every pending reply wait. Called when the connection goes away.
    pub(crate) fn close(&self) {
        self.listeners.close();
    }

    pub fn is_closed(&self) -> bool {
        self.listeners.is_closed()
    }

    /// Ask the transport to tear the connection down.
    pub async fn disconnect(&self) -> WireResult<()> {
        self.transport.close().await
    }
}

impl fmt::Display for PeerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.peer_id)
    }
}

impl fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSession")
            .field("peer_id", &self.peer_id)
            .field("state", &self.negotiation_state())
            .field("capabilities", &self.capabilities())
            .field("pending_replies", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use serde_json::json;

    fn detached(peer_id: &str) -> (Arc<PeerSession>, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::detached(peer_id));
        let session = Arc::new(PeerSession::new(Weak::new(), transport.clone()));
        (session, transport)
    }

    #[test]
    fn test_display_is_bracketed_id() {
        let (session, transport) = detached("alice");
        assert_eq!(session.connection_id(), transport.connection_id());
        assert_eq!(session.to_string(), "[alice]");
        assert_eq!(session.negotiation_state(), NegotiationState::Connected);
        assert!(session.capabilities().is_empty());
    }

    #[test]
    fn test_key_store() {
        let (session, _) = detached("alice");
        assert_eq!(session.get("room"), None);
        session.set("room", json!("lobby"));
        assert_eq!(session.get("room"), Some(json!("lobby")));
        assert_eq!(session.remove("room"), Some(json!("lobby")));
        assert_eq!(session.get("room"), None);
    }

    #[tokio::test]
    async fn test_write_sends_encoded_frame() {
        let (session, transport) = detached("alice");
        session.write(&Envelope::new("CHAT", json!({"text": "hi"}))).await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        let env = codec::decode(&sent[0]).unwrap();
        assert_eq!(env.opcode, "CHAT");
        assert_eq!(env.payload["text"], "hi");
    }

    #[tokio::test]
    async fn test_await_without_token_sends_nothing() {
        let (session, transport) = detached("alice");
        let request = Envelope::new("PING", json!({"t1": 1}));
        let err = session.send_and_await_reply("PONG", &request).await.unwrap_err();
        assert!(matches!(err, WireError::UnresolvedToken));
        assert!(transport.sent().is_empty());
    }

    struct FailingTransport;

    #[async_trait::async_trait]
    impl Transport for FailingTransport {
        fn peer_id(&self) -> &str {
            "bob"
        }

        fn connection_id(&self) -> ConnectionId {
            0
        }

        async fn send(&self, _frame: &[u8]) -> WireResult<()> {
            Err(WireError::Transport("link down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failed_request_send_releases_listener() {
        let session = Arc::new(PeerSession::new(Weak::new(), Arc::new(FailingTransport)));
        let request = Envelope::new("PING", json!({"t1": 1})).with_listener("tok1");

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            session.send_and_await_reply("PONG", &request),
        )
        .await
        .expect("a request that was never sent must not wait");
        assert!(matches!(result, Err(WireError::Transport(_))));
        assert!(!session.listeners().is_pending("tok1"));
    }

    #[tokio::test]
    async fn test_oversized_request_is_refused_before_registering() {
        let (session, transport) = detached("alice");
        let request = Envelope::new("BLOB", json!("a".repeat(MAX_FRAME_SIZE))).with_listener("big");

        let err = session.send_and_await_reply("ACK", &request).await.unwrap_err();
        assert!(matches!(err, WireError::FrameTooLarge { .. }));
        assert!(!session.listeners().is_pending("big"));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_detached_session_drops_inbound() {
        let (session, _) = detached("alice");
        let outcome = session.dispatch(Envelope::new("CHAT", json!(null))).await;
        assert_eq!(outcome, Dispatch::Dropped(DropReason::Detached));
    }

    #[tokio::test]
    async fn test_close_fails_pending_request() {
        let (session, _) = detached("alice");
        let waiting = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                let request = Envelope::new("PING", json!({"t1": 1})).with_listener("tok1");
                session.send_and_await_reply("PONG", &request).await
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        session.close();

        let result = tokio::time::timeout(std::time::Duration::from_secs(1), waiting)
            .await
            .expect("waiter should not hang")
            .unwrap();
        assert!(matches!(result, Err(WireError::SessionClosed)));
    }
}
