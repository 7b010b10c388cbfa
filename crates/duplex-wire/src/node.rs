//! The local node: live sessions, dispatch tables, lifecycle hooks.

use crate::codec;
use crate::dispatch::{BindingTable, Dispatch, Handler};
use crate::error::WireResult;
use crate::message::{Envelope, Ping, Pong, PING, PONG};
use crate::negotiate::NegotiationArgs;
use crate::registry::SessionRegistry;
use crate::session::PeerSession;
use crate::transport::{ConnectionId, Transport, TransportEvent};
use duplex_types::NodeConfig;
use serde::Serialize;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Source of wall-clock time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync + 'static {
    fn now_millis(&self) -> i64;
}

/// [`Clock`] backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Callback invoked with the affected session.
pub type SessionHook = Arc<dyn Fn(&Arc<PeerSession>) + Send + Sync>;

/// Optional lifecycle callbacks supplied when the node is built.
#[derive(Clone, Default)]
pub struct Hooks {
    on_open: Option<SessionHook>,
    on_close: Option<SessionHook>,
    after_negotiation: Option<SessionHook>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs after a new session is registered.
    pub fn on_open(mut self, hook: impl Fn(&Arc<PeerSession>) + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(hook));
        self
    }

    /// Runs after a session is removed from the registry.
    pub fn on_close(mut self, hook: impl Fn(&Arc<PeerSession>) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(hook));
        self
    }

    /// Runs every time a peer's capabilities are (re)applied.
    pub fn after_negotiation(
        mut self,
        hook: impl Fn(&Arc<PeerSession>) + Send + Sync + 'static,
    ) -> Self {
        self.after_negotiation = Some(Arc::new(hook));
        self
    }

    pub(crate) fn fire_open(&self, session: &Arc<PeerSession>) {
        if let Some(hook) = &self.on_open {
            hook(session);
        }
    }

    pub(crate) fn fire_close(&self, session: &Arc<PeerSession>) {
        if let Some(hook) = &self.on_close {
            hook(session);
        }
    }

    pub(crate) fn fire_after_negotiation(&self, session: &Arc<PeerSession>) {
        if let Some(hook) = &self.after_negotiation {
            hook(session);
        }
    }
}

/// Result of a [`Node::ping`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundTrip {
    /// Milliseconds between sending the `PING` and reading the `PONG`.
    pub rtt_ms: i64,
    pub pong: Pong,
}

/// Builder for [`Node`].
pub struct NodeBuilder {
    config: NodeConfig,
    hooks: Hooks,
    clock: Arc<dyn Clock>,
}

impl NodeBuilder {
    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Arc<Node> {
        Arc::new_cyclic(|this| Node {
            config: self.config,
            sessions: SessionRegistry::new(),
            remapped: BindingTable::new("remapped"),
            handlers: BindingTable::new("application"),
            hooks: self.hooks,
            clock: self.clock,
            this: this.clone(),
        })
    }
}

/// A peer in the overlay.
///
/// Owns the registry of live sessions and the two node-scope dispatch tables
/// shared by all of them. Connections arrive as [`TransportEvent`]s, either
/// one at a time through [`Node::handle_event`] or from a queue via
/// [`Node::run`].
pub struct Node {
    config: NodeConfig,
    sessions: SessionRegistry,
    remapped: BindingTable,
    handlers: BindingTable,
    hooks: Hooks,
    clock: Arc<dyn Clock>,
    this: Weak<Node>,
}

impl Node {
    pub fn builder(config: NodeConfig) -> NodeBuilder {
        NodeBuilder {
            config,
            hooks: Hooks::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// A node with no hooks and the system clock.
    pub fn new(config: NodeConfig) -> Arc<Self> {
        Self::builder(config).build()
    }

    pub fn id(&self) -> &str {
        &self.config.node_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn session(&self, peer_id: &str) -> Option<Arc<PeerSession>> {
        self.sessions.get(peer_id)
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub(crate) fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub(crate) fn remapped(&self) -> &BindingTable {
        &self.remapped
    }

    pub(crate) fn handlers(&self) -> &BindingTable {
        &self.handlers
    }

    /// What this node advertises in `NEGOTIATE`.
    pub fn negotiation_args(&self) -> NegotiationArgs {
        NegotiationArgs::from_config(&self.config)
    }

    // --- bindings ---

    /// Register an application handler for `opcode`.
    ///
    /// Peers must hold every capability in `required` to reach it. The first
    /// registration for an opcode wins; later ones fail with
    /// [`crate::WireError::DuplicateBinding`].
    pub fn bind(&self, opcode: &str, handler: impl Handler, required: &[&str]) -> WireResult<()> {
        self.handlers.insert(opcode, Arc::new(handler), required)
    }

    pub fn unbind(&self, opcode: &str) -> bool {
        self.handlers.remove(opcode)
    }

    /// Register a handler that takes precedence over listeners, built-ins and
    /// application handlers for `opcode`.
    pub fn remap(&self, opcode: &str, handler: impl Handler, required: &[&str]) -> WireResult<()> {
        self.remapped.insert(opcode, Arc::new(handler), required)
    }

    pub fn unmap(&self, opcode: &str) -> bool {
        self.remapped.remove(opcode)
    }

    // --- outbound ---

    /// Send `envelope` to each of `sessions` concurrently.
    ///
    /// The envelope is encoded once; each send runs in its own task so a slow
    /// peer does not hold up the others. Returns the number of sends issued.
    pub fn broadcast<P: Serialize>(
        &self,
        envelope: &Envelope<P>,
        sessions: Vec<Arc<PeerSession>>,
    ) -> WireResult<usize> {
        let frame = match codec::encode(envelope) {
            Ok(frame) => Arc::new(frame),
            Err(e) => {
                warn!(opcode = %envelope.opcode, error = %e, "Broadcast aborted");
                return Err(e);
            }
        };

        let count = sessions.len();
        for session in sessions {
            let frame = Arc::clone(&frame);
            tokio::spawn(async move {
                if let Err(e) = session.send_frame(&frame).await {
                    warn!(peer = %session, error = %e, "Broadcast send failed");
                }
            });
        }
        debug!(opcode = %envelope.opcode, peers = count, "Broadcast");
        Ok(count)
    }

    /// Broadcast to every live session except the listed peers.
    pub fn broadcast_all<P: Serialize>(
        &self,
        envelope: &Envelope<P>,
        exclude: &[&str],
    ) -> WireResult<usize> {
        self.broadcast(envelope, self.sessions.except(exclude))
    }

    /// Measure the round trip to `session` with the built-in `PING`.
    pub async fn ping(&self, session: &Arc<PeerSession>) -> WireResult<RoundTrip> {
        let t1 = self.clock.now_millis();
        let request = Envelope::new(PING, Ping { t1 })
            .with_ttl(1)
            .with_listener(uuid::Uuid::new_v4().to_string());

        let reply = session.send_and_await_reply(PONG, &request).await?;
        let pong: Pong = reply.payload_as()?;
        Ok(RoundTrip {
            rtt_ms: self.clock.now_millis() - pong.t1,
            pong,
        })
    }

    // --- transport events ---

    /// A connection opened. Registers and returns its session.
    ///
    /// A session already registered for the same peer is replaced: its
    /// pending waits fail and its connection is torn down in the background.
    /// Must be called from within a Tokio runtime.
    pub fn on_connect(&self, transport: Arc<dyn Transport>) -> Arc<PeerSession> {
        let session = Arc::new(PeerSession::new(self.this.clone(), transport));
        match session.metadata() {
            Some(metadata) => info!(peer = %session, %metadata, "Peer connected"),
            None => info!(peer = %session, "Peer connected"),
        }

        if let Some(replaced) = self.sessions.insert(Arc::clone(&session)) {
            info!(
                peer = %replaced,
                old = replaced.connection_id(),
                new = session.connection_id(),
                "Replacing existing session"
            );
            replaced.close();
            self.hooks.fire_close(&replaced);
            tokio::spawn(async move {
                if let Err(e) = replaced.disconnect().await {
                    debug!(peer = %replaced, error = %e, "Closing replaced connection failed");
                }
            });
        }
        self.hooks.fire_open(&session);
        session
    }

    /// A frame arrived. Decodes it and dispatches it on its own task.
    ///
    /// Frames from a connection other than the session's own are discarded.
    pub fn on_data(&self, peer_id: &str, connection: ConnectionId, frame: &[u8]) {
        let Some(session) = self.sessions.get(peer_id) else {
            warn!(peer = %peer_id, "Data from unknown peer");
            return;
        };
        if session.connection_id() != connection {
            debug!(peer = %session, connection, "Discarded frame from superseded connection");
            return;
        }

        let envelope = match codec::decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(peer = %session, error = %e, "Discarded inbound frame");
                return;
            }
        };
        debug!(peer = %session, opcode = %envelope.opcode, "Received envelope");

        tokio::spawn(async move {
            session.dispatch(envelope).await;
        });
    }

    /// Decode and dispatch one frame inline, returning how it was resolved.
    pub async fn handle_frame(&self, session: &Arc<PeerSession>, frame: &[u8]) -> WireResult<Dispatch> {
        let envelope = codec::decode(frame)?;
        Ok(session.dispatch(envelope).await)
    }

    /// A connection closed. Removes its session and fails pending waits.
    ///
    /// Only the connection that owns the registered session can remove it.
    pub fn on_disconnect(&self, peer_id: &str, connection: ConnectionId) {
        match self.sessions.remove_connection(peer_id, connection) {
            Some(session) => {
                let connected_for = chrono::Utc::now() - session.opened_at();
                info!(
                    peer = %session,
                    connected_secs = connected_for.num_seconds(),
                    "Peer disconnected"
                );
                session.close();
                self.hooks.fire_close(&session);
            }
            None => debug!(peer = %peer_id, connection, "Disconnect for unknown or superseded connection"),
        }
    }

    pub fn on_error(&self, peer_id: Option<&str>, info: &str) {
        match peer_id {
            Some(peer_id) => warn!(peer = %peer_id, error = %info, "Transport error"),
            None => warn!(error = %info, "Transport error"),
        }
    }

    pub fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected(transport) => {
                self.on_connect(transport);
            }
            TransportEvent::Data {
                peer_id,
                connection,
                frame,
            } => self.on_data(&peer_id, connection, &frame),
            TransportEvent::Disconnected {
                peer_id,
                connection,
            } => self.on_disconnect(&peer_id, connection),
            TransportEvent::Error { peer_id, info } => self.on_error(peer_id.as_deref(), &info),
        }
    }

    /// Consume transport events until the queue closes or shutdown is signalled.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<TransportEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(node = %self.id(), "Node running");
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.shutdown().await;
    }

    /// Close every session and its transport.
    pub async fn shutdown(&self) {
        let sessions = self.sessions.drain();
        info!(node = %self.id(), sessions = sessions.len(), "Node shutting down");
        for session in sessions {
            session.close();
            self.hooks.fire_close(&session);
            if let Err(e) = session.disconnect().await {
                debug!(peer = %session, error = %e, "Disconnect failed");
            }
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        for session in self.sessions.drain() {
            session.close();
        }
    }
}
