//! Envelope dispatch.
//!
//! An inbound envelope is routed to at most one handler, in priority order:
//!
//! 1. **Remapped** bindings, which replace built-in handling for an opcode
//! 2. **Listeners** waiting on the envelope's correlation token
//! 3. **Built-ins**: `NEGOTIATE` and `PING`
//! 4. **Application** bindings
//!
//! Envelopes whose TTL runs out, and envelopes for capability-gated bindings
//! the peer is not entitled to, are dropped before any handler runs.

use crate::error::WireError;
use crate::message::{Envelope, Ping, Pong, NEGOTIATE, PING, PONG};
use crate::negotiate;
use crate::node::Node;
use crate::session::PeerSession;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Handles envelopes for one opcode.
///
/// Implemented for any `Fn(Arc<PeerSession>, Envelope) -> impl Future` closure.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, session: Arc<PeerSession>, envelope: Envelope);
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Arc<PeerSession>, Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, session: Arc<PeerSession>, envelope: Envelope) {
        (self)(session, envelope).await
    }
}

/// A handler plus the capabilities a peer must hold to reach it.
#[derive(Clone)]
pub struct Binding {
    handler: Arc<dyn Handler>,
    required: Vec<String>,
}

impl Binding {
    pub fn required_capabilities(&self) -> &[String] {
        &self.required
    }
}

/// Opcode → binding map with first-registration-wins semantics.
pub struct BindingTable {
    /// Table name used in log lines ("remapped", "application").
    kind: &'static str,
    bindings: DashMap<String, Binding>,
}

impl BindingTable {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            bindings: DashMap::new(),
        }
    }

    /// Register `handler` for `opcode`.
    ///
    /// An existing binding is never replaced: the call logs and returns
    /// [`WireError::DuplicateBinding`], leaving the original in place.
    pub fn insert(
        &self,
        opcode: &str,
        handler: Arc<dyn Handler>,
        required: &[&str],
    ) -> Result<(), WireError> {
        match self.bindings.entry(opcode.to_string()) {
            Entry::Occupied(_) => {
                warn!(opcode = %opcode, table = self.kind, "Handler for opcode already exists");
                Err(WireError::DuplicateBinding {
                    opcode: opcode.to_string(),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(Binding {
                    handler,
                    required: required.iter().map(|s| s.to_string()).collect(),
                });
                debug!(opcode = %opcode, table = self.kind, "Bound handler");
                Ok(())
            }
        }
    }

    /// Remove the binding for `opcode`. Returns whether one existed.
    pub fn remove(&self, opcode: &str) -> bool {
        self.bindings.remove(opcode).is_some()
    }

    /// Snapshot of the binding for `opcode`.
    ///
    /// Returned by value so no shard lock is held while the handler runs.
    pub fn get(&self, opcode: &str) -> Option<Binding> {
        self.bindings.get(opcode).map(|b| b.value().clone())
    }

    pub fn contains(&self, opcode: &str) -> bool {
        self.bindings.contains_key(opcode)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// How an inbound envelope was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A remapped handler ran.
    Remapped,
    /// A pending listener received the envelope.
    Listener,
    /// A built-in (`NEGOTIATE` or `PING`) handled the envelope.
    Builtin,
    /// An application handler ran.
    Handler,
    /// Nothing is bound to the opcode.
    Ignored,
    /// The envelope was discarded by policy.
    Dropped(DropReason),
}

/// Why an envelope was discarded without reaching a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The hop budget ran out.
    ExpiredTtl,
    /// The peer lacks a capability the binding requires.
    MissingCapability(String),
    /// A built-in could not decode the payload.
    InvalidPayload,
    /// The owning node no longer exists.
    Detached,
}

/// Resolve `envelope` and run the single handler it selects.
pub(crate) async fn resolve(node: &Node, session: &Arc<PeerSession>, mut envelope: Envelope) -> Dispatch {
    if let Some(ttl) = envelope.ttl {
        let remaining = ttl.saturating_sub(1);
        if remaining < 0 {
            debug!(peer = %session, opcode = %envelope.opcode, "Dropped envelope: TTL expired");
            return Dispatch::Dropped(DropReason::ExpiredTtl);
        }
        envelope.ttl = Some(remaining);
    }

    if let Some(binding) = node.remapped().get(&envelope.opcode) {
        if let Some(reason) = gate(session, &binding, &envelope) {
            return Dispatch::Dropped(reason);
        }
        binding.handler.handle(Arc::clone(session), envelope).await;
        return Dispatch::Remapped;
    }

    let envelope = match session.listeners().fire(envelope) {
        Ok(()) => return Dispatch::Listener,
        Err(unclaimed) => unclaimed,
    };

    match envelope.opcode.as_str() {
        NEGOTIATE => return negotiate::handle_negotiate(node, session, envelope).await,
        PING => return handle_ping(node, session, envelope).await,
        _ => {}
    }

    if let Some(binding) = node.handlers().get(&envelope.opcode) {
        if let Some(reason) = gate(session, &binding, &envelope) {
            return Dispatch::Dropped(reason);
        }
        binding.handler.handle(Arc::clone(session), envelope).await;
        return Dispatch::Handler;
    }

    debug!(peer = %session, opcode = %envelope.opcode, "No handler for opcode");
    Dispatch::Ignored
}

/// Check that the peer holds every capability `binding` requires.
fn gate(session: &PeerSession, binding: &Binding, envelope: &Envelope) -> Option<DropReason> {
    if binding.required.is_empty() {
        return None;
    }
    let capabilities = session.capabilities();
    let missing = capabilities.first_missing(&binding.required)?;
    warn!(
        peer = %session,
        opcode = %envelope.opcode,
        capability = %missing,
        "Dropped envelope: missing required capability"
    );
    Some(DropReason::MissingCapability(missing.to_string()))
}

/// Answer a `PING` with a `PONG` carrying both timestamps.
async fn handle_ping(node: &Node, session: &PeerSession, envelope: Envelope) -> Dispatch {
    let ping: Ping = match envelope.payload_as() {
        Ok(ping) => ping,
        Err(e) => {
            warn!(peer = %session, error = %e, "Dropped PING");
            return Dispatch::Dropped(DropReason::InvalidPayload);
        }
    };

    let pong = Envelope::new(
        PONG,
        Pong {
            t1: ping.t1,
            t2: node.clock().now_millis(),
        },
    )
    .with_ttl(1)
    .in_reply_to(&envelope);

    session.write(&pong).await;
    Dispatch::Builtin
}
