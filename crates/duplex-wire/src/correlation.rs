//! Request/reply correlation by listener token.
//!
//! Each session owns a [`ListenerTable`]. A caller registers a one-shot
//! listener under the request's token before the request is transmitted; the
//! first inbound envelope that carries the same token and the expected opcode
//! is handed to the caller and the listener is removed in the same step.
//! Closing the table fails every outstanding wait with
//! [`WireError::SessionClosed`].

use crate::error::WireError;
use crate::message::Envelope;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{oneshot, watch};
use tracing::debug;

struct PendingReply {
    /// Distinguishes successive registrations of the same token.
    seq: u64,
    opcode: String,
    reply_tx: oneshot::Sender<Envelope>,
}

/// One-shot reply listeners keyed by correlation token.
pub struct ListenerTable {
    pending: DashMap<String, PendingReply>,
    next_seq: AtomicU64,
    closed: watch::Sender<bool>,
}

impl ListenerTable {
    pub fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            pending: DashMap::new(),
            next_seq: AtomicU64::new(0),
            closed,
        }
    }

    /// Register a listener for a reply with `opcode` tagged with `token`.
    ///
    /// The returned [`ReplyWaiter`] unregisters the listener when dropped, so
    /// an abandoned wait never leaves a stale entry behind.
    pub fn register(&self, token: &str, opcode: &str) -> Result<ReplyWaiter<'_>, WireError> {
        if self.is_closed() {
            return Err(WireError::SessionClosed);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        match self.pending.entry(token.to_string()) {
            Entry::Occupied(_) => return Err(WireError::ListenerInUse(token.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(PendingReply {
                    seq,
                    opcode: opcode.to_string(),
                    reply_tx,
                });
            }
        }

        Ok(ReplyWaiter {
            table: self,
            token: token.to_string(),
            seq,
            reply_rx,
            closed: self.closed.subscribe(),
        })
    }

    /// Hand `envelope` to the listener registered under its token.
    ///
    /// The envelope is given back when no listener matches both its token and
    /// its opcode, so it can continue through normal dispatch.
    pub fn fire(&self, envelope: Envelope) -> Result<(), Envelope> {
        let Some(token) = envelope.listener_token().map(str::to_owned) else {
            return Err(envelope);
        };

        match self
            .pending
            .remove_if(&token, |_, pending| pending.opcode == envelope.opcode)
        {
            Some((_, pending)) => {
                if pending.reply_tx.send(envelope).is_err() {
                    debug!(token = %token, "Reply arrived after its waiter went away");
                }
                Ok(())
            }
            None => Err(envelope),
        }
    }

    pub fn is_pending(&self, token: &str) -> bool {
        self.pending.contains_key(token)
    }

    /// Number of outstanding listeners.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Fail every outstanding wait and refuse new registrations.
    pub fn close(&self) {
        self.closed.send_replace(true);
        let abandoned = self.pending.len();
        self.pending.clear();
        if abandoned > 0 {
            debug!(abandoned, "Listener table closed with pending replies");
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

impl Default for ListenerTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered one-shot listener awaiting its reply.
pub struct ReplyWaiter<'a> {
    table: &'a ListenerTable,
    token: String,
    seq: u64,
    reply_rx: oneshot::Receiver<Envelope>,
    closed: watch::Receiver<bool>,
}

impl ReplyWaiter<'_> {
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Wait for the reply, or for the owning session to close.
    pub async fn wait(mut self) -> Result<Envelope, WireError> {
        let closed = &mut self.closed;
        let session_closed = async move {
            let _ = closed.wait_for(|closed| *closed).await;
        };

        tokio::select! {
            biased;
            reply = &mut self.reply_rx => reply.map_err(|_| WireError::SessionClosed),
            _ = session_closed => Err(WireError::SessionClosed),
        }
    }
}

impl Drop for ReplyWaiter<'_> {
    fn drop(&mut self) {
        let seq = self.seq;
        self.table
            .pending
            .remove_if(&self.token, |_, pending| pending.seq == seq);
    }
}
