//! duplex wire protocol: envelope dispatch and capability negotiation.
//!
//! Nodes exchange opcode-tagged JSON envelopes over connections supplied by a
//! transport provider. This crate decodes inbound envelopes, routes each to
//! exactly one handler, negotiates capabilities with new peers and correlates
//! replies with outstanding requests.
//!
//! ## Architecture
//!
//! - **Envelope / codec**: the wire record and its string-wrapped JSON framing
//! - **Node**: owns live sessions, the remapped and application dispatch
//!   tables, and the lifecycle hooks
//! - **PeerSession**: per-connection capabilities, reply listeners and the
//!   write lock
//! - **Transport**: the provider seam; [`memory`] and [`tcp`] implement it

pub mod codec;
pub mod correlation;
pub mod dispatch;
pub mod error;
pub mod memory;
pub mod message;
pub mod negotiate;
pub mod node;
pub mod registry;
pub mod session;
pub mod tcp;
pub mod transport;

pub use dispatch::{Dispatch, DropReason, Handler};
pub use error::{WireError, WireResult};
pub use message::{Envelope, Ping, Pong, NEGOTIATE, PING, PONG};
pub use negotiate::{negotiate, NegotiationArgs, NegotiationState};
pub use node::{Clock, Hooks, Node, NodeBuilder, RoundTrip, SystemClock};
pub use registry::SessionRegistry;
pub use session::PeerSession;
pub use transport::{ConnectionId, Transport, TransportEvent, EVENT_QUEUE_CAPACITY};
