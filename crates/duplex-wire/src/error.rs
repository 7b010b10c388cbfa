//! Errors from the wire protocol layer.

use thiserror::Error;

/// Errors from the wire protocol layer.
///
/// Policy drops (expired TTL, missing capability) are not errors; they are
/// reported through [`crate::dispatch::Dispatch::Dropped`].
#[derive(Debug, Error)]
pub enum WireError {
    /// The outer layer of a frame was not a JSON string.
    #[error("Framing error: {0}")]
    Framing(String),
    /// The inner text of a frame did not parse into an envelope.
    #[error("Decoding error: {0}")]
    Decoding(String),
    /// An envelope payload could not be represented as JSON.
    #[error("Encoding error: {0}")]
    Encoding(String),
    /// A handler is already registered for this opcode.
    #[error("Handler already bound for opcode {opcode}")]
    DuplicateBinding { opcode: String },
    /// A correlated request was issued without a listener token.
    #[error("Request carries no listener token")]
    UnresolvedToken,
    /// Another request is already waiting on this listener token.
    #[error("Listener token already pending: {0}")]
    ListenerInUse(String),
    /// The session closed before the operation completed.
    #[error("Session closed")]
    SessionClosed,
    /// The transport failed to deliver bytes.
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
}

/// Alias for Result with WireError.
pub type WireResult<T> = Result<T, WireError>;
