//! Wire protocol message types.
//!
//! Every message exchanged between peers is an [`Envelope`]: a set of control
//! fields plus an opaque payload whose shape is defined by the opcode.
//! Outbound envelopes carry a typed payload; inbound envelopes carry a raw
//! JSON value that handlers decode on demand with [`Envelope::payload_as`].

use crate::error::WireError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Capability negotiation, handled by the built-in negotiator.
pub const NEGOTIATE: &str = "NEGOTIATE";
/// Latency probe, answered with [`PONG`] by the built-in handler.
pub const PING: &str = "PING";
/// Reply to [`PING`].
pub const PONG: &str = "PONG";

/// A wire protocol message (envelope).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<P = Value> {
    /// Selects how the envelope is handled. Never empty once decoded.
    pub opcode: String,
    /// Peer that produced the envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Peer the envelope is meant for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Remaining hop budget. Absent means the envelope never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
    /// Free-form application identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Correlation token linking a reply to its request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listener: Option<String>,
    #[serde(default)]
    pub payload: P,
}

impl<P> Envelope<P> {
    /// Create an envelope with only an opcode and payload set.
    pub fn new(opcode: impl Into<String>, payload: P) -> Self {
        Self {
            opcode: opcode.into(),
            origin: None,
            target: None,
            ttl: None,
            id: None,
            method: None,
            listener: None,
            payload,
        }
    }

    pub fn with_ttl(mut self, ttl: i64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_listener(mut self, token: impl Into<String>) -> Self {
        self.listener = Some(token.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Carry over the correlation token of `request`, if it has one.
    pub fn in_reply_to<Q>(mut self, request: &Envelope<Q>) -> Self {
        self.listener = request.listener.clone();
        self
    }

    /// The correlation token, if present and non-empty.
    pub fn listener_token(&self) -> Option<&str> {
        self.listener.as_deref().filter(|token| !token.is_empty())
    }
}

impl Envelope<Value> {
    /// Decode the raw payload into the shape expected for this opcode.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, WireError> {
        T::deserialize(&self.payload).map_err(|e| {
            WireError::Decoding(format!("invalid {} payload: {e}", self.opcode))
        })
    }
}

/// `PING` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    /// Sender clock, milliseconds since the Unix epoch.
    pub t1: i64,
}

/// `PONG` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    /// The `t1` of the originating `PING`.
    pub t1: i64,
    /// Responder clock, milliseconds since the Unix epoch.
    pub t2: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_optional_fields_are_omitted() {
        let env = Envelope::new(PING, Ping { t1: 5 });
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json, json!({"opcode": "PING", "payload": {"t1": 5}}));
    }

    #[test]
    fn test_zero_ttl_is_kept_on_the_wire() {
        let env = Envelope::new("CHAT", json!(null)).with_ttl(0);
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["ttl"], 0);
    }

    #[test]
    fn test_missing_payload_is_null() {
        let env: Envelope = serde_json::from_str(r#"{"opcode":"HELLO"}"#).unwrap();
        assert_eq!(env.payload, Value::Null);
        assert_eq!(env.ttl, None);
    }

    #[test]
    fn test_in_reply_to_copies_token() {
        let request = Envelope::new(PING, Ping { t1: 1 }).with_listener("tok1");
        let reply = Envelope::new(PONG, Pong { t1: 1, t2: 2 }).in_reply_to(&request);
        assert_eq!(reply.listener.as_deref(), Some("tok1"));

        let untagged = Envelope::new(PING, Ping { t1: 1 });
        let reply = Envelope::new(PONG, Pong { t1: 1, t2: 2 }).in_reply_to(&untagged);
        assert_eq!(reply.listener, None);
    }

    #[test]
    fn test_empty_listener_is_no_token() {
        let env = Envelope::new(PING, json!({})).with_listener("");
        assert_eq!(env.listener_token(), None);
    }

    #[test]
    fn test_payload_as() {
        let env: Envelope =
            serde_json::from_str(r#"{"opcode":"PING","payload":{"t1":1000}}"#).unwrap();
        let ping: Ping = env.payload_as().unwrap();
        assert_eq!(ping.t1, 1000);

        let err = env.payload_as::<Pong>().unwrap_err();
        assert!(matches!(err, WireError::Decoding(_)));
    }
}
