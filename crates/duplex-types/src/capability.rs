//! Capability tokens advertised by peers.
//!
//! A peer's capability set starts empty when its connection opens and is
//! replaced wholesale every time the peer negotiates. Capability-gated
//! handlers only run for peers holding every token they require.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The peer bridges traffic to another overlay.
pub const BRIDGE: &str = "bridge";
/// The peer relays broadcasts on behalf of others.
pub const RELAY: &str = "relay";
/// The peer is a discovery server.
pub const DISCOVERY: &str = "discovery";

/// An ordered set of capability tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<String>);

impl CapabilitySet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Build the set a peer advertises through its negotiation flags.
    pub fn from_flags(is_bridge: bool, is_relay: bool, is_discovery: bool) -> Self {
        let mut set = Self::new();
        if is_bridge {
            set.insert(BRIDGE);
        }
        if is_relay {
            set.insert(RELAY);
        }
        if is_discovery {
            set.insert(DISCOVERY);
        }
        set
    }

    /// Add a token. Returns `false` if it was already present.
    pub fn insert(&mut self, token: impl Into<String>) -> bool {
        self.0.insert(token.into())
    }

    pub fn contains(&self, token: &str) -> bool {
        self.0.contains(token)
    }

    /// The first required token this set does not hold, if any.
    ///
    /// Access is granted only when this returns `None`.
    pub fn first_missing<'a>(&self, required: &'a [String]) -> Option<&'a str> {
        required
            .iter()
            .map(String::as_str)
            .find(|token| !self.contains(token))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tokens: Vec<&str> = self.iter().collect();
        write!(f, "{}", tokens.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_flags() {
        let set = CapabilitySet::from_flags(true, false, true);
        assert!(set.contains(BRIDGE));
        assert!(!set.contains(RELAY));
        assert!(set.contains(DISCOVERY));
        assert_eq!(set.len(), 2);

        assert!(CapabilitySet::from_flags(false, false, false).is_empty());
    }

    #[test]
    fn test_first_missing_requires_every_token() {
        let set: CapabilitySet = ["bridge", "relay"].into_iter().collect();

        let held = vec!["bridge".to_string(), "relay".to_string()];
        assert_eq!(set.first_missing(&held), None);

        let partial = vec!["bridge".to_string(), "discovery".to_string()];
        assert_eq!(set.first_missing(&partial), Some("discovery"));

        assert_eq!(set.first_missing(&[]), None);
    }

    #[test]
    fn test_empty_set_misses_everything() {
        let set = CapabilitySet::new();
        let required = vec!["relay".to_string()];
        assert_eq!(set.first_missing(&required), Some("relay"));
    }

    #[test]
    fn test_display_is_sorted() {
        let set: CapabilitySet = ["relay", "bridge"].into_iter().collect();
        assert_eq!(set.to_string(), "bridge, relay");
    }

    #[test]
    fn test_serializes_as_list() {
        let set = CapabilitySet::from_flags(true, true, false);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["bridge","relay"]"#);
        let back: CapabilitySet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }
}
