//! Node configuration types.
//!
//! Every field has a default, so an empty or partial `config.toml` is valid.

use crate::capability::CapabilitySet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Implementation descriptor exchanged during negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionInfo {
    /// Implementation family (e.g. "Rust", "Go").
    #[serde(rename = "type")]
    pub kind: String,
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl VersionInfo {
    /// The version of this build.
    pub fn current() -> Self {
        let mut parts = env!("CARGO_PKG_VERSION")
            .split('.')
            .map(|p| p.parse::<u32>().unwrap_or(0));
        Self {
            kind: "Rust".to_string(),
            major: parts.next().unwrap_or(0),
            minor: parts.next().unwrap_or(0),
            patch: parts.next().unwrap_or(0),
        }
    }
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} v{}.{}.{}",
            self.kind, self.major, self.minor, self.patch
        )
    }
}

/// Configuration for a single overlay node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This node's peer identifier.
    pub node_id: String,
    /// Address the TCP transport listens on.
    pub listen_addr: SocketAddr,
    /// Peers dialed on startup.
    pub peers: Vec<SocketAddr>,
    /// Protocol dialect revision advertised to peers.
    pub spec_version: u32,
    /// Plugins advertised to peers.
    pub plugins: Vec<String>,
    /// Advertise the "bridge" capability.
    pub is_bridge: bool,
    /// Advertise the "relay" capability.
    pub is_relay: bool,
    /// Advertise the "discovery" capability.
    pub is_discovery: bool,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Implementation version advertised to peers.
    pub version: VersionInfo,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: uuid::Uuid::new_v4().to_string(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 7700)),
            peers: Vec::new(),
            spec_version: 0,
            plugins: Vec::new(),
            is_bridge: false,
            is_relay: false,
            is_discovery: false,
            log_level: "info".to_string(),
            version: VersionInfo::current(),
        }
    }
}

impl NodeConfig {
    /// The capability set this node advertises about itself.
    pub fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::from_flags(self.is_bridge, self.is_relay, self.is_discovery)
    }

    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Render as a TOML document.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// The duplex home directory (`~/.duplex`).
pub fn duplex_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".duplex")
}

/// The default config file location (`~/.duplex/config.toml`).
pub fn default_config_path() -> PathBuf {
    duplex_home().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert!(!config.node_id.is_empty());
        assert_eq!(config.listen_addr.port(), 7700);
        assert!(config.peers.is_empty());
        assert_eq!(config.version.kind, "Rust");
        assert!(config.capabilities().is_empty());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = NodeConfig::from_toml(
            r#"
            node_id = "alpha"
            is_relay = true
            peers = ["10.0.0.2:7700"]
            "#,
        )
        .unwrap();
        assert_eq!(config.node_id, "alpha");
        assert!(config.is_relay);
        assert_eq!(config.peers.len(), 1);
        assert_eq!(config.log_level, "info");
        assert!(config.capabilities().contains("relay"));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = NodeConfig {
            node_id: "beta".to_string(),
            is_bridge: true,
            plugins: vec!["chat".to_string()],
            ..NodeConfig::default()
        };
        let text = config.to_toml().unwrap();
        assert_eq!(NodeConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_version_wire_shape() {
        let version = VersionInfo {
            kind: "Go".to_string(),
            major: 1,
            minor: 0,
            patch: 1,
        };
        let json = serde_json::to_value(&version).unwrap();
        assert_eq!(json["type"], "Go");
        assert_eq!(json["patch"], 1);
        assert_eq!(version.to_string(), "Go v1.0.1");
    }
}
