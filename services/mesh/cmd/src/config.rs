//! Configuration for the meshtalk node.
//!
//! Settings come from a YAML file, then `MESHTALK_*` environment variables,
//! then command-line flags. A missing file falls back to the defaults; an
//! unparsable one is reported to the caller.

use anyhow::{bail, Context, Result};
use meshtalk_storage::StorageMode;
use meshtalk_transport::{UdpMeshConfig, BROADCAST_ADDRESS, DEFAULT_INBOUND_QUEUE};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Durations written as humantime strings ("500ms", "30s")
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Like `duration_str` for optional durations; `~` or absent disables
mod opt_duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| humantime::parse_duration(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Parse a mesh address written as `0x0001` or `1`
pub fn parse_address(raw: &str) -> Result<u16> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => raw.parse::<u16>(),
    };
    parsed.with_context(|| format!("invalid mesh address '{}'", raw))
}

/// Parse a peer written as `<address>=<host:port>`
pub fn parse_peer(raw: &str) -> Result<PeerConfig> {
    let (address, socket) = raw
        .split_once('=')
        .with_context(|| format!("peer '{}' is not <address>=<host:port>", raw))?;
    Ok(PeerConfig {
        address: parse_address(address)?,
        socket: socket
            .trim()
            .parse()
            .with_context(|| format!("invalid peer socket address '{}'", socket))?,
    })
}

/// Local node identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Display name (cut to the wire name width)
    pub name: String,
    /// Mesh address; 0 until provisioned
    pub address: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "node".to_string(),
            address: 0,
        }
    }
}

/// A statically known peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Peer mesh address
    pub address: u16,
    /// Peer UDP socket
    pub socket: SocketAddr,
}

/// UDP transport settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Local bind address
    pub listen: SocketAddr,
    /// Known peers
    pub peers: Vec<PeerConfig>,
    /// Per-datagram send timeout
    #[serde(with = "duration_str")]
    pub send_timeout: Duration,
    /// Inbound queue depth
    pub inbound_queue: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 7000)),
            peers: Vec::new(),
            send_timeout: Duration::from_secs(1),
            inbound_queue: DEFAULT_INBOUND_QUEUE,
        }
    }
}

/// Chat state sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Contact slots
    pub max_contacts: usize,
    /// Lines kept per contact
    pub history_depth: usize,
    /// Bound on waiting for a directory or history lock
    #[serde(with = "duration_str")]
    pub lock_timeout: Duration,
    /// Self-announce period; disabled when absent
    #[serde(with = "opt_duration_str")]
    pub announce_interval: Option<Duration>,
    /// Console refresh cadence
    #[serde(with = "duration_str")]
    pub poll_interval: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_contacts: meshtalk_chat::DEFAULT_CAPACITY,
            history_depth: meshtalk_chat::DEFAULT_DEPTH,
            lock_timeout: Duration::from_millis(100),
            announce_interval: None,
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshTalkConfig {
    /// Local identity
    pub node: NodeConfig,
    /// UDP transport
    pub transport: TransportConfig,
    /// Chat state
    pub chat: ChatConfig,
    /// Contact persistence
    pub storage: StorageMode,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for MeshTalkConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            transport: TransportConfig::default(),
            chat: ChatConfig::default(),
            storage: StorageMode::InMemory,
            log_level: "info".to_string(),
        }
    }
}

impl MeshTalkConfig {
    /// Load from a YAML file, then apply environment overrides.
    ///
    /// A missing file yields the defaults. A file that does not parse is an
    /// error; callers that want to keep going can fall back to
    /// [`MeshTalkConfig::from_env`].
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => serde_yaml::from_str::<Self>(&content)
                .with_context(|| format!("failed to parse config file {:?}", path))?,
            Err(_) => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `MESHTALK_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("MESHTALK_NAME") {
            self.node.name = name;
        }
        if let Some(address) = lookup("MESHTALK_ADDRESS") {
            self.node.address = parse_address(&address).context("MESHTALK_ADDRESS")?;
        }
        if let Some(listen) = lookup("MESHTALK_LISTEN") {
            self.transport.listen = listen
                .parse()
                .with_context(|| format!("MESHTALK_LISTEN: invalid socket address '{}'", listen))?;
        }
        if let Some(path) = lookup("MESHTALK_STORAGE_PATH") {
            self.storage = StorageMode::File {
                path: PathBuf::from(path),
            };
        }
        if let Some(level) = lookup("MESHTALK_LOG_LEVEL") {
            self.log_level = level;
        }
        Ok(())
    }

    /// Reject settings the node cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.node.name.trim().is_empty() {
            bail!("node name must not be empty");
        }
        if self.node.address == BROADCAST_ADDRESS {
            bail!("node address 0x{:04X} is the broadcast address", BROADCAST_ADDRESS);
        }
        if self.chat.max_contacts == 0 {
            bail!("chat.max_contacts must be at least 1");
        }
        if self.chat.history_depth == 0 {
            bail!("chat.history_depth must be at least 1");
        }
        if let Some(peer) = self
            .transport
            .peers
            .iter()
            .find(|p| p.address == BROADCAST_ADDRESS || p.address == 0)
        {
            bail!("peer address 0x{:04X} is reserved", peer.address);
        }
        Ok(())
    }

    /// Settings for [`meshtalk_transport::UdpMesh::bind`]
    pub fn udp_mesh_config(&self) -> UdpMeshConfig {
        UdpMeshConfig {
            listen: self.transport.listen,
            local_address: self.node.address,
            peers: self
                .transport
                .peers
                .iter()
                .map(|p| (p.address, p.socket))
                .collect(),
            send_timeout: self.transport.send_timeout,
            inbound_queue: self.transport.inbound_queue,
        }
    }
}
