//! Broker configuration types.
//!
//! [`P2pConfig`] is the single source of truth for the broker's runtime
//! settings.  It is deserialized from a TOML file (see
//! `infrastructure::config_file`) and then overridden field by field from CLI
//! arguments in `main.rs`.  Missing fields fall back to the defaults below so
//! an empty file, or no file at all, is a valid configuration.
//!
//! ```toml
//! listen_port = 42345
//! connect_timeout_secs = 10
//! log_level = "info"
//! folders = ["5f1c0a9e"]
//!
//! [identity]
//! cert_path = "identity/cert.pem"
//! key_path = "identity/key.pem"
//!
//! [[peers]]
//! folder = "5f1c0a9e"
//! address = "192.168.1.20:42345"
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use synclink_core::{DiscoveryTuple, FolderId, PeerUrl, PeerUrlError};
use thiserror::Error;

/// Port the broker listens on when nothing else is configured.
pub const DEFAULT_LISTEN_PORT: u16 = 42345;

/// All runtime configuration for the peer broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct P2pConfig {
    /// Port requested for the listener.  `0` lets the OS choose; the bound
    /// port is what gets registered with the port mapper either way.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Upper bound on the TCP connect phase of an outbound peer link.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Folders this node participates in.
    #[serde(default)]
    pub folders: Vec<FolderId>,

    /// Where the node certificate and private key live.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Peers to dial at startup, as if announced by discovery.
    #[serde(default)]
    pub peers: Vec<StaticPeer>,
}

/// Location of the node identity on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_cert_path")]
    pub cert_path: PathBuf,
    #[serde(default = "default_key_path")]
    pub key_path: PathBuf,
}

/// A statically configured peer for one folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticPeer {
    pub folder: FolderId,
    pub address: SocketAddr,
}

/// Error for the `<hex folder>@<ip>:<port>` and `wss://<ip>:<port>/<hex>`
/// peer notations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StaticPeerParseError {
    #[error("invalid peer url: {0}")]
    Url(#[from] PeerUrlError),
    #[error("expected <folder-hex>@<ip>:<port>, got {0:?}")]
    MissingSeparator(String),
    #[error("invalid folder id: {0}")]
    Folder(#[from] synclink_core::FolderIdError),
    #[error("invalid peer address {0:?}")]
    Address(String),
}

impl StaticPeer {
    /// The discovery tuple this peer stands for.
    pub fn to_discovery_tuple(&self) -> DiscoveryTuple {
        DiscoveryTuple::new(self.folder.clone(), self.address.ip(), self.address.port())
    }
}

impl FromStr for StaticPeer {
    type Err = StaticPeerParseError;

    /// Accepts either `<hex>@<ip>:<port>` or a full peer URL as logged by
    /// the broker, e.g. `wss://10.0.0.5:42345/abcd`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains("://") {
            let url = PeerUrl::parse(s)?;
            return Ok(Self {
                folder: url.folder_id().clone(),
                address: url.socket_addr(),
            });
        }
        let (folder, address) = s
            .split_once('@')
            .ok_or_else(|| StaticPeerParseError::MissingSeparator(s.to_string()))?;
        let folder = FolderId::from_hex(folder)?;
        let address = address
            .parse()
            .map_err(|_| StaticPeerParseError::Address(address.to_string()))?;
        Ok(Self { folder, address })
    }
}

impl P2pConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_listen_port() -> u16 {
    DEFAULT_LISTEN_PORT
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_cert_path() -> PathBuf {
    PathBuf::from("identity/cert.pem")
}
fn default_key_path() -> PathBuf {
    PathBuf::from("identity/key.pem")
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            cert_path: default_cert_path(),
            key_path: default_key_path(),
        }
    }
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            connect_timeout_secs: default_connect_timeout_secs(),
            log_level: default_log_level(),
            folders: Vec::new(),
            identity: IdentityConfig::default(),
            peers: Vec::new(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
