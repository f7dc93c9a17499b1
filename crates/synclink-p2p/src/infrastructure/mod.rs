//! Infrastructure layer for synclink-p2p.
//!
//! Everything that touches sockets, certificates or files lives here:
//!
//! - `identity`     node key and certificate, generated on first start
//! - `tls`          rustls server/client configurations built from the identity
//! - `listener`     TLS + WebSocket accept loop
//! - `peer_link`    WebSocket peer sessions, inbound and outbound
//! - `port_mapper`  in-process port mapping table
//! - `folders`      configuration-backed folder directory
//! - `config_file`  TOML configuration loading
//! - `service`      wiring plus the broker event loop
//!
//! Routing decisions are not made here; they belong to the application layer.

pub mod config_file;
pub mod folders;
pub mod identity;
pub mod listener;
pub mod peer_link;
pub mod port_mapper;
pub mod service;
pub mod tls;

pub use config_file::{load_config, load_or_default, ConfigError};
pub use folders::{LocalFolderGroup, StaticFolderDirectory};
pub use identity::{certificate_digest, IdentityError, NodeKey};
pub use listener::{InboundSocket, P2pListener};
pub use peer_link::{OutboundSocket, WsPeerLink, WsPeerLinkFactory};
pub use port_mapper::{LocalPortMapper, PortMapping};
pub use service::{start_broker, BrokerHandles};
pub use tls::{build_tls_configs, TlsConfigError, TlsConfigs};
