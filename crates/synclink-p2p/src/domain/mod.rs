//! Domain layer for synclink-p2p.
//!
//! Plain data: the configuration schema and the events the listener and
//! peer links report.  Nothing here touches a socket or an async runtime.

pub mod config;
pub mod events;

pub use config::{IdentityConfig, P2pConfig, StaticPeer, StaticPeerParseError, DEFAULT_LISTEN_PORT};
pub use events::{CloseReason, LinkEvent, ListenerEvent};
