//! Application layer for synclink-p2p.
//!
//! The routing logic of the broker lives here.  It knows *what* happens to a
//! connection or a discovery tuple, but delegates *how* to the traits in
//! [`ports`], which the infrastructure layer implements.
//!
//! # What does NOT belong here?
//!
//! - Binding sockets, TLS handshakes, WebSocket framing (infrastructure)
//! - Task spawning or channels (the broker loop in `infrastructure::service`)
//! - Configuration parsing

pub mod broker;
pub mod ports;

pub use broker::{ConnectionBroker, DrainReport, RoutingError, PORT_MAPPING_DESCRIPTION};
pub use ports::{
    FolderDirectory, FolderGroup, InboundConnection, MappingProtocol, PeerLink, PeerLinkFactory,
    PortMapper, MAIN_PORT_LABEL,
};
