//! Abstractions the broker depends on.
//!
//! The broker never talks to a folder store, a NAT backend or a socket type
//! directly.  It sees these traits, which lets the routing logic be tested
//! with mocks and lets the infrastructure layer choose concrete types.

use std::net::SocketAddr;
use std::sync::Arc;

use synclink_core::{FolderId, PeerUrl};
use uuid::Uuid;

use crate::application::broker::RoutingError;

/// Label under which the broker registers its own listener.
pub const MAIN_PORT_LABEL: &str = "main";

/// Transport of a port mapping request.  The listener is TCP only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingProtocol {
    Tcp,
}

/// Exposes local ports externally (UPnP / NAT-PMP or similar).
#[cfg_attr(test, mockall::automock)]
pub trait PortMapper: Send + Sync {
    /// Requests that `port` be reachable from outside under `label`.
    fn add_port(&self, label: &str, port: u16, protocol: MappingProtocol, description: &str);

    /// Releases the mapping registered under `label`.  Unknown labels are
    /// ignored.
    fn remove_port(&self, label: &str);
}

/// Maps folder ids to the folder groups this node participates in.
#[cfg_attr(test, mockall::automock)]
pub trait FolderDirectory: Send + Sync {
    fn get_group(&self, folder_id: &FolderId) -> Option<Arc<dyn FolderGroup>>;
}

/// The peers and state of one synchronized folder.
///
/// A group takes exclusive ownership of every link attached to it.
pub trait FolderGroup: Send + Sync {
    fn folder_id(&self) -> &FolderId;

    fn attach(&self, link: Box<dyn PeerLink>);
}

/// One folder-scoped connection to a remote node.
pub trait PeerLink: Send {
    fn id(&self) -> Uuid;

    fn folder_id(&self) -> &FolderId;

    fn is_open(&self) -> bool;

    /// Starts closing the link.  Closing twice is harmless.
    fn close(&mut self);
}

/// An accepted connection waiting to be routed.
pub struct InboundConnection<S> {
    pub peer_addr: SocketAddr,
    /// Path of the upgrade request, e.g. `/ab12…`.
    pub request_path: String,
    pub socket: S,
}

/// Builds peer links around sockets of type `S`.
pub trait PeerLinkFactory<S>: Send + Sync {
    /// Wraps an already accepted socket.
    fn adopt(&self, folder_id: &FolderId, peer_addr: SocketAddr, socket: S) -> Box<dyn PeerLink>;

    /// Creates a link that connects to `url` on its own.
    fn open(&self, url: &PeerUrl) -> Box<dyn PeerLink>;

    /// Closes an accepted socket that could not be routed.
    fn reject(&self, peer_addr: SocketAddr, socket: S, reason: &RoutingError);
}
