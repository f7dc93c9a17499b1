//! Events reported by the listener and by peer links.
//!
//! Listener events are observability hooks only: the broker logs them and
//! carries on.  None of them closes the listener or affects other
//! connections.

use std::fmt;
use std::net::SocketAddr;

use synclink_core::{FolderId, NodeDigest};
use uuid::Uuid;

/// Conditions raised by the listening endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    /// A TCP connection was accepted and its handshake has started.
    NewConnection { peer: SocketAddr },
    /// The peer's certificate could not be inspected (absent or unusable).
    /// The handshake is not failed for this.
    PeerVerifyError { peer: SocketAddr, detail: String },
    /// The WebSocket upgrade on top of TLS failed.
    ServerError { peer: SocketAddr, detail: String },
    /// The TLS handshake failed.
    TlsError { peer: SocketAddr, detail: String },
    /// `accept()` itself returned an error.
    AcceptError { detail: String },
}

/// Why a peer link ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The remote closed the WebSocket or the stream ended.
    Remote,
    /// The owning folder group closed or dropped the link.
    Local,
    /// The remote certificate carries our own digest.
    Loopback,
    /// The outbound connection could not be established.
    ConnectFailed(String),
    /// A transport error ended the session.
    Error(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Remote => f.write_str("closed by remote"),
            CloseReason::Local => f.write_str("closed locally"),
            CloseReason::Loopback => f.write_str("loopback connection"),
            CloseReason::ConnectFailed(e) => write!(f, "connect failed: {e}"),
            CloseReason::Error(e) => write!(f, "transport error: {e}"),
        }
    }
}

/// Lifecycle and traffic of a single peer link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected {
        link_id: Uuid,
        folder_id: FolderId,
        remote: SocketAddr,
        remote_digest: Option<NodeDigest>,
    },
    Frame {
        link_id: Uuid,
        data: Vec<u8>,
    },
    Closed {
        link_id: Uuid,
        reason: CloseReason,
    },
}

impl LinkEvent {
    pub fn link_id(&self) -> Uuid {
        match self {
            LinkEvent::Connected { link_id, .. }
            | LinkEvent::Frame { link_id, .. }
            | LinkEvent::Closed { link_id, .. } => *link_id,
        }
    }
}
