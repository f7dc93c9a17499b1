//! Peer connection URLs.
//!
//! Format:
//! ```text
//! wss://<host>:<port>/<hex(folder_id)>
//! ```
//! The scheme is always secure WebSocket and the path is exactly one segment.
//! IPv6 hosts are bracketed, as in `wss://[fe80::1]:42345/ab`.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use thiserror::Error;

use crate::domain::folder::{FolderId, FolderIdError};

/// URL scheme used by every peer link.
pub const PEER_URL_SCHEME: &str = "wss";

/// Errors produced by [`PeerUrl::parse`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeerUrlError {
    #[error("unsupported scheme {0:?}, expected \"wss\"")]
    UnsupportedScheme(String),

    #[error("missing or invalid host:port in {0:?}")]
    InvalidAuthority(String),

    #[error("invalid folder path: {0}")]
    InvalidFolder(#[from] FolderIdError),
}

/// Address of a remote peer's folder endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerUrl {
    addr: SocketAddr,
    folder_id: FolderId,
}

impl PeerUrl {
    pub fn new(address: IpAddr, port: u16, folder_id: FolderId) -> Self {
        Self {
            addr: SocketAddr::new(address, port),
            folder_id,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn folder_id(&self) -> &FolderId {
        &self.folder_id
    }

    /// Parses a `wss://ip:port/hex` URL.
    ///
    /// Only literal IP hosts are accepted; discovery always yields addresses,
    /// never host names.
    ///
    /// # Errors
    ///
    /// See [`PeerUrlError`].
    pub fn parse(text: &str) -> Result<Self, PeerUrlError> {
        let (scheme, rest) = text
            .split_once("://")
            .ok_or_else(|| PeerUrlError::InvalidAuthority(text.to_string()))?;
        if !scheme.eq_ignore_ascii_case(PEER_URL_SCHEME) {
            return Err(PeerUrlError::UnsupportedScheme(scheme.to_string()));
        }
        let (authority, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };
        let addr: SocketAddr = authority
            .parse()
            .map_err(|_| PeerUrlError::InvalidAuthority(authority.to_string()))?;
        let folder_id = FolderId::from_url_path(path)?;
        Ok(Self { addr, folder_id })
    }
}

impl fmt::Display for PeerUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // SocketAddr's Display brackets IPv6 hosts for us.
        write!(
            f,
            "{PEER_URL_SCHEME}://{}{}",
            self.addr,
            self.folder_id.to_url_path()
        )
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
