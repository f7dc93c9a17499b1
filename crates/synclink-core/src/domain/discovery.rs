//! Discovery announcements.

use std::net::{IpAddr, SocketAddr};

use crate::domain::folder::FolderId;

/// A candidate peer for a folder, as announced by a discovery source.
///
/// A tuple carries no identity of its own.  It is consumed once and yields
/// at most one outbound connection attempt; whether the remote really hosts
/// the folder is settled by the folder lookup and the TLS handshake that
/// follow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryTuple {
    pub folder_id: FolderId,
    pub address: IpAddr,
    pub port: u16,
}

impl DiscoveryTuple {
    pub fn new(folder_id: FolderId, address: IpAddr, port: u16) -> Self {
        Self {
            folder_id,
            address,
            port,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}
