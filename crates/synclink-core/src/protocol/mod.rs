//! Wire-level naming of peer endpoints.

pub mod peer_url;

pub use peer_url::{PeerUrl, PeerUrlError};
