//! # synclink-core
//!
//! Shared types for the synclink peer-to-peer folder synchronization daemon.
//!
//! This crate has no I/O and no async runtime.  It defines the vocabulary the
//! connection broker speaks:
//!
//! - **`domain`** – folder identifiers, node identity digests and discovery
//!   announcements.
//!
//! - **`protocol`** – the `wss://<host>:<port>/<hex(folder_id)>` URL format
//!   that names a folder endpoint on a remote node.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `synclink_core::FolderId` instead of `synclink_core::domain::folder::FolderId`.
pub use domain::digest::{NodeDigest, DIGEST_LEN};
pub use domain::discovery::DiscoveryTuple;
pub use domain::folder::{FolderId, FolderIdError};
pub use protocol::peer_url::{PeerUrl, PeerUrlError, PEER_URL_SCHEME};
