//! Domain entities for synclink.
//!
//! Pure value types with no infrastructure dependencies.  Everything that
//! crosses the broker's boundary (folder ids arriving in request paths,
//! digests extracted from peer certificates, tuples produced by discovery)
//! is represented here so it can be tested without sockets.

pub mod digest;
pub mod discovery;
pub mod folder;
