//! synclink-p2p library crate.
//!
//! The peer connection broker of the synclink daemon.  It owns the TLS
//! listener, turns accepted connections and discovery tuples into
//! folder-scoped peer links, and keeps the listener's port mapping in step
//! with the listener's lifetime.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! discovery ──► [synclink-p2p] ◄── remote peers (wss://host:port/<folder hex>)
//!   ├── domain/          Config schema, listener and link events
//!   ├── application/     ConnectionBroker routing + the traits it depends on
//!   └── infrastructure/
//!         ├── identity   Node certificate, key and digest
//!         ├── tls        rustls configs (query-peer server, digest-only client)
//!         ├── listener   TLS + WebSocket accept loop
//!         ├── peer_link  WebSocket peer sessions
//!         └── service    Broker event loop
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `synclink-core` only; sockets are
//!   a type parameter it never looks into.
//! - `infrastructure` implements the application traits with `tokio`,
//!   `tokio-rustls` and `tokio-tungstenite`.

/// Domain layer: configuration and event types (no I/O).
pub mod domain;

/// Application layer: connection routing.
pub mod application;

/// Infrastructure layer: identity, TLS, listener, peer links, broker loop.
pub mod infrastructure;
