//! ConnectionBroker: turns accepted sockets and discovery tuples into peer
//! links owned by the right folder group.
//!
//! # Routing (for beginners)
//!
//! Every peer link carries exactly one folder.  The folder is named in the
//! URL of the WebSocket upgrade request as a hex string:
//!
//! ```text
//! inbound:   GET /5f1c0a9e  ──► FolderId ──► FolderDirectory ──► group.attach(adopt(socket))
//! outbound:  DiscoveryTuple ──► FolderDirectory ──► wss://ip:port/5f1c0a9e ──► group.attach(open(url))
//! ```
//!
//! A folder the node does not participate in is handled differently per
//! direction.  Discovery is broadcast, so tuples for foreign folders are
//! normal and dropped without noise.  An inbound connection for an unknown
//! folder is rejected and closed; it never becomes a link.
//!
//! # Ownership
//!
//! The broker builds a link and moves it into the folder group.  It keeps no
//! reference afterwards: the link lives exactly as long as the group holds it.
//!
//! # Port mapping
//!
//! A successful bind registers the bound port under [`MAIN_PORT_LABEL`].
//! [`ConnectionBroker::shutdown`] removes that mapping again, and only if it
//! was installed, so shutting down after a failed bind is a no-op.

use std::io;
use std::sync::Arc;

use synclink_core::{DiscoveryTuple, FolderId, FolderIdError, NodeDigest, PeerUrl};
use thiserror::Error;
use tracing::{debug, info, warn, Span};
use uuid::Uuid;

use crate::application::ports::{
    FolderDirectory, InboundConnection, MappingProtocol, PeerLinkFactory, PortMapper,
    MAIN_PORT_LABEL,
};
use crate::domain::events::ListenerEvent;

/// Description attached to the broker's port mapping.
pub const PORT_MAPPING_DESCRIPTION: &str = "synclink";

/// Why an inbound connection could not be handed to a folder group.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("request path {path:?} does not name a folder: {source}")]
    UndecodablePath {
        path: String,
        #[source]
        source: FolderIdError,
    },

    #[error("folder {0} is not hosted on this node")]
    UnknownFolder(FolderId),
}

/// Outcome of draining one batch of accepted connections.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub routed: usize,
    pub rejected: usize,
}

impl DrainReport {
    pub fn total(&self) -> usize {
        self.routed + self.rejected
    }
}

/// The peer connection broker.
///
/// `S` is the socket type the listener produces; the broker only moves it
/// from the listener to a [`PeerLinkFactory`].
pub struct ConnectionBroker<S> {
    own_digest: NodeDigest,
    directory: Arc<dyn FolderDirectory>,
    port_mapper: Arc<dyn PortMapper>,
    links: Arc<dyn PeerLinkFactory<S>>,
    listen_port: Option<u16>,
    mapping_installed: bool,
    span: Span,
}

impl<S> ConnectionBroker<S> {
    /// Creates a broker without a listener.
    ///
    /// `span` is the parent of every log line the broker emits; callers pass
    /// something like `info_span!("p2p")`.
    pub fn new(
        own_digest: NodeDigest,
        directory: Arc<dyn FolderDirectory>,
        port_mapper: Arc<dyn PortMapper>,
        links: Arc<dyn PeerLinkFactory<S>>,
        span: Span,
    ) -> Self {
        Self {
            own_digest,
            directory,
            port_mapper,
            links,
            listen_port: None,
            mapping_installed: false,
            span,
        }
    }

    /// The port the listener is bound to, if binding succeeded.
    pub fn listen_port(&self) -> Option<u16> {
        self.listen_port
    }

    /// Records the outcome of binding the listener.
    ///
    /// On success the bound port (which differs from `requested_port` when
    /// that was 0) is registered with the port mapper.  On failure the
    /// broker keeps running without inbound capability.  Either way there
    /// is no retry.
    pub fn record_bind(&mut self, requested_port: u16, result: io::Result<u16>) {
        match result {
            Ok(port) => {
                info!(parent: &self.span, port, "listening for peers");
                self.listen_port = Some(port);
                self.port_mapper.add_port(
                    MAIN_PORT_LABEL,
                    port,
                    MappingProtocol::Tcp,
                    PORT_MAPPING_DESCRIPTION,
                );
                self.mapping_installed = true;
            }
            Err(e) => {
                warn!(
                    parent: &self.span,
                    port = requested_port,
                    error = %e,
                    "failed to bind listener; continuing with outbound connections only"
                );
                self.listen_port = None;
            }
        }
    }

    /// Routes every connection in `batch`, consuming it entirely.
    ///
    /// The listener may have several connections ready at once; none of them
    /// is left behind when this returns.
    pub fn handle_connections<I>(&self, batch: I) -> DrainReport
    where
        I: IntoIterator<Item = InboundConnection<S>>,
    {
        let mut report = DrainReport::default();
        for conn in batch {
            match self.route_inbound(conn) {
                Ok(_) => report.routed += 1,
                Err(_) => report.rejected += 1,
            }
        }
        report
    }

    /// Routes one accepted connection to its folder group.
    ///
    /// Returns the id of the new link.  A path that does not decode, or
    /// names a folder this node does not host, is rejected: the socket is
    /// closed through the factory and no link is created.
    ///
    /// # Errors
    ///
    /// Returns the [`RoutingError`] that caused the rejection.
    pub fn route_inbound(&self, conn: InboundConnection<S>) -> Result<Uuid, RoutingError> {
        let InboundConnection {
            peer_addr,
            request_path,
            socket,
        } = conn;

        debug!(parent: &self.span, %peer_addr, path = %request_path, "new incoming connection");

        let routed = FolderId::from_url_path(&request_path)
            .map_err(|source| RoutingError::UndecodablePath {
                path: request_path.clone(),
                source,
            })
            .and_then(|folder_id| {
                self.directory
                    .get_group(&folder_id)
                    .ok_or(RoutingError::UnknownFolder(folder_id))
            });

        match routed {
            Ok(group) => {
                let link = self.links.adopt(group.folder_id(), peer_addr, socket);
                let link_id = link.id();
                group.attach(link);
                Ok(link_id)
            }
            Err(e) => {
                debug!(parent: &self.span, %peer_addr, reason = %e, "rejecting incoming connection");
                self.links.reject(peer_addr, socket, &e);
                Err(e)
            }
        }
    }

    /// Starts an outbound link for a discovery tuple.
    ///
    /// Tuples for folders this node does not host are dropped silently and
    /// yield `None`.  Otherwise the URL the new link dials is returned.
    pub fn handle_discovered(&self, tuple: DiscoveryTuple) -> Option<PeerUrl> {
        debug!(
            parent: &self.span,
            address = %tuple.address,
            port = tuple.port,
            "discovery event"
        );

        // Discovery is shared between nodes; most tuples may not be for us.
        let group = self.directory.get_group(&tuple.folder_id)?;

        let url = PeerUrl::new(tuple.address, tuple.port, tuple.folder_id);
        debug!(parent: &self.span, %url, "new connection");

        let link = self.links.open(&url);
        group.attach(link);
        Some(url)
    }

    /// Logs a listener condition.  Never affects the listener itself.
    pub fn handle_listener_event(&self, event: &ListenerEvent) {
        match event {
            ListenerEvent::NewConnection { peer } => {
                debug!(parent: &self.span, %peer, "connection accepted");
            }
            ListenerEvent::PeerVerifyError { peer, detail } => {
                debug!(parent: &self.span, %peer, %detail, "peer verify error");
            }
            ListenerEvent::ServerError { peer, detail } => {
                debug!(parent: &self.span, %peer, %detail, "server error");
            }
            ListenerEvent::TlsError { peer, detail } => {
                debug!(parent: &self.span, %peer, %detail, "TLS error");
            }
            ListenerEvent::AcceptError { detail } => {
                debug!(parent: &self.span, %detail, "accept error");
            }
        }
    }

    /// Returns `true` iff `digest` is this node's own identity digest.
    pub fn is_loopback(&self, digest: &[u8]) -> bool {
        self.own_digest.matches(digest)
    }

    /// Removes the `"main"` port mapping if one was installed.
    ///
    /// Safe to call any number of times, including after a failed bind.
    pub fn shutdown(&mut self) {
        if self.mapping_installed {
            self.port_mapper.remove_port(MAIN_PORT_LABEL);
            self.mapping_installed = false;
            info!(parent: &self.span, "port mapping released");
        }
        self.listen_port = None;
    }
}

impl<S> Drop for ConnectionBroker<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{
        FolderGroup, MockFolderDirectory, MockPortMapper, PeerLink,
    };
    use mockall::predicate::eq;
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use synclink_core::DIGEST_LEN;

    // ── Fakes ──────────────────────────────────────────────────────────────

    struct FakeLink {
        id: Uuid,
        folder_id: FolderId,
        open: bool,
    }

    impl PeerLink for FakeLink {
        fn id(&self) -> Uuid {
            self.id
        }
        fn folder_id(&self) -> &FolderId {
            &self.folder_id
        }
        fn is_open(&self) -> bool {
            self.open
        }
        fn close(&mut self) {
            self.open = false;
        }
    }

    struct FakeGroup {
        folder_id: FolderId,
        attached: Mutex<Vec<Uuid>>,
    }

    impl FolderGroup for FakeGroup {
        fn folder_id(&self) -> &FolderId {
            &self.folder_id
        }
        fn attach(&self, link: Box<dyn PeerLink>) {
            self.attached.lock().unwrap().push(link.id());
        }
    }

    #[derive(Default)]
    struct FakeFactory {
        adopted: Mutex<Vec<(FolderId, &'static str)>>,
        opened: Mutex<Vec<String>>,
        rejected: Mutex<Vec<&'static str>>,
    }

    impl PeerLinkFactory<&'static str> for FakeFactory {
        fn adopt(
            &self,
            folder_id: &FolderId,
            _peer_addr: SocketAddr,
            socket: &'static str,
        ) -> Box<dyn PeerLink> {
            self.adopted.lock().unwrap().push((folder_id.clone(), socket));
            Box::new(FakeLink {
                id: Uuid::new_v4(),
                folder_id: folder_id.clone(),
                open: true,
            })
        }
        fn open(&self, url: &PeerUrl) -> Box<dyn PeerLink> {
            self.opened.lock().unwrap().push(url.to_string());
            Box::new(FakeLink {
                id: Uuid::new_v4(),
                folder_id: url.folder_id().clone(),
                open: true,
            })
        }
        fn reject(&self, _peer_addr: SocketAddr, socket: &'static str, _reason: &RoutingError) {
            self.rejected.lock().unwrap().push(socket);
        }
    }

    // ── Helpers ────────────────────────────────────────────────────────────

    const OWN: [u8; DIGEST_LEN] = [0xAB; DIGEST_LEN];

    fn known_folder() -> FolderId {
        FolderId::new(vec![0x5f, 0x1c])
    }

    fn directory_with(group: Arc<FakeGroup>) -> MockFolderDirectory {
        let mut dir = MockFolderDirectory::new();
        let known = group.folder_id.clone();
        dir.expect_get_group().returning(move |id| {
            if *id == known {
                Some(Arc::clone(&group) as Arc<dyn FolderGroup>)
            } else {
                None
            }
        });
        dir
    }

    fn make_broker(
        directory: MockFolderDirectory,
        mapper: MockPortMapper,
        factory: Arc<FakeFactory>,
    ) -> ConnectionBroker<&'static str> {
        ConnectionBroker::new(
            NodeDigest::new(OWN),
            Arc::new(directory),
            Arc::new(mapper),
            factory,
            Span::none(),
        )
    }

    fn inbound(path: &str, socket: &'static str) -> InboundConnection<&'static str> {
        InboundConnection {
            peer_addr: "10.0.0.2:50000".parse().unwrap(),
            request_path: path.to_string(),
            socket,
        }
    }

    fn group() -> Arc<FakeGroup> {
        Arc::new(FakeGroup {
            folder_id: known_folder(),
            attached: Mutex::new(Vec::new()),
        })
    }

    // ── Startup / shutdown ─────────────────────────────────────────────────

    #[test]
    fn test_successful_bind_registers_main_mapping_with_bound_port() {
        // Arrange
        let mut mapper = MockPortMapper::new();
        mapper
            .expect_add_port()
            .with(eq("main"), eq(41000u16), eq(MappingProtocol::Tcp), eq("synclink"))
            .times(1)
            .return_const(());
        mapper.expect_remove_port().returning(|_| ());
        let mut broker = make_broker(
            MockFolderDirectory::new(),
            mapper,
            Arc::new(FakeFactory::default()),
        );

        // Act: requested 0, OS chose 41000
        broker.record_bind(0, Ok(41000));

        // Assert
        assert_eq!(broker.listen_port(), Some(41000));
    }

    #[test]
    fn test_failed_bind_registers_nothing() {
        let mut mapper = MockPortMapper::new();
        mapper.expect_add_port().never();
        mapper.expect_remove_port().never();
        let mut broker = make_broker(
            MockFolderDirectory::new(),
            mapper,
            Arc::new(FakeFactory::default()),
        );

        broker.record_bind(80, Err(io::Error::from(io::ErrorKind::AddrInUse)));

        assert_eq!(broker.listen_port(), None);
    }

    #[test]
    fn test_shutdown_after_failed_bind_does_not_touch_mapper() {
        // Arrange: remove_port must never be called
        let mut mapper = MockPortMapper::new();
        mapper.expect_remove_port().never();
        let mut broker = make_broker(
            MockFolderDirectory::new(),
            mapper,
            Arc::new(FakeFactory::default()),
        );
        broker.record_bind(80, Err(io::Error::from(io::ErrorKind::PermissionDenied)));

        // Act: explicit shutdown plus the implicit one in Drop
        broker.shutdown();
        drop(broker);
    }

    #[test]
    fn test_shutdown_removes_mapping_exactly_once() {
        let mut mapper = MockPortMapper::new();
        mapper.expect_add_port().return_const(());
        mapper
            .expect_remove_port()
            .with(eq("main"))
            .times(1)
            .return_const(());
        let mut broker = make_broker(
            MockFolderDirectory::new(),
            mapper,
            Arc::new(FakeFactory::default()),
        );
        broker.record_bind(0, Ok(5000));

        broker.shutdown();
        broker.shutdown();
        drop(broker);
    }

    // ── Inbound routing ────────────────────────────────────────────────────

    #[test]
    fn test_inbound_known_folder_is_adopted_and_attached() {
        // Arrange
        let group = group();
        let factory = Arc::new(FakeFactory::default());
        let broker = make_broker(
            directory_with(Arc::clone(&group)),
            MockPortMapper::new(),
            Arc::clone(&factory),
        );

        // Act
        let link_id = broker.route_inbound(inbound("/5f1c", "sock-a")).unwrap();

        // Assert
        assert_eq!(
            *factory.adopted.lock().unwrap(),
            vec![(known_folder(), "sock-a")]
        );
        assert_eq!(*group.attached.lock().unwrap(), vec![link_id]);
        assert!(factory.rejected.lock().unwrap().is_empty());
    }

    #[test]
    fn test_inbound_unknown_folder_is_rejected_without_link() {
        let group = group();
        let factory = Arc::new(FakeFactory::default());
        let broker = make_broker(
            directory_with(Arc::clone(&group)),
            MockPortMapper::new(),
            Arc::clone(&factory),
        );

        let result = broker.route_inbound(inbound("/ffff", "sock-b"));

        assert_eq!(
            result,
            Err(RoutingError::UnknownFolder(FolderId::new(vec![0xff, 0xff])))
        );
        assert!(factory.adopted.lock().unwrap().is_empty());
        assert!(group.attached.lock().unwrap().is_empty());
        assert_eq!(*factory.rejected.lock().unwrap(), vec!["sock-b"]);
    }

    #[test]
    fn test_inbound_undecodable_path_is_rejected() {
        // Odd-length and non-hex paths are treated like unknown folders.
        let factory = Arc::new(FakeFactory::default());
        let mut dir = MockFolderDirectory::new();
        dir.expect_get_group().never();
        let broker = make_broker(dir, MockPortMapper::new(), Arc::clone(&factory));

        for (path, sock) in [("/abc", "odd"), ("/xyz0", "nonhex"), ("/", "empty")] {
            let result = broker.route_inbound(inbound(path, sock));
            assert!(
                matches!(result, Err(RoutingError::UndecodablePath { .. })),
                "path {path:?}"
            );
        }
        assert_eq!(
            *factory.rejected.lock().unwrap(),
            vec!["odd", "nonhex", "empty"]
        );
        assert!(factory.adopted.lock().unwrap().is_empty());
    }

    #[test]
    fn test_handle_connections_drains_whole_batch() {
        // Arrange: three pending connections, one for an unknown folder
        let group = group();
        let factory = Arc::new(FakeFactory::default());
        let broker = make_broker(
            directory_with(Arc::clone(&group)),
            MockPortMapper::new(),
            Arc::clone(&factory),
        );
        let batch = vec![
            inbound("/5f1c", "one"),
            inbound("/0000", "two"),
            inbound("/5F1C", "three"),
        ];

        // Act
        let report = broker.handle_connections(batch);

        // Assert
        assert_eq!(report, DrainReport { routed: 2, rejected: 1 });
        assert_eq!(report.total(), 3);
        assert_eq!(group.attached.lock().unwrap().len(), 2);
        assert_eq!(*factory.rejected.lock().unwrap(), vec!["two"]);
    }

    // ── Outbound routing ───────────────────────────────────────────────────

    #[test]
    fn test_discovered_known_folder_opens_one_link() {
        let group = group();
        let factory = Arc::new(FakeFactory::default());
        let broker = make_broker(
            directory_with(Arc::clone(&group)),
            MockPortMapper::new(),
            Arc::clone(&factory),
        );

        let url = broker.handle_discovered(DiscoveryTuple::new(
            known_folder(),
            "192.168.1.20".parse().unwrap(),
            42345,
        ));

        assert_eq!(
            url.map(|u| u.to_string()),
            Some("wss://192.168.1.20:42345/5f1c".to_string())
        );
        assert_eq!(
            *factory.opened.lock().unwrap(),
            vec!["wss://192.168.1.20:42345/5f1c".to_string()]
        );
        assert_eq!(group.attached.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_discovered_unknown_folder_is_discarded() {
        let group = group();
        let factory = Arc::new(FakeFactory::default());
        let broker = make_broker(
            directory_with(Arc::clone(&group)),
            MockPortMapper::new(),
            Arc::clone(&factory),
        );

        let url = broker.handle_discovered(DiscoveryTuple::new(
            FolderId::new(vec![1, 2, 3]),
            "192.168.1.20".parse().unwrap(),
            42345,
        ));

        assert!(url.is_none());
        assert!(factory.opened.lock().unwrap().is_empty());
        assert!(group.attached.lock().unwrap().is_empty());
    }

    // ── Loopback ───────────────────────────────────────────────────────────

    #[test]
    fn test_is_loopback_true_for_own_digest_only() {
        let broker = make_broker(
            MockFolderDirectory::new(),
            MockPortMapper::new(),
            Arc::new(FakeFactory::default()),
        );

        assert!(broker.is_loopback(&OWN));
        assert!(!broker.is_loopback(&[0u8; DIGEST_LEN]));
        assert!(!broker.is_loopback(&OWN[..16]));
        assert!(!broker.is_loopback(b"not a digest"));
    }

    #[test]
    fn test_listener_events_do_not_panic() {
        let broker = make_broker(
            MockFolderDirectory::new(),
            MockPortMapper::new(),
            Arc::new(FakeFactory::default()),
        );
        let peer: SocketAddr = "10.0.0.9:1234".parse().unwrap();
        for event in [
            ListenerEvent::NewConnection { peer },
            ListenerEvent::PeerVerifyError { peer, detail: "no certificate".into() },
            ListenerEvent::ServerError { peer, detail: "bad upgrade".into() },
            ListenerEvent::TlsError { peer, detail: "handshake".into() },
            ListenerEvent::AcceptError { detail: "EMFILE".into() },
        ] {
            broker.handle_listener_event(&event);
        }
    }
}
