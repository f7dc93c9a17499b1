//! End-to-end tests over real loopback sockets.
//!
//! Each test starts one or two brokers with freshly generated identities on
//! an OS-chosen port and drives them with real TLS + WebSocket clients.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rustls::pki_types::ServerName;
use synclink_core::{DiscoveryTuple, FolderId};
use synclink_p2p::application::MAIN_PORT_LABEL;
use synclink_p2p::domain::{CloseReason, LinkEvent, P2pConfig};
use synclink_p2p::infrastructure::{
    build_tls_configs, start_broker, BrokerHandles, LocalPortMapper, NodeKey, OutboundSocket,
    StaticFolderDirectory,
};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::client_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

struct Node {
    key: NodeKey,
    mapper: Arc<LocalPortMapper>,
    running: Arc<AtomicBool>,
    handles: BrokerHandles,
}

impl Node {
    fn port(&self) -> u16 {
        self.handles.listen_port.expect("listener bound")
    }
}

async fn start_node(folders: &[FolderId], listen_port: u16) -> Node {
    let (key, _, _) = NodeKey::generate().unwrap();
    let config = P2pConfig {
        listen_port,
        folders: folders.to_vec(),
        ..P2pConfig::default()
    };
    let directory = Arc::new(StaticFolderDirectory::from_ids(folders.iter().cloned()));
    let mapper = Arc::new(LocalPortMapper::new());
    let running = Arc::new(AtomicBool::new(true));
    let handles = start_broker(&config, &key, directory, mapper.clone(), running.clone())
        .await
        .unwrap();
    Node {
        key,
        mapper,
        running,
        handles,
    }
}

async fn connect_ws(key: &NodeKey, port: u16, path: &str) -> OutboundSocket {
    let tls = build_tls_configs(key).unwrap();
    let connector = TlsConnector::from(tls.client);
    let tcp = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.unwrap();
    let ip = IpAddr::from(Ipv4Addr::LOCALHOST);
    let stream = connector.connect(ServerName::from(ip), tcp).await.unwrap();
    let (ws, _) = client_async(format!("wss://127.0.0.1:{port}{path}"), stream)
        .await
        .unwrap();
    ws
}

/// Waits for the first event matching `pred`, skipping others.
async fn wait_for<F>(rx: &mut mpsc::UnboundedReceiver<LinkEvent>, pred: F) -> LinkEvent
where
    F: Fn(&LinkEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            let event = rx.recv().await.expect("link event channel open");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for link event")
}

#[tokio::test]
async fn test_bound_port_is_mapped_under_main_label() {
    let node = start_node(&[], 0).await;

    let mapping = node.mapper.mapping(MAIN_PORT_LABEL).expect("mapping installed");
    assert_eq!(mapping.port, node.port());
    assert_ne!(mapping.port, 0);
}

#[tokio::test]
async fn test_inbound_known_folder_becomes_link() {
    // Arrange
    let folder = FolderId::new(vec![0x5f, 0x1c]);
    let mut server = start_node(&[folder.clone()], 0).await;
    let (client_key, _, _) = NodeKey::generate().unwrap();

    // Act
    let mut ws = connect_ws(&client_key, server.port(), "/5f1c").await;
    ws.send(Message::Binary(vec![1, 2, 3])).await.unwrap();

    // Assert
    let connected = wait_for(&mut server.handles.link_events, |e| {
        matches!(e, LinkEvent::Connected { .. })
    })
    .await;
    match connected {
        LinkEvent::Connected {
            folder_id,
            remote_digest,
            ..
        } => {
            assert_eq!(folder_id, folder);
            assert_eq!(remote_digest, Some(client_key.digest()));
        }
        other => panic!("unexpected event {other:?}"),
    }
    let frame = wait_for(&mut server.handles.link_events, |e| {
        matches!(e, LinkEvent::Frame { .. })
    })
    .await;
    assert!(matches!(frame, LinkEvent::Frame { data, .. } if data == vec![1, 2, 3]));
}

#[tokio::test]
async fn test_inbound_unknown_folder_is_closed_with_policy_code() {
    // Arrange
    let server = start_node(&[FolderId::new(vec![0x01])], 0).await;
    let (client_key, _, _) = NodeKey::generate().unwrap();

    // Act
    let mut ws = connect_ws(&client_key, server.port(), "/02").await;
    let message = timeout(WAIT, ws.next()).await.unwrap();

    // Assert
    match message {
        Some(Ok(Message::Close(Some(frame)))) => assert_eq!(frame.code, CloseCode::Policy),
        other => panic!("expected policy close, got {other:?}"),
    }
}

#[tokio::test]
async fn test_inbound_undecodable_path_is_closed() {
    let server = start_node(&[FolderId::new(vec![0x01])], 0).await;
    let (client_key, _, _) = NodeKey::generate().unwrap();

    let mut ws = connect_ws(&client_key, server.port(), "/not-hex").await;
    let message = timeout(WAIT, ws.next()).await.unwrap();

    assert!(matches!(message, Some(Ok(Message::Close(Some(_))))));
}

#[tokio::test]
async fn test_outbound_link_connects_both_nodes() {
    // Arrange
    let folder = FolderId::new(vec![0xab, 0xcd]);
    let mut a = start_node(&[folder.clone()], 0).await;
    let mut b = start_node(&[folder.clone()], 0).await;

    // Act: A learns about B through discovery
    a.handles
        .discovery
        .send(DiscoveryTuple::new(folder.clone(), IpAddr::from(Ipv4Addr::LOCALHOST), b.port()))
        .await
        .unwrap();

    // Assert
    let on_a = wait_for(&mut a.handles.link_events, |e| {
        matches!(e, LinkEvent::Connected { .. })
    })
    .await;
    assert!(matches!(on_a, LinkEvent::Connected { remote_digest: Some(d), .. } if d == b.key.digest()));

    let on_b = wait_for(&mut b.handles.link_events, |e| {
        matches!(e, LinkEvent::Connected { .. })
    })
    .await;
    assert!(matches!(on_b, LinkEvent::Connected { remote_digest: Some(d), folder_id, .. }
        if d == a.key.digest() && folder_id == folder));
}

#[tokio::test]
async fn test_outbound_link_to_self_closes_as_loopback() {
    // Arrange
    let folder = FolderId::new(vec![0x42]);
    let mut node = start_node(&[folder.clone()], 0).await;

    // Act: discovery announces our own listener
    node.handles
        .discovery
        .send(DiscoveryTuple::new(folder, IpAddr::from(Ipv4Addr::LOCALHOST), node.port()))
        .await
        .unwrap();

    // Assert
    let event = wait_for(&mut node.handles.link_events, |e| {
        matches!(e, LinkEvent::Closed { .. } | LinkEvent::Connected { .. })
    })
    .await;
    assert!(
        matches!(event, LinkEvent::Closed { reason: CloseReason::Loopback, .. }),
        "{event:?}"
    );
}

#[tokio::test]
async fn test_outbound_to_closed_port_reports_connect_failure() {
    let folder = FolderId::new(vec![0x42]);
    let mut node = start_node(&[folder.clone()], 0).await;
    let unused_port = {
        let probe = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        probe.local_addr().unwrap().port()
    };

    node.handles
        .discovery
        .send(DiscoveryTuple::new(folder, IpAddr::from(Ipv4Addr::LOCALHOST), unused_port))
        .await
        .unwrap();

    let event = wait_for(&mut node.handles.link_events, |e| {
        matches!(e, LinkEvent::Closed { .. })
    })
    .await;
    assert!(matches!(
        event,
        LinkEvent::Closed {
            reason: CloseReason::ConnectFailed(_),
            ..
        }
    ));
}

#[tokio::test]
async fn test_discovery_for_unknown_folder_creates_no_link() {
    let mut node = start_node(&[FolderId::new(vec![0x01])], 0).await;

    node.handles
        .discovery
        .send(DiscoveryTuple::new(
            FolderId::new(vec![0x02]),
            IpAddr::from(Ipv4Addr::LOCALHOST),
            node.port(),
        ))
        .await
        .unwrap();

    let nothing = timeout(Duration::from_millis(500), node.handles.link_events.recv()).await;
    assert!(nothing.is_err(), "no link event expected, got {nothing:?}");
}

#[tokio::test]
async fn test_failed_bind_leaves_broker_running_without_mapping() {
    // Arrange: occupy a port
    let blocker = std::net::TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
    let taken = blocker.local_addr().unwrap().port();

    // Act
    let node = start_node(&[], taken).await;

    // Assert
    assert_eq!(node.handles.listen_port, None);
    assert!(node.mapper.mapping(MAIN_PORT_LABEL).is_none());

    // Shutting down after the failed bind is clean.
    node.running.store(false, Ordering::Relaxed);
    timeout(WAIT, node.handles.task).await.unwrap().unwrap();
    assert!(node.mapper.is_empty());
}

#[tokio::test]
async fn test_shutdown_releases_port_mapping() {
    // Arrange
    let node = start_node(&[], 0).await;
    assert!(node.mapper.mapping(MAIN_PORT_LABEL).is_some());

    // Act
    node.running.store(false, Ordering::Relaxed);
    timeout(WAIT, node.handles.task).await.unwrap().unwrap();

    // Assert
    assert!(node.mapper.mapping(MAIN_PORT_LABEL).is_none());
}
