//! WebSocket peer links.
//!
//! A [`WsPeerLink`] is the handle a folder group keeps; the connection itself
//! lives in a session task:
//!
//! ```text
//! WsPeerLink ── close signal ──► session task ◄──► WebSocket (binary frames)
//!                                     │
//!                                     └──► LinkEvent channel (Connected / Frame / Closed)
//! ```
//!
//! Closing or dropping the handle fires the close signal, which makes the
//! session send a close frame and stop.
//!
//! # Outbound links
//!
//! [`WsPeerLinkFactory::open`] returns immediately.  A dial task connects
//! TCP (bounded by the connect timeout), performs the TLS handshake, checks
//! the server certificate digest against our own and only then upgrades to
//! WebSocket.  A server presenting our own digest is ourselves: the link is
//! closed with [`CloseReason::Loopback`] before any WebSocket traffic.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::ClientConfig;
use synclink_core::{FolderId, NodeDigest, PeerUrl};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{client_async, WebSocketStream};
use tracing::{debug, trace};
use uuid::Uuid;

use super::identity::certificate_digest;
use super::listener::InboundSocket;
use crate::application::{PeerLink, PeerLinkFactory, RoutingError};
use crate::domain::{CloseReason, LinkEvent};

/// Socket type of dialed links.
pub type OutboundSocket = WebSocketStream<tokio_rustls::client::TlsStream<TcpStream>>;

/// How long a rejected socket gets to complete the close handshake.
const REJECT_LINGER: Duration = Duration::from_secs(5);

// ── Link handle ───────────────────────────────────────────────────────────────

/// Handle to one peer session.
pub struct WsPeerLink {
    id: Uuid,
    folder_id: FolderId,
    close_tx: Option<oneshot::Sender<()>>,
    open: Arc<AtomicBool>,
}

/// The session-task side of a [`WsPeerLink`].
struct SessionEnds {
    close_rx: oneshot::Receiver<()>,
    open: Arc<AtomicBool>,
}

impl WsPeerLink {
    fn new(folder_id: FolderId) -> (Self, SessionEnds) {
        let (close_tx, close_rx) = oneshot::channel();
        let open = Arc::new(AtomicBool::new(true));
        let link = Self {
            id: Uuid::new_v4(),
            folder_id,
            close_tx: Some(close_tx),
            open: Arc::clone(&open),
        };
        (link, SessionEnds { close_rx, open })
    }
}

impl PeerLink for WsPeerLink {
    fn id(&self) -> Uuid {
        self.id
    }

    fn folder_id(&self) -> &FolderId {
        &self.folder_id
    }

    fn is_open(&self) -> bool {
        self.close_tx.is_some() && self.open.load(Ordering::Relaxed)
    }

    fn close(&mut self) {
        // Dropping the sender is the signal.
        self.close_tx = None;
        self.open.store(false, Ordering::Relaxed);
    }
}

// ── Factory ───────────────────────────────────────────────────────────────────

/// Builds [`WsPeerLink`]s for the broker.
pub struct WsPeerLinkFactory {
    connector: TlsConnector,
    own_digest: NodeDigest,
    connect_timeout: Duration,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl WsPeerLinkFactory {
    pub fn new(
        client_tls: Arc<ClientConfig>,
        own_digest: NodeDigest,
        connect_timeout: Duration,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Self {
        Self {
            connector: TlsConnector::from(client_tls),
            own_digest,
            connect_timeout,
            events,
        }
    }
}

impl PeerLinkFactory<InboundSocket> for WsPeerLinkFactory {
    fn adopt(
        &self,
        folder_id: &FolderId,
        peer_addr: SocketAddr,
        socket: InboundSocket,
    ) -> Box<dyn PeerLink> {
        let (link, ends) = WsPeerLink::new(folder_id.clone());
        let remote_digest = first_digest(socket.get_ref().get_ref().1.peer_certificates());
        let _ = self.events.send(LinkEvent::Connected {
            link_id: link.id,
            folder_id: folder_id.clone(),
            remote: peer_addr,
            remote_digest,
        });
        tokio::spawn(run_session(link.id, socket, ends, self.events.clone()));
        Box::new(link)
    }

    fn open(&self, url: &PeerUrl) -> Box<dyn PeerLink> {
        let (link, ends) = WsPeerLink::new(url.folder_id().clone());
        let link_id = link.id;
        let url = url.clone();
        let connector = self.connector.clone();
        let own_digest = self.own_digest;
        let connect_timeout = self.connect_timeout;
        let events = self.events.clone();

        tokio::spawn(async move {
            match dial(&url, &connector, own_digest, connect_timeout).await {
                Ok((socket, remote_digest)) => {
                    let _ = events.send(LinkEvent::Connected {
                        link_id,
                        folder_id: url.folder_id().clone(),
                        remote: url.socket_addr(),
                        remote_digest,
                    });
                    run_session(link_id, socket, ends, events).await;
                }
                Err(reason) => {
                    ends.open.store(false, Ordering::Relaxed);
                    debug!(%link_id, %url, %reason, "outbound peer link not established");
                    let _ = events.send(LinkEvent::Closed { link_id, reason });
                }
            }
        });

        Box::new(link)
    }

    fn reject(&self, peer_addr: SocketAddr, mut socket: InboundSocket, reason: &RoutingError) {
        let text = match reason {
            RoutingError::UndecodablePath { .. } => "malformed folder id",
            RoutingError::UnknownFolder(_) => "unknown folder",
        };
        let frame = CloseFrame {
            code: CloseCode::Policy,
            reason: text.into(),
        };
        tokio::spawn(async move {
            if let Err(e) = socket.close(Some(frame)).await {
                trace!(%peer_addr, error = %e, "close frame not delivered");
                return;
            }
            // Wait for the remote's close reply so the TCP stream ends cleanly.
            let _ = timeout(REJECT_LINGER, async {
                while let Some(Ok(_)) = socket.next().await {}
            })
            .await;
        });
    }
}

fn first_digest(certs: Option<&[CertificateDer<'static>]>) -> Option<NodeDigest> {
    certs.and_then(|c| c.first()).map(certificate_digest)
}

/// TCP connect, TLS handshake, loopback check, WebSocket upgrade.
async fn dial(
    url: &PeerUrl,
    connector: &TlsConnector,
    own_digest: NodeDigest,
    connect_timeout: Duration,
) -> Result<(OutboundSocket, Option<NodeDigest>), CloseReason> {
    let addr = url.socket_addr();
    let tcp = timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| CloseReason::ConnectFailed(format!("timed out after {connect_timeout:?}")))?
        .map_err(|e| CloseReason::ConnectFailed(e.to_string()))?;

    let tls = connector
        .connect(ServerName::from(addr.ip()), tcp)
        .await
        .map_err(|e| CloseReason::ConnectFailed(format!("TLS handshake: {e}")))?;

    let remote_digest = first_digest(tls.get_ref().1.peer_certificates());
    if remote_digest.is_some_and(|d| own_digest.matches(d.as_bytes())) {
        return Err(CloseReason::Loopback);
    }

    let (socket, _response) = client_async(url.to_string(), tls)
        .await
        .map_err(|e| CloseReason::ConnectFailed(format!("WebSocket upgrade: {e}")))?;
    Ok((socket, remote_digest))
}

// ── Session ───────────────────────────────────────────────────────────────────

/// Forwards incoming frames as link events until either side ends.
async fn run_session<S>(
    link_id: Uuid,
    mut socket: WebSocketStream<S>,
    ends: SessionEnds,
    events: mpsc::UnboundedSender<LinkEvent>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let SessionEnds { mut close_rx, open } = ends;

    let reason = loop {
        tokio::select! {
            incoming = socket.next() => match incoming {
                Some(Ok(Message::Binary(data))) => {
                    let _ = events.send(LinkEvent::Frame { link_id, data });
                }
                Some(Ok(Message::Close(_))) | None => break CloseReason::Remote,
                // Pings are answered by tungstenite; text is not part of the protocol.
                Some(Ok(_)) => {}
                Some(Err(e)) => break CloseReason::Error(e.to_string()),
            },
            _ = &mut close_rx => break CloseReason::Local,
        }
    };

    open.store(false, Ordering::Relaxed);
    if matches!(reason, CloseReason::Local | CloseReason::Remote) {
        let _ = socket.close(None).await;
    }
    debug!(%link_id, %reason, "peer link closed");
    let _ = events.send(LinkEvent::Closed { link_id, reason });
}

// ── Tests ─────────────────────────────────────────────────────────────────────
