//! TLS WebSocket listener.
//!
//! The listener only accepts and handshakes.  It never decides where a
//! connection goes; finished connections are sent to the broker loop over a
//! channel together with the request path of the upgrade request.
//!
//! ```text
//! accept task ──► per-connection task: TLS accept ──► WebSocket upgrade ──► connections channel
//!      │                     │                               │
//!      └──────────────── ListenerEvent channel (observability only) ─────────┘
//! ```
//!
//! A failing handshake affects only its own connection.  Every problem is
//! reported as a [`ListenerEvent`] and the accept loop keeps going.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use rustls::ServerConfig;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::trace;

use crate::application::InboundConnection;
use crate::domain::ListenerEvent;

/// Socket type produced by the listener.
pub type InboundSocket = WebSocketStream<tokio_rustls::server::TlsStream<TcpStream>>;

/// A bound listener and its accept task.  Dropping it stops accepting.
pub struct P2pListener {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl P2pListener {
    /// Binds `0.0.0.0:port` and starts accepting.
    ///
    /// # Errors
    ///
    /// Returns the bind error unchanged; the caller decides what a failed
    /// bind means.
    pub async fn bind(
        port: u16,
        tls: Arc<ServerConfig>,
        connections: mpsc::Sender<InboundConnection<InboundSocket>>,
        events: mpsc::UnboundedSender<ListenerEvent>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
        let local_addr = listener.local_addr()?;
        let acceptor = TlsAcceptor::from(tls);
        let task = tokio::spawn(accept_loop(listener, acceptor, connections, events));
        Ok(Self { local_addr, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The port actually bound; differs from the requested one when that
    /// was 0.
    pub fn local_port(&self) -> u16 {
        self.local_addr.port()
    }
}

impl Drop for P2pListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

async fn accept_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    connections: mpsc::Sender<InboundConnection<InboundSocket>>,
    events: mpsc::UnboundedSender<ListenerEvent>,
) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            // Nobody left to route connections to.
            _ = connections.closed() => break,
        };

        match accepted {
            Ok((stream, peer)) => {
                let _ = events.send(ListenerEvent::NewConnection { peer });
                tokio::spawn(handshake(
                    stream,
                    peer,
                    acceptor.clone(),
                    connections.clone(),
                    events.clone(),
                ));
            }
            Err(e) => {
                let _ = events.send(ListenerEvent::AcceptError {
                    detail: e.to_string(),
                });
            }
        }
    }
    trace!("accept loop stopped");
}

/// TLS accept followed by the WebSocket upgrade.  The upgrade request path
/// is captured for routing.
async fn handshake(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    connections: mpsc::Sender<InboundConnection<InboundSocket>>,
    events: mpsc::UnboundedSender<ListenerEvent>,
) {
    let tls_stream = match acceptor.accept(stream).await {
        Ok(s) => s,
        Err(e) => {
            let _ = events.send(ListenerEvent::TlsError {
                peer,
                detail: e.to_string(),
            });
            return;
        }
    };

    // Query-peer mode: a missing client certificate is reported, not fatal.
    let has_peer_cert = tls_stream
        .get_ref()
        .1
        .peer_certificates()
        .is_some_and(|certs| !certs.is_empty());
    if !has_peer_cert {
        let _ = events.send(ListenerEvent::PeerVerifyError {
            peer,
            detail: "peer presented no certificate".to_string(),
        });
    }

    let mut request_path = String::new();
    let capture_path = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        request_path = req.uri().path().to_owned();
        Ok(resp)
    };
    let socket = match accept_hdr_async(tls_stream, capture_path).await {
        Ok(ws) => ws,
        Err(e) => {
            let _ = events.send(ListenerEvent::ServerError {
                peer,
                detail: e.to_string(),
            });
            return;
        }
    };

    let conn = InboundConnection {
        peer_addr: peer,
        request_path,
        socket,
    };
    if connections.send(conn).await.is_err() {
        trace!(%peer, "broker gone; dropping accepted connection");
    }
}
