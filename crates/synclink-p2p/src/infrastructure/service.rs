//! Broker service: wires the listener, the link factory and the broker
//! together and runs the broker loop.
//!
//! # Event loop (for beginners)
//!
//! The broker is not shared between tasks.  One task owns it and reacts to
//! three channels, one at a time:
//!
//! ```text
//! listener ──(accepted connections)──┐
//! listener ──(ListenerEvent)─────────┼──► run_broker ──► ConnectionBroker
//! discovery ──(DiscoveryTuple)───────┘
//! ```
//!
//! Because only this task touches the broker, no locking is needed and the
//! operations never interleave.  Every 200 ms the loop also checks the shared
//! `running` flag (set to `false` by the Ctrl+C handler in `main.rs`); when it
//! clears, the listener is dropped and the broker shuts down, releasing its
//! port mapping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use synclink_core::DiscoveryTuple;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, info_span};

use super::identity::NodeKey;
use super::listener::{InboundSocket, P2pListener};
use super::peer_link::WsPeerLinkFactory;
use super::tls::{build_tls_configs, TlsConfigError};
use crate::application::{
    ConnectionBroker, DrainReport, FolderDirectory, InboundConnection, PortMapper,
};
use crate::domain::{LinkEvent, ListenerEvent, P2pConfig};

/// How often the loop re-checks the shutdown flag when idle.
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// Accepted connections buffered between listener and broker.
const CONNECTION_QUEUE_LEN: usize = 128;

/// Discovery tuples buffered before senders wait.
const DISCOVERY_QUEUE_LEN: usize = 256;

/// What the caller gets back from [`start_broker`].
pub struct BrokerHandles {
    /// Feed discovery tuples here.
    pub discovery: mpsc::Sender<DiscoveryTuple>,
    /// Connected / frame / closed events of every peer link.
    pub link_events: mpsc::UnboundedReceiver<LinkEvent>,
    /// Bound listener port, `None` if binding failed.
    pub listen_port: Option<u16>,
    /// The broker loop; finishes after `running` is cleared.
    pub task: JoinHandle<()>,
}

/// Builds the TLS configuration, binds the listener and starts the broker
/// loop.
///
/// A failed bind is not an error here: the broker logs it and keeps serving
/// discovery.  Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns [`TlsConfigError`] if the node identity cannot be turned into a
/// TLS configuration.
pub async fn start_broker(
    config: &P2pConfig,
    key: &NodeKey,
    directory: Arc<dyn FolderDirectory>,
    port_mapper: Arc<dyn PortMapper>,
    running: Arc<AtomicBool>,
) -> Result<BrokerHandles, TlsConfigError> {
    let tls = build_tls_configs(key)?;

    let (link_tx, link_rx) = mpsc::unbounded_channel();
    let factory = Arc::new(WsPeerLinkFactory::new(
        Arc::clone(&tls.client),
        key.digest(),
        config.connect_timeout(),
        link_tx,
    ));
    let mut broker = ConnectionBroker::new(
        key.digest(),
        directory,
        port_mapper,
        factory,
        info_span!("p2p"),
    );

    let (conn_tx, conn_rx) = mpsc::channel(CONNECTION_QUEUE_LEN);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (listener, bound) =
        match P2pListener::bind(config.listen_port, tls.server, conn_tx, event_tx).await {
            Ok(listener) => {
                let port = listener.local_port();
                (Some(listener), Ok(port))
            }
            Err(e) => (None, Err(e)),
        };
    broker.record_bind(config.listen_port, bound);
    let listen_port = broker.listen_port();

    let (discovery_tx, discovery_rx) = mpsc::channel(DISCOVERY_QUEUE_LEN);
    let task = tokio::spawn(run_broker(
        broker,
        listener,
        conn_rx,
        event_rx,
        discovery_rx,
        running,
    ));

    Ok(BrokerHandles {
        discovery: discovery_tx,
        link_events: link_rx,
        listen_port,
        task,
    })
}

async fn run_broker(
    mut broker: ConnectionBroker<InboundSocket>,
    listener: Option<P2pListener>,
    mut connections: mpsc::Receiver<InboundConnection<InboundSocket>>,
    mut listener_events: mpsc::UnboundedReceiver<ListenerEvent>,
    mut discovery: mpsc::Receiver<DiscoveryTuple>,
    running: Arc<AtomicBool>,
) {
    let mut discovery_open = true;

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping peer broker");
            break;
        }

        tokio::select! {
            Some(first) = connections.recv() => {
                let report = drain_connections(&broker, first, &mut connections);
                debug!(routed = report.routed, rejected = report.rejected, "inbound batch drained");
            }
            Some(event) = listener_events.recv() => broker.handle_listener_event(&event),
            tuple = discovery.recv(), if discovery_open => match tuple {
                Some(tuple) => {
                    broker.handle_discovered(tuple);
                }
                None => discovery_open = false,
            },
            _ = sleep(SHUTDOWN_POLL) => {}
        }
    }

    drop(listener);
    broker.shutdown();
}

/// Routes `first` and everything already waiting behind it, without
/// yielding, so one wake-up empties the queue.
fn drain_connections<S>(
    broker: &ConnectionBroker<S>,
    first: InboundConnection<S>,
    connections: &mut mpsc::Receiver<InboundConnection<S>>,
) -> DrainReport {
    let batch = std::iter::once(first).chain(std::iter::from_fn(|| connections.try_recv().ok()));
    broker.handle_connections(batch)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
