//! synclink peer broker: entry point.
//!
//! Runs the peer connection broker on its own: loads (or creates) the node
//! identity, hosts the configured folders, listens for peers and dials the
//! statically configured ones as if discovery had announced them.
//!
//! # Usage
//!
//! ```text
//! synclink-p2p [OPTIONS]
//!
//! Options:
//!   --config <PATH>            TOML configuration file
//!   --listen-port <PORT>       Listener port, 0 for any [default: 42345]
//!   --cert <PATH>              Node certificate (PEM) [default: identity/cert.pem]
//!   --key <PATH>               Node private key (PEM) [default: identity/key.pem]
//!   --folder <HEX>             Host a folder; repeatable
//!   --peer <HEX>@<IP>:<PORT>   Dial a peer for a folder; repeatable.  The
//!                              URL form wss://<IP>:<PORT>/<HEX> also works
//!   --connect-timeout <SECS>   Outbound TCP connect timeout [default: 10]
//!   --log-level <LEVEL>        Log level when RUST_LOG is unset [default: info]
//! ```
//!
//! # Precedence
//!
//! Built-in defaults, then the configuration file (a missing file counts as
//! empty), then environment
//! variables, then command-line flags.  Folders and peers given on the
//! command line are added to those from the file.
//!
//! | Variable                    | Flag                |
//! |-----------------------------|---------------------|
//! | `SYNCLINK_CONFIG`           | `--config`          |
//! | `SYNCLINK_LISTEN_PORT`      | `--listen-port`     |
//! | `SYNCLINK_CERT`             | `--cert`            |
//! | `SYNCLINK_KEY`              | `--key`             |
//! | `SYNCLINK_CONNECT_TIMEOUT`  | `--connect-timeout` |
//! | `SYNCLINK_LOG_LEVEL`        | `--log-level`       |

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use synclink_core::FolderId;
use tracing::{error, info, trace, warn};
use tracing_subscriber::EnvFilter;

use synclink_p2p::domain::{LinkEvent, P2pConfig, StaticPeer};
use synclink_p2p::infrastructure::{
    load_or_default, start_broker, BrokerHandles, LocalPortMapper, NodeKey, StaticFolderDirectory,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// synclink peer connection broker.
#[derive(Debug, Parser)]
#[command(
    name = "synclink-p2p",
    about = "Peer connection broker for synclink folder synchronization",
    version
)]
struct Cli {
    /// TOML configuration file.  Built-in defaults apply when it is absent.
    #[arg(long, env = "SYNCLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Port to accept peers on; 0 lets the OS choose.
    #[arg(long, env = "SYNCLINK_LISTEN_PORT")]
    listen_port: Option<u16>,

    /// Node certificate in PEM format.  Generated on first start if missing.
    #[arg(long, env = "SYNCLINK_CERT")]
    cert: Option<PathBuf>,

    /// Node private key in PEM format.  Generated on first start if missing.
    #[arg(long, env = "SYNCLINK_KEY")]
    key: Option<PathBuf>,

    /// Folder to host, as a hex folder id.  May be repeated.
    #[arg(long = "folder", value_name = "HEX")]
    folders: Vec<FolderId>,

    /// Peer to dial, as `<folder hex>@<ip>:<port>` or a `wss://` peer URL.
    /// May be repeated.
    #[arg(long = "peer", value_name = "HEX@IP:PORT")]
    peers: Vec<StaticPeer>,

    /// Outbound TCP connect timeout in seconds.
    #[arg(long, env = "SYNCLINK_CONNECT_TIMEOUT")]
    connect_timeout: Option<u64>,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, env = "SYNCLINK_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    /// Applies the command-line values on top of `base`.
    fn apply_to(self, mut base: P2pConfig) -> P2pConfig {
        if let Some(port) = self.listen_port {
            base.listen_port = port;
        }
        if let Some(cert) = self.cert {
            base.identity.cert_path = cert;
        }
        if let Some(key) = self.key {
            base.identity.key_path = key;
        }
        if let Some(secs) = self.connect_timeout {
            base.connect_timeout_secs = secs;
        }
        if let Some(level) = self.log_level {
            base.log_level = level;
        }
        for folder in self.folders {
            if !base.folders.contains(&folder) {
                base.folders.push(folder);
            }
        }
        base.peers.extend(self.peers);
        base
    }

    /// Loads the configuration file, if any, and applies the CLI on top.
    fn into_p2p_config(self) -> anyhow::Result<P2pConfig> {
        let base = match &self.config {
            Some(path) => load_or_default(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => P2pConfig::default(),
        };
        Ok(self.apply_to(base))
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_p2p_config()?;

    // RUST_LOG wins; otherwise the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let key = NodeKey::load_or_generate(&config.identity.cert_path, &config.identity.key_path)
        .context("failed to load node identity")?;

    let directory = Arc::new(StaticFolderDirectory::from_ids(config.folders.iter().cloned()));
    info!(
        "synclink peer broker starting: node={}, folders={}, peers={}",
        key.digest(),
        directory.len(),
        config.peers.len()
    );
    if directory.is_empty() {
        warn!("no folders configured; every peer connection will be rejected");
    }
    let port_mapper = Arc::new(LocalPortMapper::new());

    // ── Graceful shutdown flag ─────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    let BrokerHandles {
        discovery,
        mut link_events,
        listen_port,
        mut task,
    } = start_broker(
        &config,
        &key,
        directory.clone(),
        port_mapper,
        Arc::clone(&running),
    )
    .await
    .context("failed to start peer broker")?;

    match listen_port {
        Some(port) => info!("accepting peers on port {port}"),
        None => info!("not accepting peers; outbound connections only"),
    }

    // Static peers go through the same path as discovered ones.
    for peer in &config.peers {
        discovery
            .send(peer.to_discovery_tuple())
            .await
            .context("peer broker stopped during startup")?;
    }

    loop {
        tokio::select! {
            Some(event) = link_events.recv() => {
                log_link_event(&event);
                if let LinkEvent::Closed { link_id, .. } = event {
                    directory.detach(link_id);
                }
            }
            _ = &mut task => break,
        }
    }

    directory.close_all();
    info!("synclink peer broker stopped");
    Ok(())
}

fn log_link_event(event: &LinkEvent) {
    match event {
        LinkEvent::Connected {
            link_id,
            folder_id,
            remote,
            remote_digest,
        } => match remote_digest {
            Some(digest) => {
                info!(%link_id, folder = %folder_id, %remote, peer = %digest, "peer link connected")
            }
            None => info!(%link_id, folder = %folder_id, %remote, "peer link connected"),
        },
        LinkEvent::Frame { link_id, data } => {
            trace!(%link_id, len = data.len(), "frame received");
        }
        LinkEvent::Closed { link_id, reason } => {
            info!(%link_id, %reason, "peer link closed");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
