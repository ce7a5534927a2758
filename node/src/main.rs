// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # TrustMesh Node
//!
//! Entry point for the `trustmesh-node` binary. Parses CLI arguments,
//! initializes logging, and runs one of:
//!
//! - `run`: a participating peer with a Prometheus endpoint
//! - `bootstrap`: the one-shot rendezvous
//! - `init`: create the data directory and node key
//! - `version`: print build version information

mod cli;
mod logging;
mod metrics;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use trustmesh_protocol::bootstrap::{BootstrapConfig, BootstrapServer};
use trustmesh_protocol::config::{PROTOCOL_VERSION, WINNER_DIR};
use trustmesh_protocol::crypto::{FileKeyStore, KeyProvider, NodeKeypair};
use trustmesh_protocol::directory::{PeerDirectory, SledPeerDirectory};
use trustmesh_protocol::node::{Node, NodeConfig};

use cli::{Commands, TrustMeshCli};
use metrics::NodeMetrics;

/// Sub-directory of the data dir holding the sled peer directory.
const PEER_DB_DIR: &str = "peers.db";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = TrustMeshCli::parse();
    logging::init_logging(&cli.log_level, cli.log_format);

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Bootstrap(args) => run_bootstrap(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Key and peer directory shared by both node roles.
fn open_data_dir(data_dir: &Path) -> Result<(Arc<NodeKeypair>, Arc<dyn PeerDirectory>)> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let keypair = FileKeyStore::in_dir(data_dir)
        .load_or_create()
        .context("failed to load node key")?;
    let directory: Arc<dyn PeerDirectory> = Arc::new(
        SledPeerDirectory::open(data_dir.join(PEER_DB_DIR))
            .context("failed to open peer directory")?,
    );
    Ok((Arc::new(keypair), directory))
}

/// Starts a participating peer: P2P listener, round scheduler, metrics.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    let data_dir = &args.data.data_dir;
    let (keypair, directory) = open_data_dir(data_dir)?;
    let public_key = keypair.public_key().to_hex();

    let mut config = NodeConfig::new(
        format!("{}:{}", args.host, args.port),
        data_dir.join(WINNER_DIR),
    );
    config.bootstrap = args.bootstrap.clone();
    config.fanout = args.fanout;
    config.round.interval = Duration::from_secs(args.interval.max(1));
    config.round.refresh_reputation = !args.static_reputation;

    let node = Arc::new(Node::new(keypair, directory, config).context("failed to build node")?);
    tracing::info!(
        node_id = %node.node_id(),
        %public_key,
        interval_secs = args.interval,
        "trustmesh-node starting"
    );

    let listen = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind P2P port {}", listen))?;

    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], args.metrics_port));
    let metrics_listener = TcpListener::bind(metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics port {}", metrics_addr))?;
    let metrics = Arc::new(NodeMetrics::new().context("failed to create metrics registry")?);
    tracing::info!(%metrics_addr, "metrics endpoint listening");

    let shutdown = CancellationToken::new();
    let tracker = tokio::spawn(metrics::track(
        Arc::clone(&metrics),
        Arc::clone(&node),
        node.subscribe(),
        shutdown.clone(),
    ));
    let metrics_server = tokio::spawn(metrics::serve(metrics_listener, metrics, shutdown.clone()));

    let runner = {
        let node = Arc::clone(&node);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { node.run(listener, shutdown).await })
    };

    shutdown_signal().await;
    tracing::info!("shutdown signal received");
    shutdown.cancel();

    runner.await.context("node task panicked")??;
    let _ = tracker.await;
    if let Ok(Err(e)) = metrics_server.await {
        tracing::warn!(error = %e, "metrics server ended with error");
    }
    tracing::info!("trustmesh-node stopped");
    Ok(())
}

/// Runs the bootstrap rendezvous once and exits.
async fn run_bootstrap(args: cli::BootstrapArgs) -> Result<()> {
    let (keypair, directory) = open_data_dir(&args.data.data_dir)?;
    tracing::info!(node_id = %keypair.node_id(), "bootstrap node starting");

    let listen = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind bootstrap port {}", listen))?;

    let config = BootstrapConfig {
        wait: Duration::from_secs(args.wait_time),
        density: args.density,
    };
    let server = BootstrapServer::new(keypair, directory, config);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let summary = server
        .run(listener, shutdown)
        .await
        .context("bootstrap failed")?;
    println!(
        "Bootstrap finished: {} reported, {} replies delivered. This node can be stopped.",
        summary.reported, summary.delivered
    );
    Ok(())
}

/// Creates the data directory and a node key.
fn init_node(args: cli::InitArgs) -> Result<()> {
    let data_dir = &args.data.data_dir;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let store = FileKeyStore::in_dir(data_dir);
    if store.exists() && !args.force {
        anyhow::bail!(
            "{} already exists; pass --force to replace it",
            store.path().display()
        );
    }
    let keypair = NodeKeypair::generate();
    store
        .store(&keypair)
        .with_context(|| format!("failed to write node key to {}", store.path().display()))?;

    println!("Node initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Key file       : {}", store.path().display());
    println!("  Public key     : {}", keypair.public_key().to_hex());
    println!("  Node id        : {}", keypair.node_id().to_hex());
    Ok(())
}

fn print_version() {
    println!("trustmesh-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol       {}", PROTOCOL_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trustmesh_protocol::crypto::keystore::SEED_FILE;

    fn init_args(data_dir: &Path, force: bool) -> cli::InitArgs {
        cli::InitArgs {
            data: cli::DataDirArg {
                data_dir: data_dir.to_path_buf(),
            },
            force,
        }
    }

    #[test]
    fn init_writes_seed_and_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("node-a");

        init_node(init_args(&data_dir, false)).unwrap();
        let seed_path = data_dir.join(SEED_FILE);
        let first = std::fs::read_to_string(&seed_path).unwrap();
        assert_eq!(first.trim().len(), 64);

        assert!(init_node(init_args(&data_dir, false)).is_err());
        assert_eq!(std::fs::read_to_string(&seed_path).unwrap(), first);

        init_node(init_args(&data_dir, true)).unwrap();
        assert_ne!(std::fs::read_to_string(&seed_path).unwrap(), first);
    }

    #[test]
    fn open_data_dir_reuses_initialized_key() {
        let dir = tempfile::tempdir().unwrap();
        init_node(init_args(dir.path(), false)).unwrap();
        let stored = FileKeyStore::in_dir(dir.path()).load().unwrap();

        let (keypair, directory) = open_data_dir(dir.path()).unwrap();
        assert_eq!(keypair.node_id(), stored.node_id());
        assert!(directory.is_empty().unwrap());
        assert!(dir.path().join(PEER_DB_DIR).exists());
    }
}
