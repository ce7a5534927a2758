//! # Node Runtime
//!
//! Wires the pieces of a participating node together:
//!
//! ```text
//!   TcpListener ──► serve ──► run_connection ──► MessageRouter ──► ProposalStore
//!                                                                     ▲   │
//!   run_scheduler ──► RoundExecutor ──► GossipSender ──► TcpConnector │   │
//!                          │                                          │   │
//!                          └──────────────── notify ◄─────────────────┘   │
//!                          └──► JsonWinnerSink ◄──────── finalize ────────┘
//! ```
//!
//! The node owns nothing that outlives a round except connections, the
//! peer directory and its keypair.

pub mod router;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bootstrap::report_to_bootstrap;
use crate::config::{GOSSIP_FANOUT, INITIAL_REPUTATION};
use crate::consensus::timing::now_ms;
use crate::consensus::{
    run_scheduler, GossipSender, JsonWinnerSink, ProposalStore, RoundConfig, RoundEvent,
    RoundExecutor,
};
use crate::crypto::{NodeId, NodeKeypair};
use crate::directory::{DirectoryError, DirectoryResult, PeerDirectory, PeerRecord, PeerStatus};
use crate::p2p::{serve, ConnectionContext, ConnectionTable, TcpConnector};

pub use router::{BundleReport, MessageRouter};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("peer directory error: {0}")]
    Directory(#[from] DirectoryError),
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address other nodes dial to reach us.
    pub advertise: String,
    /// Rendezvous node to report to at startup.
    pub bootstrap: Option<String>,
    /// Directory receiving `<round>.json` winner files.
    pub output_dir: PathBuf,
    pub fanout: usize,
    pub round: RoundConfig,
}

impl NodeConfig {
    pub fn new(advertise: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            advertise: advertise.into(),
            bootstrap: None,
            output_dir: output_dir.into(),
            fanout: GOSSIP_FANOUT,
            round: RoundConfig::default(),
        }
    }
}

pub struct Node {
    keypair: Arc<NodeKeypair>,
    directory: Arc<dyn PeerDirectory>,
    table: Arc<ConnectionTable>,
    store: Arc<ProposalStore>,
    ctx: Arc<ConnectionContext>,
    connector: TcpConnector,
    executor: Arc<RoundExecutor>,
    events: broadcast::Sender<RoundEvent>,
    config: NodeConfig,
}

impl Node {
    pub fn new(
        keypair: Arc<NodeKeypair>,
        directory: Arc<dyn PeerDirectory>,
        config: NodeConfig,
    ) -> Result<Self, NodeError> {
        record_self(directory.as_ref(), keypair.node_id(), &config.advertise)?;

        let table = Arc::new(ConnectionTable::new());
        let store = Arc::new(ProposalStore::new());
        let router = Arc::new(MessageRouter::new(Arc::clone(&store)));
        let ctx = Arc::new(ConnectionContext {
            keypair: Arc::clone(&keypair),
            table: Arc::clone(&table),
            directory: Arc::clone(&directory),
            handler: Some(router),
            reports: None,
            bootstrap_peer: Default::default(),
        });
        let connector = TcpConnector::new(Arc::clone(&ctx));
        let gossip = Arc::new(GossipSender::new(
            keypair.node_id(),
            Arc::clone(&store),
            Arc::clone(&directory),
            Arc::new(connector.clone()),
            config.fanout,
        ));
        let executor = Arc::new(RoundExecutor::new(
            Arc::clone(&keypair),
            Arc::clone(&store),
            Arc::clone(&directory),
            gossip,
            Arc::new(JsonWinnerSink::new(config.output_dir.clone())),
            config.round.clone(),
        ));
        let (events, _) = broadcast::channel(256);

        Ok(Self {
            keypair,
            directory,
            table,
            store,
            ctx,
            connector,
            executor,
            events,
            config,
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.keypair.node_id()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn connection_count(&self) -> usize {
        self.table.len()
    }

    pub fn known_peers(&self) -> DirectoryResult<usize> {
        self.directory.len()
    }

    pub fn store(&self) -> &Arc<ProposalStore> {
        &self.store
    }

    pub fn executor(&self) -> &Arc<RoundExecutor> {
        &self.executor
    }

    pub fn connector(&self) -> &TcpConnector {
        &self.connector
    }

    /// Round events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RoundEvent> {
        self.events.subscribe()
    }

    /// Accept peers on `listener`, report to the bootstrap node if one is
    /// configured, and run rounds until `shutdown` fires.
    pub async fn run(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<(), NodeError> {
        let local = listener.local_addr()?;
        info!(
            node_id = %self.node_id(),
            %local,
            advertise = %self.config.advertise,
            "node starting"
        );
        let accept = tokio::spawn(serve(listener, Arc::clone(&self.ctx), shutdown.clone()));

        if let Some(bootstrap) = self.config.bootstrap.clone() {
            let connector = self.connector.clone();
            let advertise = self.config.advertise.clone();
            tokio::spawn(async move {
                if let Err(e) = report_to_bootstrap(&connector, &bootstrap, &advertise).await {
                    warn!(%bootstrap, error = %e, "bootstrap report failed");
                }
            });
        }

        run_scheduler(Arc::clone(&self.executor), self.events.clone(), shutdown).await;
        let _ = accept.await;
        info!("node stopped");
        Ok(())
    }
}

/// Make sure the local node is in its own directory so its attestations
/// are weighted. An existing entry keeps its reputation.
fn record_self(directory: &dyn PeerDirectory, node_id: NodeId, advertise: &str) -> DirectoryResult<()> {
    let reputation = directory
        .reputation_of(&node_id)?
        .unwrap_or(INITIAL_REPUTATION);
    directory.upsert(PeerRecord {
        node_id,
        address: advertise.to_string(),
        reputation,
        last_seen_ms: now_ms(),
        status: PeerStatus::Manual,
    })
}
