//! # Bootstrap Rendezvous
//!
//! How a fresh network finds itself. One node runs in bootstrap mode; every
//! other node dials it once and reports the address it listens on.
//!
//! ```text
//!   node                         bootstrap
//!    |-- handshake ----------------->|
//!    |-- BootstrapReport(addr) ----->|   (bootstrap closes the link)
//!    |                               |   ... collect reports for `wait` ...
//!    |<---------------- handshake ---|
//!    |<-- BootstrapReply(peers) -----|   (node applies, closes the link)
//! ```
//!
//! Each reporter is handed up to `density` random other reporters. Edges are
//! made mutual, so a node can end up with more than `density` entries.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{
    DEFAULT_BOOTSTRAP_DENSITY, DEFAULT_BOOTSTRAP_WAIT, INITIAL_REPUTATION, IO_DEADLINE,
    QUEUE_SEND_TIMEOUT,
};
use crate::consensus::timing::now_ms;
use crate::crypto::{NodeId, NodeKeypair};
use crate::directory::{DirectoryError, PeerDirectory, PeerRecord, PeerStatus};
use crate::p2p::{serve, ConnectionContext, ConnectionTable, P2pError, PeerReport, TcpConnector};
use crate::wire::{BootstrapReply, BootstrapReport, WireMessage};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("peer error: {0}")]
    P2p(#[from] P2pError),

    #[error("peer directory error: {0}")]
    Directory(#[from] DirectoryError),
}

// ---------------------------------------------------------------------------
// Node side
// ---------------------------------------------------------------------------

/// Upsert every peer listed in a bootstrap reply. Known peers keep their
/// reputation. Returns how many records were written.
pub fn apply_reply(directory: &dyn PeerDirectory, reply: &BootstrapReply) -> usize {
    let now = now_ms();
    let mut written = 0;
    for (node_id, address) in &reply.peers {
        let reputation = match directory.reputation_of(node_id) {
            Ok(existing) => existing.unwrap_or(INITIAL_REPUTATION),
            Err(e) => {
                warn!(peer = %node_id, error = %e, "directory lookup failed");
                continue;
            }
        };
        let record = PeerRecord {
            node_id: *node_id,
            address: address.clone(),
            reputation,
            last_seen_ms: now,
            status: PeerStatus::Introduced,
        };
        match directory.upsert(record) {
            Ok(()) => written += 1,
            Err(e) => warn!(peer = %node_id, error = %e, "failed to record introduced peer"),
        }
    }
    info!(peers = written, "bootstrap reply received");
    written
}

/// Dial the bootstrap node and report `advertise` as our listening
/// address. Returns the bootstrap node's identity.
pub async fn report_to_bootstrap(
    connector: &TcpConnector,
    bootstrap_addr: &str,
    advertise: &str,
) -> Result<NodeId, BootstrapError> {
    let established = connector.dial(bootstrap_addr).await?;
    // Only this identity may hand us peers.
    connector.context().trust_bootstrap(established.peer.node_id);
    let report = WireMessage::BootstrapReport(BootstrapReport {
        address: advertise.to_string(),
    });
    established
        .handle
        .send_message(&report, QUEUE_SEND_TIMEOUT)
        .await?;
    info!(bootstrap = %established.peer.node_id, advertise, "reported to bootstrap node");
    Ok(established.peer.node_id)
}

// ---------------------------------------------------------------------------
// Bootstrap side
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// How long to collect reports before replying.
    pub wait: Duration,
    /// Peers handed to each reporter.
    pub density: usize,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            wait: DEFAULT_BOOTSTRAP_WAIT,
            density: DEFAULT_BOOTSTRAP_DENSITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BootstrapSummary {
    pub reported: usize,
    pub delivered: usize,
}

/// Random peer assignment over the reporters. No node is assigned itself,
/// no pair appears twice, and every edge goes both ways.
pub fn assign_peers<R: Rng>(
    nodes: &BTreeMap<NodeId, String>,
    density: usize,
    rng: &mut R,
) -> BTreeMap<NodeId, Vec<(NodeId, String)>> {
    let ids: Vec<NodeId> = nodes.keys().copied().collect();
    let mut edges: BTreeMap<NodeId, BTreeSet<NodeId>> =
        ids.iter().map(|id| (*id, BTreeSet::new())).collect();

    for id in &ids {
        let others: Vec<NodeId> = ids.iter().filter(|other| *other != id).copied().collect();
        for other in others.choose_multiple(rng, density) {
            edges.entry(*id).or_default().insert(*other);
            edges.entry(*other).or_default().insert(*id);
        }
    }

    edges
        .into_iter()
        .map(|(id, peers)| {
            let peers = peers
                .into_iter()
                .filter_map(|peer| nodes.get(&peer).map(|addr| (peer, addr.clone())))
                .collect();
            (id, peers)
        })
        .collect()
}

/// One-shot rendezvous server.
pub struct BootstrapServer {
    ctx: Arc<ConnectionContext>,
    reports: mpsc::Receiver<PeerReport>,
    config: BootstrapConfig,
}

impl BootstrapServer {
    pub fn new(
        keypair: Arc<NodeKeypair>,
        directory: Arc<dyn PeerDirectory>,
        config: BootstrapConfig,
    ) -> Self {
        let (tx, reports) = mpsc::channel(1024);
        let ctx = Arc::new(ConnectionContext {
            keypair,
            table: Arc::new(ConnectionTable::new()),
            directory,
            handler: None,
            reports: Some(tx),
            bootstrap_peer: Default::default(),
        });
        Self {
            ctx,
            reports,
            config,
        }
    }

    /// Collect reports on `listener` for the configured wait, then send
    /// every reporter its peer list. Returns early, without replying, if
    /// `shutdown` fires first.
    pub async fn run(
        mut self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<BootstrapSummary, BootstrapError> {
        let accept_stop = shutdown.child_token();
        let accept = tokio::spawn(serve(listener, Arc::clone(&self.ctx), accept_stop.clone()));

        info!(
            wait_secs = self.config.wait.as_secs(),
            density = self.config.density,
            "collecting bootstrap reports"
        );
        let nodes = tokio::select! {
            _ = shutdown.cancelled() => None,
            nodes = self.collect() => Some(nodes?),
        };
        accept_stop.cancel();
        let _ = accept.await;

        let Some(nodes) = nodes else {
            info!("bootstrap interrupted before replying");
            return Ok(BootstrapSummary::default());
        };

        let assignment = assign_peers(&nodes, self.config.density, &mut rand::thread_rng());
        let connector = TcpConnector::new(Arc::clone(&self.ctx));
        let mut tasks = Vec::with_capacity(assignment.len());
        for (node_id, peers) in assignment {
            let Some(addr) = nodes.get(&node_id).cloned() else {
                continue;
            };
            let connector = connector.clone();
            tasks.push(tokio::spawn(async move {
                let result = deliver_reply(&connector, &addr, BootstrapReply { peers }).await;
                if let Err(e) = &result {
                    warn!(peer = %node_id, %addr, error = %e, "bootstrap reply failed");
                }
                result.is_ok()
            }));
        }

        let mut delivered = 0;
        for task in tasks {
            if matches!(task.await, Ok(true)) {
                delivered += 1;
            }
        }
        let summary = BootstrapSummary {
            reported: nodes.len(),
            delivered,
        };
        info!(reported = summary.reported, delivered, "bootstrap complete");
        Ok(summary)
    }

    async fn collect(&mut self) -> Result<BTreeMap<NodeId, String>, BootstrapError> {
        let deadline = tokio::time::Instant::now() + self.config.wait;
        let mut nodes = BTreeMap::new();
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                report = self.reports.recv() => {
                    let Some(report) = report else { break };
                    debug!(peer = %report.node_id, address = %report.address, "bootstrap report");
                    self.ctx.directory.upsert(PeerRecord {
                        node_id: report.node_id,
                        address: report.address.clone(),
                        reputation: INITIAL_REPUTATION,
                        last_seen_ms: now_ms(),
                        status: PeerStatus::Reported,
                    })?;
                    nodes.insert(report.node_id, report.address);
                }
            }
        }
        Ok(nodes)
    }
}

async fn deliver_reply(
    connector: &TcpConnector,
    addr: &str,
    reply: BootstrapReply,
) -> Result<(), BootstrapError> {
    let established = connector.dial(addr).await?;
    let handle = established.handle;
    handle
        .send_message(&WireMessage::BootstrapReply(reply), QUEUE_SEND_TIMEOUT)
        .await?;
    // The receiver closes once it has applied the reply.
    if tokio::time::timeout(IO_DEADLINE, handle.closed()).await.is_err() {
        debug!(%addr, "reporter kept the bootstrap link open");
        handle.close();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::SledPeerDirectory;

    fn nodes(n: u8) -> BTreeMap<NodeId, String> {
        (1..=n)
            .map(|i| (NodeId([i; 32]), format!("10.0.0.{}:9740", i)))
            .collect()
    }

    #[test]
    fn test_assignment_has_no_self_edges_and_is_mutual() {
        let nodes = nodes(12);
        let assignment = assign_peers(&nodes, 3, &mut rand::thread_rng());
        assert_eq!(assignment.len(), 12);

        for (id, peers) in &assignment {
            assert!(peers.len() >= 3);
            let unique: BTreeSet<NodeId> = peers.iter().map(|(p, _)| *p).collect();
            assert_eq!(unique.len(), peers.len());
            assert!(!unique.contains(id));
            for (peer, addr) in peers {
                assert_eq!(&nodes[peer], addr);
                assert!(assignment[peer].iter().any(|(back, _)| back == id));
            }
        }
    }

    #[test]
    fn test_density_larger_than_network() {
        let nodes = nodes(3);
        let assignment = assign_peers(&nodes, 8, &mut rand::thread_rng());
        for peers in assignment.values() {
            assert_eq!(peers.len(), 2);
        }
    }

    #[test]
    fn test_single_reporter_gets_empty_list() {
        let assignment = assign_peers(&nodes(1), 8, &mut rand::thread_rng());
        assert_eq!(assignment.len(), 1);
        assert!(assignment.values().all(Vec::is_empty));
    }

    #[test]
    fn test_apply_reply_keeps_known_reputation() {
        let directory = SledPeerDirectory::open_temporary().unwrap();
        let known = NodeId([1u8; 32]);
        directory
            .upsert(PeerRecord {
                node_id: known,
                address: "old:1".into(),
                reputation: 42,
                last_seen_ms: 0,
                status: PeerStatus::Manual,
            })
            .unwrap();

        let reply = BootstrapReply {
            peers: vec![
                (known, "new:1".into()),
                (NodeId([2u8; 32]), "fresh:2".into()),
            ],
        };
        assert_eq!(apply_reply(&directory, &reply), 2);

        let known_record = directory.get(&known).unwrap().unwrap();
        assert_eq!(known_record.address, "new:1");
        assert_eq!(known_record.reputation, 42);
        assert_eq!(known_record.status, PeerStatus::Introduced);

        let fresh = directory.get(&NodeId([2u8; 32])).unwrap().unwrap();
        assert_eq!(fresh.reputation, INITIAL_REPUTATION);
    }
}
