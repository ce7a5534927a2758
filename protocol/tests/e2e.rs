//! End-to-end tests over real TCP sockets on the loopback interface.
//!
//! Each test binds its listeners on port 0, keeps its peer directories in
//! temporary sled trees, and tears everything down through a
//! `CancellationToken`. No shared state between tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use trustmesh_protocol::bootstrap::{BootstrapConfig, BootstrapServer};
use trustmesh_protocol::config::INITIAL_REPUTATION;
use trustmesh_protocol::consensus::{Round, RoundEvent, RoundOutcome, WinnerRecord};
use trustmesh_protocol::crypto::{NodeId, NodeKeypair};
use trustmesh_protocol::directory::{PeerDirectory, PeerRecord, PeerStatus, SledPeerDirectory};
use trustmesh_protocol::node::{Node, NodeConfig};
use trustmesh_protocol::wire::{BootstrapReply, WireMessage};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

struct TestNode {
    node: Arc<Node>,
    directory: Arc<SledPeerDirectory>,
    listener: Option<TcpListener>,
    addr: String,
    public_key: String,
    output: tempfile::TempDir,
}

async fn spawn_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

async fn test_node(keypair: NodeKeypair, configure: impl FnOnce(&mut NodeConfig)) -> TestNode {
    let (listener, addr) = spawn_listener().await;
    let output = tempfile::tempdir().unwrap();
    let directory = Arc::new(SledPeerDirectory::open_temporary().unwrap());

    let public_key = keypair.public_key().to_hex();
    let mut config = NodeConfig::new(addr.clone(), output.path());
    config.round.refresh_reputation = false;
    configure(&mut config);

    let node = Node::new(
        Arc::new(keypair),
        Arc::clone(&directory) as Arc<dyn PeerDirectory>,
        config,
    )
    .unwrap();
    TestNode {
        node: Arc::new(node),
        directory,
        listener: Some(listener),
        addr,
        public_key,
        output,
    }
}

fn introduce(directory: &SledPeerDirectory, node_id: NodeId, addr: &str) {
    directory
        .upsert(PeerRecord {
            node_id,
            address: addr.to_string(),
            reputation: INITIAL_REPUTATION,
            last_seen_ms: 0,
            status: PeerStatus::Manual,
        })
        .unwrap();
}

fn start(test: &mut TestNode, shutdown: &CancellationToken) -> tokio::task::JoinHandle<()> {
    let node = Arc::clone(&test.node);
    let listener = test.listener.take().unwrap();
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        node.run(listener, shutdown).await.unwrap();
    })
}

/// Collect finalized rounds until `count` have been committed.
async fn finalized_rounds(
    mut events: broadcast::Receiver<RoundEvent>,
    count: usize,
) -> BTreeMap<Round, RoundOutcome> {
    let mut outcomes = BTreeMap::new();
    while outcomes.len() < count {
        match events.recv().await {
            Ok(RoundEvent::Finalized(outcome)) => {
                outcomes.insert(outcome.round, outcome);
            }
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    outcomes
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_handshake_over_tcp_registers_both_sides() {
    let shutdown = CancellationToken::new();
    let a = test_node(NodeKeypair::generate(), |_| {}).await;
    let mut b = test_node(NodeKeypair::generate(), |c| {
        c.round.interval = Duration::from_secs(3_600);
    })
    .await;
    let _ = start(&mut b, &shutdown);

    let established = a.node.connector().dial(&b.addr).await.unwrap();
    assert_eq!(established.peer.node_id, b.node.node_id());
    assert!(established.handle.is_ready());
    assert_eq!(established.handle.peer(), Some(b.node.node_id()));
    assert_eq!(a.node.connection_count(), 1);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while b.node.connection_count() == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(b.node.connection_count(), 1);

    shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dial_to_closed_port_fails() {
    let a = test_node(NodeKeypair::generate(), |_| {}).await;
    let (listener, addr) = spawn_listener().await;
    drop(listener);

    assert!(a.node.connector().dial(&addr).await.is_err());
    assert_eq!(a.node.connection_count(), 0);
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bootstrap_introduces_reporters() {
    let shutdown = CancellationToken::new();
    let (bootstrap_listener, bootstrap_addr) = spawn_listener().await;
    let bootstrap_directory = Arc::new(SledPeerDirectory::open_temporary().unwrap());
    let server = BootstrapServer::new(
        Arc::new(NodeKeypair::generate()),
        Arc::clone(&bootstrap_directory) as Arc<dyn PeerDirectory>,
        BootstrapConfig {
            wait: Duration::from_millis(1_500),
            density: 4,
        },
    );
    let bootstrap = tokio::spawn(server.run(bootstrap_listener, shutdown.clone()));

    let configure = |c: &mut NodeConfig| {
        c.bootstrap = Some(bootstrap_addr.clone());
        c.round.interval = Duration::from_secs(3_600);
    };
    let mut a = test_node(NodeKeypair::generate(), configure).await;
    let mut b = test_node(NodeKeypair::generate(), configure).await;
    let _ = start(&mut a, &shutdown);
    let _ = start(&mut b, &shutdown);

    let summary = tokio::time::timeout(Duration::from_secs(15), bootstrap)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(summary.reported, 2);
    assert_eq!(summary.delivered, 2);
    assert_eq!(bootstrap_directory.len().unwrap(), 2);

    let a_id = a.node.node_id();
    let b_id = b.node.node_id();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let a_knows_b = a.directory.get(&b_id).unwrap();
        let b_knows_a = b.directory.get(&a_id).unwrap();
        if let (Some(a_knows_b), Some(b_knows_a)) = (a_knows_b, b_knows_a) {
            assert_eq!(a_knows_b.address, b.addr);
            assert_eq!(b_knows_a.address, a.addr);
            assert_eq!(a_knows_b.status, PeerStatus::Introduced);
            assert_eq!(a_knows_b.reputation, INITIAL_REPUTATION);
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "bootstrap reply never applied"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_peer_list_from_non_bootstrap_is_ignored() {
    let shutdown = CancellationToken::new();
    let stranger = test_node(NodeKeypair::generate(), |_| {}).await;
    let mut target = test_node(NodeKeypair::generate(), |c| {
        c.round.interval = Duration::from_secs(3_600);
    })
    .await;
    let _ = start(&mut target, &shutdown);

    let established = stranger.node.connector().dial(&target.addr).await.unwrap();
    let planted = NodeId([0x5Au8; 32]);
    let reply = BootstrapReply {
        peers: vec![(planted, "203.0.113.9:9740".to_string())],
    };
    established
        .handle
        .send_message(&WireMessage::BootstrapReply(reply), Duration::from_secs(1))
        .await
        .unwrap();

    // The target drops the link instead of applying the list.
    tokio::time::timeout(Duration::from_secs(5), established.handle.closed())
        .await
        .unwrap();
    assert!(target.directory.get(&planted).unwrap().is_none());

    shutdown.cancel();
}

// ---------------------------------------------------------------------------
// Rounds
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_nodes_agree_on_winner() {
    let shutdown = CancellationToken::new();
    let interval = Duration::from_secs(2);
    let mut strong = test_node(NodeKeypair::generate(), |c| {
        c.round.interval = interval;
        c.round.self_score = 9_000;
    })
    .await;
    let mut weak = test_node(NodeKeypair::generate(), |c| {
        c.round.interval = interval;
        c.round.self_score = 1_000;
    })
    .await;
    introduce(&strong.directory, weak.node.node_id(), &weak.addr);
    introduce(&weak.directory, strong.node.node_id(), &strong.addr);

    let strong_events = strong.node.subscribe();
    let weak_events = weak.node.subscribe();
    let _ = start(&mut strong, &shutdown);
    let _ = start(&mut weak, &shutdown);

    let (strong_rounds, weak_rounds) = tokio::time::timeout(Duration::from_secs(30), async {
        tokio::join!(
            finalized_rounds(strong_events, 3),
            finalized_rounds(weak_events, 3)
        )
    })
    .await
    .unwrap();
    shutdown.cancel();

    // The first round may have started before the peers could reach each
    // other; the last one both committed had the whole interval.
    let common = strong_rounds
        .keys()
        .filter(|round| weak_rounds.contains_key(round))
        .max()
        .copied()
        .unwrap();
    let on_strong = &strong_rounds[&common];
    let on_weak = &weak_rounds[&common];
    assert_eq!(on_strong.winner, on_weak.winner);
    assert_eq!(on_strong.proposer, strong.node.node_id());
    assert_eq!(on_strong.proposals, 2);
    assert_eq!(on_weak.proposals, 2);

    let file = strong.output.path().join(format!("{common}.json"));
    let record: WinnerRecord = serde_json::from_slice(&std::fs::read(file).unwrap()).unwrap();
    assert_eq!(record.proposer_pub_key, strong.public_key);
    assert!(!record.payload.is_empty());
}
