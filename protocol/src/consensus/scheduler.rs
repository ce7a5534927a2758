//! Round scheduler: starts one executor per round, back to back, until
//! shutdown. Rounds overlap: round `r + 1` is opened while `r` is still
//! tallying, so its state exists before its first inquiry can arrive.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::executor::{RoundExecutor, RoundOutcome};
use super::timing::next_round_to_run;
use super::types::Round;

/// Round lifecycle notifications, for metrics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundEvent {
    Started(Round),
    Finalized(RoundOutcome),
    Failed { round: Round, reason: String },
}

/// Drive rounds until `shutdown` fires. Rounds already spawned keep
/// running to their own deadline.
pub async fn run_scheduler(
    executor: Arc<RoundExecutor>,
    events: broadcast::Sender<RoundEvent>,
    shutdown: CancellationToken,
) {
    let interval = executor.config().interval;
    let mut target: Round = 0;
    info!(interval_ms = interval.as_millis() as u64, "round scheduler starting");

    loop {
        let round = tokio::select! {
            _ = shutdown.cancelled() => break,
            round = next_round_to_run(target, interval) => round,
        };

        let _ = events.send(RoundEvent::Started(round));
        let executor = Arc::clone(&executor);
        let events = events.clone();
        tokio::spawn(async move {
            let event = match executor.execute(round).await {
                Ok(outcome) => RoundEvent::Finalized(outcome),
                Err(e) => {
                    error!(round, error = %e, "round failed");
                    RoundEvent::Failed {
                        round,
                        reason: e.to_string(),
                    }
                }
            };
            let _ = events.send(event);
        });

        target = round + 1;
    }
    info!("round scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::executor::RoundConfig;
    use crate::consensus::gossip::GossipSender;
    use crate::consensus::output::JsonWinnerSink;
    use crate::consensus::store::ProposalStore;
    use crate::crypto::{NodeId, NodeKeypair};
    use crate::directory::{PeerDirectory, PeerRecord, PeerStatus, SledPeerDirectory};
    use crate::p2p::{IoHandle, P2pError, PeerConnector};
    use async_trait::async_trait;
    use std::time::Duration;

    struct NoNetwork;

    #[async_trait]
    impl PeerConnector for NoNetwork {
        async fn connect(&self, peer: NodeId) -> Result<Arc<IoHandle>, P2pError> {
            Err(P2pError::UnknownPeer(peer))
        }
    }

    #[tokio::test]
    async fn test_consecutive_rounds_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let keypair = Arc::new(NodeKeypair::generate());
        let directory: Arc<dyn PeerDirectory> = Arc::new(SledPeerDirectory::open_temporary().unwrap());
        directory
            .upsert(PeerRecord {
                node_id: keypair.node_id(),
                address: "127.0.0.1:0".into(),
                reputation: 1,
                last_seen_ms: 0,
                status: PeerStatus::Manual,
            })
            .unwrap();
        let store = Arc::new(ProposalStore::new());
        let gossip = Arc::new(GossipSender::new(
            keypair.node_id(),
            Arc::clone(&store),
            Arc::clone(&directory),
            Arc::new(NoNetwork),
            1,
        ));
        let executor = Arc::new(RoundExecutor::new(
            keypair,
            store,
            directory,
            gossip,
            Arc::new(JsonWinnerSink::new(dir.path())),
            RoundConfig {
                interval: Duration::from_millis(300),
                refresh_reputation: false,
                ..RoundConfig::default()
            },
        ));

        let (events, mut rx) = broadcast::channel(64);
        let shutdown = CancellationToken::new();
        let scheduler = tokio::spawn(run_scheduler(executor, events, shutdown.clone()));

        let mut finalized: Vec<Round> = Vec::new();
        while finalized.len() < 2 {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            match event {
                RoundEvent::Finalized(outcome) => finalized.push(outcome.round),
                RoundEvent::Failed { round, reason } => panic!("round {round} failed: {reason}"),
                RoundEvent::Started(_) => {}
            }
        }
        shutdown.cancel();
        scheduler.await.unwrap();

        assert_eq!(finalized[1], finalized[0] + 1);
        assert!(dir.path().join(format!("{}.json", finalized[0])).exists());
    }
}
