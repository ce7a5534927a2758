//! # Round Executor
//!
//! Runs one round from start to committed winner:
//!
//! 1. **Open**: allocate round state before the round starts, so early
//!    inquiries from faster peers are answered with `Need` instead of
//!    `Refuse`.
//! 2. **Wait** for the round boundary.
//! 3. **Propose**: refresh reputation (best effort), build and sign a
//!    proposal, self-attest it, queue it for tallying.
//! 4. **Tally**: for every notified hash, recompute its weighted score. A
//!    rise of at least [`SCORE_BROADCAST_THRESHOLD`] since the last
//!    announcement triggers a rebroadcast, preceded by a fresh attestation
//!    when the proposal is not ours. Our own proposal is also announced the
//!    first time it is tallied.
//! 5. **Finalize** at the next boundary: highest score wins, ties going to
//!    the smallest proposal hash. The winner is persisted.
//!
//! Round state is released by the [`RoundGuard`](super::store::RoundGuard)
//! on every exit path, including a failed persist.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use super::gossip::GossipSender;
use super::output::{PersistError, WinnerSink};
use super::payload::generate_payload;
use super::scoring::weighted_score;
use super::store::ProposalStore;
use super::timing::{now_ms, round_reached, sleep_until_round};
use super::types::{Attestation, ProposalBody, ProposalHash, Round, Score};
use crate::config::{DEFAULT_ROUND_INTERVAL, PAYLOAD_WORDS, SCORE_BROADCAST_THRESHOLD, SELF_SCORE};
use crate::crypto::{NodeId, NodeKeypair};
use crate::directory::PeerDirectory;

#[derive(Debug, Error)]
pub enum RoundError {
    #[error("round {0} is already running")]
    AlreadyRunning(Round),

    #[error("round {0} ended without a winner")]
    NoWinner(Round),

    #[error("failed to persist winner: {0}")]
    Persist(#[from] PersistError),
}

/// Per-node round parameters.
#[derive(Debug, Clone)]
pub struct RoundConfig {
    pub interval: Duration,
    /// Redraw directory reputations at the start of every round.
    pub refresh_reputation: bool,
    /// Score attached to our own proposal.
    pub self_score: u32,
    pub payload_words: usize,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_ROUND_INTERVAL,
            refresh_reputation: true,
            self_score: SELF_SCORE,
            payload_words: PAYLOAD_WORDS,
        }
    }
}

/// What a finished round committed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundOutcome {
    pub round: Round,
    pub winner: ProposalHash,
    pub proposer: NodeId,
    pub score: u32,
    /// Proposals seen this round, ours included.
    pub proposals: usize,
}

pub struct RoundExecutor {
    keypair: Arc<NodeKeypair>,
    local: NodeId,
    store: Arc<ProposalStore>,
    directory: Arc<dyn PeerDirectory>,
    gossip: Arc<GossipSender>,
    sink: Arc<dyn WinnerSink>,
    config: RoundConfig,
}

impl RoundExecutor {
    pub fn new(
        keypair: Arc<NodeKeypair>,
        store: Arc<ProposalStore>,
        directory: Arc<dyn PeerDirectory>,
        gossip: Arc<GossipSender>,
        sink: Arc<dyn WinnerSink>,
        config: RoundConfig,
    ) -> Self {
        let local = keypair.node_id();
        Self {
            keypair,
            local,
            store,
            directory,
            gossip,
            sink,
            config,
        }
    }

    pub fn config(&self) -> &RoundConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ProposalStore> {
        &self.store
    }

    /// Run `round` to completion.
    pub async fn execute(&self, round: Round) -> Result<RoundOutcome, RoundError> {
        let interval = self.config.interval;
        let (_guard, mut updates) = self
            .store
            .open_round(round)
            .ok_or(RoundError::AlreadyRunning(round))?;

        sleep_until_round(round, interval).await;
        let own = self.propose(round);
        debug!(round, hash = %own, "proposal created");

        let deadline = round + 1;
        let mut own_announced = false;
        while !round_reached(deadline, interval) {
            tokio::select! {
                next = updates.recv() => match next {
                    Some(hash) => self.process_update(round, hash, &own, &mut own_announced),
                    // Only the store holds the sender, and only until teardown.
                    None => sleep_until_round(deadline, interval).await,
                },
                _ = sleep_until_round(deadline, interval) => {}
            }
        }

        self.finalize(round)
    }

    fn propose(&self, round: Round) -> ProposalHash {
        if self.config.refresh_reputation {
            if let Err(e) = self.directory.refresh_reputation() {
                warn!(round, error = %e, "reputation refresh failed");
            }
        }

        let payload = generate_payload(&mut rand::thread_rng(), self.config.payload_words);
        let now = now_ms();
        let (hash, body) = ProposalBody::create(&self.keypair, round, payload.into_bytes(), now);
        let attestation = Attestation::sign(&self.keypair, round, &hash, self.config.self_score, now);

        self.store.insert_proposal(round, hash, body);
        self.store.record_attestation(round, hash, self.local, attestation);
        self.store.update_score(round, hash, |score| *score = Score::default());
        self.store.notify(round, hash);
        hash
    }

    fn process_update(
        &self,
        round: Round,
        hash: ProposalHash,
        own: &ProposalHash,
        own_announced: &mut bool,
    ) {
        if self.store.contains_proposal(round, &hash) != Some(true) {
            trace!(round, hash = %hash, "attestations for unknown proposal, waiting for body");
            return;
        }

        let snapshot = match self.directory.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(round, error = %e, "reputation snapshot failed");
                return;
            }
        };
        let attestations = self.store.attestations(round, &hash);
        let tally = match weighted_score(&attestations, &snapshot) {
            Ok(tally) => tally,
            Err(e) => {
                warn!(round, hash = %hash, error = %e, "scoring failed");
                return;
            }
        };

        let is_own = hash == *own;
        let first_announcement = is_own && !*own_announced;
        let announce = self
            .store
            .update_score(round, hash, |state| {
                state.score = tally;
                let risen = tally.saturating_sub(state.last_broadcast) >= SCORE_BROADCAST_THRESHOLD;
                if first_announcement || risen {
                    state.last_broadcast = tally;
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);
        trace!(round, hash = %hash, tally, announce, "tallied");
        if !announce {
            return;
        }

        if !is_own {
            let attestation = Attestation::sign(&self.keypair, round, &hash, tally, now_ms());
            self.store.record_attestation(round, hash, self.local, attestation);
        }
        match self.gossip.broadcast(round, hash) {
            Ok(tasks) => {
                if is_own {
                    *own_announced = true;
                }
                debug!(round, hash = %hash, tally, peers = tasks.len(), "proposal broadcast");
            }
            Err(e) => warn!(round, hash = %hash, error = %e, "broadcast failed"),
        }
    }

    fn finalize(&self, round: Round) -> Result<RoundOutcome, RoundError> {
        let scores = self.store.scores(round);
        let (winner, score) = select_winner(&scores).ok_or(RoundError::NoWinner(round))?;
        let body = self
            .store
            .proposal(round, &winner)
            .ok_or(RoundError::NoWinner(round))?;

        self.sink.persist(round, &body)?;
        let outcome = RoundOutcome {
            round,
            winner,
            proposer: body.proposer_id(),
            score,
            proposals: self.store.proposal_count(round),
        };
        info!(
            round,
            winner = %winner,
            proposer = %outcome.proposer,
            score,
            proposals = outcome.proposals,
            "round finalized"
        );
        Ok(outcome)
    }
}

/// Highest score wins; equal scores go to the smallest hash.
pub fn select_winner(scores: &[(ProposalHash, Score)]) -> Option<(ProposalHash, u32)> {
    scores
        .iter()
        .min_by(|(ha, sa), (hb, sb)| sb.score.cmp(&sa.score).then_with(|| ha.cmp(hb)))
        .map(|(hash, score)| (*hash, score.score))
}
