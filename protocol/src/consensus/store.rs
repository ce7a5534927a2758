//! # Proposal Store
//!
//! Round-scoped state shared between the round executor and every inbound
//! message handler.
//!
//! ## Layout
//!
//! Five maps, each behind its own lock and keyed first by round:
//!
//! | Map            | Shape                                               |
//! |----------------|-----------------------------------------------------|
//! | `proposals`    | round → hash → [`ProposalBody`]                     |
//! | `attestations` | round → hash → signer → [`Attestation`]             |
//! | `guarantees`   | round → hash → guarantor → guaranteed → [`Guarantee`] |
//! | `scores`       | round → hash → [`Score`]                            |
//! | `notifiers`    | round → bounded queue of hashes                     |
//!
//! A round's five entries are created together by [`ProposalStore::open_round`]
//! and removed together when the returned [`RoundGuard`] drops. Each method
//! takes exactly one lock and never holds it across an await, so there is no
//! lock ordering to get wrong. The price is that there are no cross-map
//! transactions: a reader can see a proposal whose score entry does not
//! exist yet.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::trace;

use super::types::{Attestation, Guarantee, ProposalBody, ProposalHash, Round, Score};
use crate::config::NOTIFY_QUEUE_CAPACITY;
use crate::crypto::NodeId;

type RoundMap<T> = RwLock<HashMap<Round, HashMap<ProposalHash, T>>>;

/// Result of inserting a proposal body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Already held; the stored body is untouched.
    Duplicate,
    /// Round not open on this node.
    RoundClosed,
}

/// Result of recording an attestation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestationOutcome {
    Inserted,
    /// Replaced an earlier attestation with a strictly lower score.
    Replaced,
    /// An attestation with an equal or higher score is already held.
    Stale,
    RoundClosed,
}

#[derive(Debug, Default)]
pub struct ProposalStore {
    proposals: RoundMap<ProposalBody>,
    attestations: RoundMap<HashMap<NodeId, Attestation>>,
    guarantees: RoundMap<HashMap<NodeId, HashMap<NodeId, Guarantee>>>,
    scores: RoundMap<Score>,
    notifiers: RwLock<HashMap<Round, mpsc::Sender<ProposalHash>>>,
}

/// Tears a round down when dropped, however the executor exits.
#[derive(Debug)]
pub struct RoundGuard {
    store: Arc<ProposalStore>,
    round: Round,
}

impl RoundGuard {
    pub fn round(&self) -> Round {
        self.round
    }
}

impl Drop for RoundGuard {
    fn drop(&mut self) {
        self.store.close_round(self.round);
    }
}

impl ProposalStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Round lifecycle
    // -----------------------------------------------------------------------

    /// Allocate every map for `round` and its notification queue.
    ///
    /// Returns `None` if the round is already open.
    pub fn open_round(
        self: &Arc<Self>,
        round: Round,
    ) -> Option<(RoundGuard, mpsc::Receiver<ProposalHash>)> {
        if self.is_open(round) {
            return None;
        }
        self.proposals.write().insert(round, HashMap::new());
        self.attestations.write().insert(round, HashMap::new());
        self.guarantees.write().insert(round, HashMap::new());
        self.scores.write().insert(round, HashMap::new());

        // The queue goes in last: it is what marks the round as open.
        let (tx, rx) = mpsc::channel(NOTIFY_QUEUE_CAPACITY);
        self.notifiers.write().insert(round, tx);
        trace!(round, "round state allocated");

        let guard = RoundGuard {
            store: Arc::clone(self),
            round,
        };
        Some((guard, rx))
    }

    /// Drop every map for `round`. Idempotent.
    pub fn close_round(&self, round: Round) {
        self.notifiers.write().remove(&round);
        self.proposals.write().remove(&round);
        self.attestations.write().remove(&round);
        self.guarantees.write().remove(&round);
        self.scores.write().remove(&round);
        trace!(round, "round state released");
    }

    /// Whether this node is running `round`.
    pub fn is_open(&self, round: Round) -> bool {
        self.notifiers.read().contains_key(&round)
    }

    /// Whether any of the five maps still holds state for `round`.
    pub fn holds_state_for(&self, round: Round) -> bool {
        self.notifiers.read().contains_key(&round)
            || self.proposals.read().contains_key(&round)
            || self.attestations.read().contains_key(&round)
            || self.guarantees.read().contains_key(&round)
            || self.scores.read().contains_key(&round)
    }

    pub fn open_rounds(&self) -> Vec<Round> {
        let mut rounds: Vec<Round> = self.notifiers.read().keys().copied().collect();
        rounds.sort_unstable();
        rounds
    }

    /// Wake the round executor for `hash`. Non-blocking: a full queue drops
    /// the notification. Returns whether it was queued.
    pub fn notify(&self, round: Round, hash: ProposalHash) -> bool {
        match self.notifiers.read().get(&round) {
            Some(tx) => tx.try_send(hash).is_ok(),
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Proposals
    // -----------------------------------------------------------------------

    /// Insert a body unless one with the same hash is already held.
    pub fn insert_proposal(
        &self,
        round: Round,
        hash: ProposalHash,
        body: ProposalBody,
    ) -> InsertOutcome {
        let mut proposals = self.proposals.write();
        let Some(by_hash) = proposals.get_mut(&round) else {
            return InsertOutcome::RoundClosed;
        };
        if by_hash.contains_key(&hash) {
            return InsertOutcome::Duplicate;
        }
        by_hash.insert(hash, body);
        InsertOutcome::Inserted
    }

    pub fn proposal(&self, round: Round, hash: &ProposalHash) -> Option<ProposalBody> {
        self.proposals.read().get(&round)?.get(hash).cloned()
    }

    /// `None` when the round is not open.
    pub fn contains_proposal(&self, round: Round, hash: &ProposalHash) -> Option<bool> {
        self.proposals
            .read()
            .get(&round)
            .map(|by_hash| by_hash.contains_key(hash))
    }

    pub fn proposal_count(&self, round: Round) -> usize {
        self.proposals.read().get(&round).map_or(0, HashMap::len)
    }

    // -----------------------------------------------------------------------
    // Attestations & guarantees
    // -----------------------------------------------------------------------

    /// Record `attestation` from `signer`, keeping only the highest score
    /// per signer. Equal scores keep the earlier one.
    pub fn record_attestation(
        &self,
        round: Round,
        hash: ProposalHash,
        signer: NodeId,
        attestation: Attestation,
    ) -> AttestationOutcome {
        let mut attestations = self.attestations.write();
        let Some(by_hash) = attestations.get_mut(&round) else {
            return AttestationOutcome::RoundClosed;
        };
        let by_signer = by_hash.entry(hash).or_default();
        match by_signer.get(&signer) {
            Some(existing) if existing.score >= attestation.score => AttestationOutcome::Stale,
            Some(_) => {
                by_signer.insert(signer, attestation);
                AttestationOutcome::Replaced
            }
            None => {
                by_signer.insert(signer, attestation);
                AttestationOutcome::Inserted
            }
        }
    }

    /// Snapshot of every attestation held for a proposal.
    pub fn attestations(&self, round: Round, hash: &ProposalHash) -> HashMap<NodeId, Attestation> {
        self.attestations
            .read()
            .get(&round)
            .and_then(|by_hash| by_hash.get(hash))
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of the guarantees held for a proposal, by guarantor. Nothing
    /// writes guarantees yet, so this is empty in practice.
    pub fn guarantees(
        &self,
        round: Round,
        hash: &ProposalHash,
    ) -> HashMap<NodeId, HashMap<NodeId, Guarantee>> {
        self.guarantees
            .read()
            .get(&round)
            .and_then(|by_hash| by_hash.get(hash))
            .cloned()
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Scores
    // -----------------------------------------------------------------------

    pub fn score(&self, round: Round, hash: &ProposalHash) -> Option<Score> {
        self.scores.read().get(&round)?.get(hash).copied()
    }

    /// Read-modify-write of a score entry under the scores lock, creating
    /// it zeroed if absent. `None` when the round is not open.
    pub fn update_score<R>(
        &self,
        round: Round,
        hash: ProposalHash,
        update: impl FnOnce(&mut Score) -> R,
    ) -> Option<R> {
        let mut scores = self.scores.write();
        let entry = scores.get_mut(&round)?.entry(hash).or_default();
        Some(update(entry))
    }

    /// Every score entry of a round.
    pub fn scores(&self, round: Round) -> Vec<(ProposalHash, Score)> {
        self.scores
            .read()
            .get(&round)
            .map(|by_hash| by_hash.iter().map(|(h, s)| (*h, *s)).collect())
            .unwrap_or_default()
    }
}
