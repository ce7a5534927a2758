//! # Scoring Engine
//!
//! A proposal's tally is the reputation-weighted sum of the scores its
//! attesters gave it:
//!
//! ```text
//! tally = Σ floor(score_i × weight_i / total_weight)
//! ```
//!
//! Each term is floored on its own, so the tally can undershoot the exact
//! weighted mean by up to one point per attester. Attesters missing from
//! the reputation snapshot contribute nothing.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{trace, warn};

use super::types::Attestation;
use crate::config::MAX_SCORE;
use crate::crypto::NodeId;
use crate::directory::ReputationSnapshot;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScoringError {
    #[error("total reputation is zero")]
    ZeroTotalReputation,
}

/// Weighted tally of `attestations` under `reputation`.
pub fn weighted_score(
    attestations: &HashMap<NodeId, Attestation>,
    reputation: &ReputationSnapshot,
) -> Result<u32, ScoringError> {
    let total = reputation.total();
    if total == 0 {
        return Err(ScoringError::ZeroTotalReputation);
    }

    let mut tally: u32 = 0;
    for (signer, attestation) in attestations {
        if attestation.score > MAX_SCORE {
            warn!(
                signer = %signer,
                score = attestation.score,
                "attestation score above maximum"
            );
        }
        let Some(weight) = reputation.weight(signer) else {
            trace!(signer = %signer, "attester has no reputation, skipped");
            continue;
        };
        // weight <= total, so the contribution never exceeds the score.
        let contribution = (attestation.score as u128 * weight as u128 / total as u128) as u32;
        // Unbounded on purpose: the sum is not clamped to MAX_SCORE.
        tally = tally.wrapping_add(contribution);
    }
    Ok(tally)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::types::ProposalHash;
    use crate::crypto::NodeKeypair;

    fn attest(kp: &NodeKeypair, score: u32) -> (NodeId, Attestation) {
        (
            kp.node_id(),
            Attestation::sign(kp, 1, &ProposalHash([0u8; 32]), score, 0),
        )
    }

    #[test]
    fn test_zero_total_fails() {
        let kp = NodeKeypair::generate();
        let atts: HashMap<_, _> = [attest(&kp, 100)].into_iter().collect();
        let snap = ReputationSnapshot::from_weights([(kp.node_id(), 0)]);
        assert_eq!(weighted_score(&atts, &snap), Err(ScoringError::ZeroTotalReputation));
    }

    #[test]
    fn test_equal_weights_average() {
        let a = NodeKeypair::generate();
        let b = NodeKeypair::generate();
        let atts: HashMap<_, _> = [attest(&a, 8_000), attest(&b, 2_000)].into_iter().collect();
        let snap = ReputationSnapshot::from_weights([(a.node_id(), 5_000), (b.node_id(), 5_000)]);
        assert_eq!(weighted_score(&atts, &snap).unwrap(), 5_000);
    }

    #[test]
    fn test_each_term_is_floored() {
        let a = NodeKeypair::generate();
        let b = NodeKeypair::generate();
        let c = NodeKeypair::generate();
        let atts: HashMap<_, _> = [attest(&a, 10), attest(&b, 10)].into_iter().collect();
        let snap = ReputationSnapshot::from_weights([
            (a.node_id(), 1),
            (b.node_id(), 1),
            (c.node_id(), 1),
        ]);
        // floor(10/3) + floor(10/3), not floor(20/3).
        assert_eq!(weighted_score(&atts, &snap).unwrap(), 6);
    }

    #[test]
    fn test_unknown_attesters_are_skipped() {
        let known = NodeKeypair::generate();
        let stranger = NodeKeypair::generate();
        let atts: HashMap<_, _> = [attest(&known, 4_000), attest(&stranger, 10_000)]
            .into_iter()
            .collect();
        let snap = ReputationSnapshot::from_weights([(known.node_id(), 7)]);
        assert_eq!(weighted_score(&atts, &snap).unwrap(), 4_000);
    }

    #[test]
    fn test_empty_attestations_score_zero() {
        let snap = ReputationSnapshot::from_weights([(NodeId([1u8; 32]), 10)]);
        assert_eq!(weighted_score(&HashMap::new(), &snap).unwrap(), 0);
    }

    #[test]
    fn test_out_of_range_scores_still_count() {
        let kp = NodeKeypair::generate();
        let atts: HashMap<_, _> = [attest(&kp, u32::MAX)].into_iter().collect();
        let snap = ReputationSnapshot::from_weights([(kp.node_id(), 1)]);
        assert_eq!(weighted_score(&atts, &snap).unwrap(), u32::MAX);
    }

    #[test]
    fn test_deterministic() {
        let signers: Vec<NodeKeypair> = (0..8).map(|_| NodeKeypair::generate()).collect();
        let atts: HashMap<_, _> = signers
            .iter()
            .enumerate()
            .map(|(i, kp)| attest(kp, 1_000 * i as u32 + 17))
            .collect();
        let snap = ReputationSnapshot::from_weights(
            signers.iter().enumerate().map(|(i, kp)| (kp.node_id(), 300 + i as u64 * 41)),
        );
        let first = weighted_score(&atts, &snap).unwrap();
        for _ in 0..10 {
            assert_eq!(weighted_score(&atts, &snap).unwrap(), first);
        }
    }
}
