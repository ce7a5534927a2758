//! # Consensus Data Model
//!
//! Proposals, attestations, guarantees and local score state, plus the
//! signed digests that bind them to a round.
//!
//! | Item        | Signed digest                                          |
//! |-------------|--------------------------------------------------------|
//! | Proposal    | `blake3(PROPOSER_DOMAIN ‖ round ‖ proposal_hash)`      |
//! | Attestation | `blake3(ATTESTATION_DOMAIN ‖ round ‖ hash ‖ score ‖ ts)` |
//!
//! The proposal hash itself is the untagged content hash
//! `blake3(round ‖ proposer_node_id ‖ timestamp ‖ payload)`.

use std::fmt;

use thiserror::Error;

use crate::config::{ATTESTATION_DOMAIN, HASH_OUTPUT_LENGTH, PROPOSER_DOMAIN};
use crate::crypto::{DomainHasher, NodeId, NodeKeypair, NodePublicKey, NodeSignature};

/// Round index: `floor(unix_ms / interval_ms)`.
pub type Round = u64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("proposer signature does not verify")]
    Proposer,

    #[error("attestation signature from {0} does not verify")]
    Attestation(NodeId),
}

// ---------------------------------------------------------------------------
// ProposalHash
// ---------------------------------------------------------------------------

/// Content address of a proposal within a round.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProposalHash(pub [u8; HASH_OUTPUT_LENGTH]);

impl ProposalHash {
    pub fn as_bytes(&self) -> &[u8; HASH_OUTPUT_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ProposalHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for ProposalHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProposalHash({})", self)
    }
}

// ---------------------------------------------------------------------------
// ProposalBody
// ---------------------------------------------------------------------------

/// A signed candidate for a round. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalBody {
    pub proposer: NodePublicKey,
    pub payload: Vec<u8>,
    /// Creation time in unix milliseconds.
    pub timestamp: u64,
    pub signature: NodeSignature,
}

impl ProposalBody {
    /// Build and sign a proposal. Returns the proposal together with its
    /// content hash so callers never recompute it.
    pub fn create(
        keypair: &NodeKeypair,
        round: Round,
        payload: Vec<u8>,
        timestamp: u64,
    ) -> (ProposalHash, Self) {
        let proposer = keypair.public_key();
        let hash = content_hash(round, &proposer.node_id(), timestamp, &payload);
        let signature = keypair.sign(&proposer_digest(round, &hash));
        let body = Self {
            proposer,
            payload,
            timestamp,
            signature,
        };
        (hash, body)
    }

    /// Content hash of this proposal in `round`.
    pub fn hash(&self, round: Round) -> ProposalHash {
        content_hash(round, &self.proposer_id(), self.timestamp, &self.payload)
    }

    pub fn proposer_id(&self) -> NodeId {
        self.proposer.node_id()
    }

    /// Recompute the hash and check the proposer signature over it.
    pub fn verify(&self, round: Round) -> Result<ProposalHash, SignatureError> {
        let hash = self.hash(round);
        if self
            .proposer
            .verify(&proposer_digest(round, &hash), &self.signature)
        {
            Ok(hash)
        } else {
            Err(SignatureError::Proposer)
        }
    }
}

fn content_hash(round: Round, proposer: &NodeId, timestamp: u64, payload: &[u8]) -> ProposalHash {
    ProposalHash(
        DomainHasher::untagged()
            .u64(round)
            .bytes(proposer.as_bytes())
            .u64(timestamp)
            .bytes(payload)
            .finish(),
    )
}

fn proposer_digest(round: Round, hash: &ProposalHash) -> [u8; 32] {
    DomainHasher::new(PROPOSER_DOMAIN)
        .u64(round)
        .bytes(hash.as_bytes())
        .finish()
}

// ---------------------------------------------------------------------------
// Attestation
// ---------------------------------------------------------------------------

/// A signed score one node assigns to one proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attestation {
    pub signer: NodePublicKey,
    pub score: u32,
    pub timestamp: u64,
    pub signature: NodeSignature,
}

impl Attestation {
    pub fn sign(
        keypair: &NodeKeypair,
        round: Round,
        hash: &ProposalHash,
        score: u32,
        timestamp: u64,
    ) -> Self {
        let signature = keypair.sign(&attestation_digest(round, hash, score, timestamp));
        Self {
            signer: keypair.public_key(),
            score,
            timestamp,
            signature,
        }
    }

    pub fn signer_id(&self) -> NodeId {
        self.signer.node_id()
    }

    pub fn verify(&self, round: Round, hash: &ProposalHash) -> Result<(), SignatureError> {
        let digest = attestation_digest(round, hash, self.score, self.timestamp);
        if self.signer.verify(&digest, &self.signature) {
            Ok(())
        } else {
            Err(SignatureError::Attestation(self.signer_id()))
        }
    }
}

fn attestation_digest(round: Round, hash: &ProposalHash, score: u32, timestamp: u64) -> [u8; 32] {
    DomainHasher::new(ATTESTATION_DOMAIN)
        .u64(round)
        .bytes(hash.as_bytes())
        .u32(score)
        .u64(timestamp)
        .finish()
}

// ---------------------------------------------------------------------------
// Guarantee / Score
// ---------------------------------------------------------------------------

/// Endorsement of another signer's attestation.
///
/// Carried on the wire and decoded, but never verified or applied; see
/// `GUARANTEE_DOMAIN` for the tag it will be signed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guarantee {
    pub signature: NodeSignature,
}

/// Local tally for one proposal and the value last announced for it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Score {
    pub score: u32,
    pub last_broadcast: u32,
}
