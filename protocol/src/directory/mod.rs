//! # Peer Directory
//!
//! Who we know, where they live, and how much their opinion weighs.
//!
//! The directory is the only source of addresses for dialing and of
//! reputation weights for scoring. Writes are last-writer-wins upserts
//! keyed by node identity; nothing here is round-scoped.

mod store;

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Distribution, Normal, NormalError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{MAX_REPUTATION, MIN_REPUTATION, REPUTATION_MEAN, REPUTATION_STD_DEV};
use crate::crypto::NodeId;

pub use store::SledPeerDirectory;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("reputation distribution: {0}")]
    Distribution(#[from] NormalError),
}

pub type DirectoryResult<T> = Result<T, DirectoryError>;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// How a peer entered the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerStatus {
    /// Reported itself to this (bootstrap) node.
    Reported,
    /// Listed in a bootstrap reply.
    Introduced,
    /// Added by hand or by a test.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub node_id: NodeId,
    pub address: String,
    pub reputation: u32,
    /// Unix milliseconds of the last upsert.
    pub last_seen_ms: u64,
    pub status: PeerStatus,
}

/// Reputation weights frozen at one instant, as the scorer consumes them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReputationSnapshot {
    weights: HashMap<NodeId, u64>,
    total: u64,
}

impl ReputationSnapshot {
    pub fn from_weights(weights: impl IntoIterator<Item = (NodeId, u64)>) -> Self {
        let weights: HashMap<NodeId, u64> = weights.into_iter().collect();
        let total = weights.values().sum();
        Self { weights, total }
    }

    pub fn weight(&self, node: &NodeId) -> Option<u64> {
        self.weights.get(node).copied()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

// ---------------------------------------------------------------------------
// PeerDirectory
// ---------------------------------------------------------------------------

/// Storage of known peers.
///
/// Implementations only provide the primitive reads and writes; lookups,
/// sampling and the reputation refresh are derived from them.
pub trait PeerDirectory: Send + Sync {
    /// Insert or replace the record for `record.node_id`.
    fn upsert(&self, record: PeerRecord) -> DirectoryResult<()>;

    fn get(&self, node: &NodeId) -> DirectoryResult<Option<PeerRecord>>;

    /// Every known peer, in unspecified order.
    fn peers(&self) -> DirectoryResult<Vec<PeerRecord>>;

    fn len(&self) -> DirectoryResult<usize> {
        Ok(self.peers()?.len())
    }

    fn is_empty(&self) -> DirectoryResult<bool> {
        Ok(self.len()? == 0)
    }

    fn address_of(&self, node: &NodeId) -> DirectoryResult<Option<String>> {
        Ok(self.get(node)?.map(|record| record.address))
    }

    fn reputation_of(&self, node: &NodeId) -> DirectoryResult<Option<u32>> {
        Ok(self.get(node)?.map(|record| record.reputation))
    }

    /// Current weights and their sum.
    fn snapshot(&self) -> DirectoryResult<ReputationSnapshot> {
        Ok(ReputationSnapshot::from_weights(
            self.peers()?
                .into_iter()
                .map(|record| (record.node_id, record.reputation as u64)),
        ))
    }

    /// Up to `n` distinct peers chosen uniformly at random, never `exclude`.
    fn sample(&self, n: usize, exclude: &NodeId) -> DirectoryResult<Vec<NodeId>> {
        let candidates: Vec<NodeId> = self
            .peers()?
            .into_iter()
            .map(|record| record.node_id)
            .filter(|id| id != exclude)
            .collect();
        Ok(candidates
            .choose_multiple(&mut rand::thread_rng(), n)
            .copied()
            .collect())
    }

    /// Redraw every peer's reputation from the simulation distribution.
    fn refresh_reputation(&self) -> DirectoryResult<()> {
        let distribution = reputation_distribution()?;
        let mut rng = rand::thread_rng();
        for mut record in self.peers()? {
            record.reputation = random_reputation(&mut rng, &distribution);
            self.upsert(record)?;
        }
        Ok(())
    }
}

/// Normal distribution around [`REPUTATION_MEAN`].
pub fn reputation_distribution() -> Result<Normal<f64>, NormalError> {
    Normal::new(REPUTATION_MEAN, REPUTATION_STD_DEV)
}

/// One draw from `distribution`, redrawn until it falls inside the
/// reputation range.
pub fn random_reputation<R: Rng>(rng: &mut R, distribution: &Normal<f64>) -> u32 {
    loop {
        let value = distribution.sample(rng).round();
        if (MIN_REPUTATION as f64..=MAX_REPUTATION as f64).contains(&value) {
            return value as u32;
        }
    }
}
