//! # Gossip Sender
//!
//! Pushes one proposal and its current attestations to a random sample of
//! peers. Each peer gets its own task running a short conversation:
//!
//! ```text
//!   us                                   peer
//!   |---- Inquiry(round, hash, txid) ---->|
//!   |<--- InquiryReply(txid, result) -----|
//!   |                                     |   Refuse      → stop
//!   |---- ProposalBody (only on Need) --->|   Need        → body + bundle
//!   |---- SigBundle --------------------->|   AlreadyHave → bundle
//! ```
//!
//! A failed conversation is logged and abandoned. There is no retry within
//! the same broadcast; the next score rise triggers a fresh one.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::store::ProposalStore;
use super::types::{Attestation, Guarantee, ProposalHash, Round};
use crate::config::{BUNDLE_SEND_TIMEOUT, DIAL_READY_TIMEOUT, INQUIRY_REPLY_TIMEOUT, QUEUE_SEND_TIMEOUT};
use crate::crypto::NodeId;
use crate::directory::{DirectoryError, PeerDirectory};
use crate::p2p::{P2pError, PeerConnector};
use crate::wire::{
    BundleEntry, Inquiry, InquiryResult, ProposalBodyMessage, SigBundle, TransactionId, WireError,
    WireMessage,
};

#[derive(Debug, Error)]
pub enum GossipError {
    #[error("proposal {hash} not held for round {round}")]
    UnknownProposal { round: Round, hash: ProposalHash },

    #[error("peer directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("encoding error: {0}")]
    Wire(#[from] WireError),

    #[error("peer error: {0}")]
    Peer(#[from] P2pError),
}

/// How a single peer conversation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Peer needed the body; body and bundle sent.
    BodyAndBundle,
    /// Peer already had the body; bundle sent.
    BundleOnly,
    /// Peer is not running the round.
    Refused,
}

pub type DeliveryTask = JoinHandle<Result<Delivery, GossipError>>;

pub struct GossipSender {
    local: NodeId,
    store: Arc<ProposalStore>,
    directory: Arc<dyn PeerDirectory>,
    connector: Arc<dyn PeerConnector>,
    fanout: usize,
}

impl GossipSender {
    pub fn new(
        local: NodeId,
        store: Arc<ProposalStore>,
        directory: Arc<dyn PeerDirectory>,
        connector: Arc<dyn PeerConnector>,
        fanout: usize,
    ) -> Self {
        Self {
            local,
            store,
            directory,
            connector,
            fanout,
        }
    }

    pub fn fanout(&self) -> usize {
        self.fanout
    }

    /// Snapshot the proposal, encode it once, and start one delivery task
    /// per sampled peer. Returns without waiting for any of them.
    pub fn broadcast(&self, round: Round, hash: ProposalHash) -> Result<Vec<DeliveryTask>, GossipError> {
        let body = self
            .store
            .proposal(round, &hash)
            .ok_or(GossipError::UnknownProposal { round, hash })?;
        let bundle = build_bundle(
            round,
            hash,
            self.store.attestations(round, &hash),
            self.store.guarantees(round, &hash),
        );

        let body_frame = WireMessage::ProposalBody(ProposalBodyMessage { round, body }).encode()?;
        let bundle_frame = WireMessage::SigBundle(bundle).encode()?;

        let peers = self.directory.sample(self.fanout, &self.local)?;
        trace!(round, hash = %hash, peers = peers.len(), "broadcasting");

        let tasks = peers
            .into_iter()
            .map(|peer| {
                let connector = Arc::clone(&self.connector);
                let body_frame = body_frame.clone();
                let bundle_frame = bundle_frame.clone();
                tokio::spawn(async move {
                    let result =
                        deliver(connector.as_ref(), peer, round, hash, body_frame, bundle_frame).await;
                    match &result {
                        Ok(delivery) => trace!(peer = %peer, round, ?delivery, "gossip delivered"),
                        Err(e) => debug!(peer = %peer, round, error = %e, "gossip abandoned"),
                    }
                    result
                })
            })
            .collect();
        Ok(tasks)
    }
}

async fn deliver(
    connector: &dyn PeerConnector,
    peer: NodeId,
    round: Round,
    hash: ProposalHash,
    body_frame: Bytes,
    bundle_frame: Bytes,
) -> Result<Delivery, GossipError> {
    let handle = connector.connect(peer).await?;
    handle.wait_ready(DIAL_READY_TIMEOUT).await?;

    let mut pending = handle.expect_reply(TransactionId::random());
    let inquiry = WireMessage::Inquiry(Inquiry {
        round,
        proposal_hash: hash,
        transaction_id: pending.id(),
    });
    handle.send_message(&inquiry, QUEUE_SEND_TIMEOUT).await?;
    let answer = pending.wait(INQUIRY_REPLY_TIMEOUT).await?;
    drop(pending);

    let delivery = match answer {
        InquiryResult::Refuse => return Ok(Delivery::Refused),
        InquiryResult::Need => {
            handle.send(body_frame, QUEUE_SEND_TIMEOUT).await?;
            Delivery::BodyAndBundle
        }
        InquiryResult::AlreadyHave => Delivery::BundleOnly,
    };
    handle.send(bundle_frame, BUNDLE_SEND_TIMEOUT).await?;
    Ok(delivery)
}

/// One entry per attester, ordered by attester id, each carrying the
/// guarantees that attester issued.
pub fn build_bundle(
    round: Round,
    proposal_hash: ProposalHash,
    attestations: HashMap<NodeId, Attestation>,
    mut guarantees: HashMap<NodeId, HashMap<NodeId, Guarantee>>,
) -> SigBundle {
    let mut signers: Vec<(NodeId, Attestation)> = attestations.into_iter().collect();
    signers.sort_by(|a, b| a.0.cmp(&b.0));

    let entries = signers
        .into_iter()
        .map(|(signer, attestation)| {
            let mut issued: Vec<(NodeId, Guarantee)> = guarantees
                .remove(&signer)
                .map(|by_target| by_target.into_iter().collect())
                .unwrap_or_default();
            issued.sort_by(|a, b| a.0.cmp(&b.0));
            BundleEntry {
                attestation,
                guarantees: issued,
            }
        })
        .collect();

    SigBundle {
        round,
        proposal_hash,
        entries,
    }
}
