//! # Message Router
//!
//! Applies inbound consensus traffic to the proposal store.
//!
//! | Message        | Effect                                                  |
//! |----------------|---------------------------------------------------------|
//! | Inquiry        | Reply `Refuse` / `AlreadyHave` / `Need` on the same link |
//! | Inquiry Reply  | Wake the gossip task waiting on that transaction id     |
//! | Proposal Body  | Verify proposer signature, insert if new                |
//! | Bundle         | Verify each attestation, record it, wake the executor   |
//!
//! Nothing here blocks on the network except the inquiry reply, which is
//! bounded by [`QUEUE_SEND_TIMEOUT`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::config::QUEUE_SEND_TIMEOUT;
use crate::consensus::{AttestationOutcome, InsertOutcome, ProposalStore, SignatureError};
use crate::p2p::{IoHandle, MessageHandler};
use crate::wire::{
    Inquiry, InquiryReply, InquiryResult, ProposalBodyMessage, SigBundle, WireMessage,
};

/// Tally of one applied bundle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BundleReport {
    pub recorded: usize,
    pub stale: usize,
    pub invalid: usize,
    /// Whether the round's executor was signalled.
    pub notified: bool,
}

pub struct MessageRouter {
    store: Arc<ProposalStore>,
}

impl MessageRouter {
    pub fn new(store: Arc<ProposalStore>) -> Self {
        Self { store }
    }

    /// Answer to an inquiry given the current store.
    pub fn answer_inquiry(&self, inquiry: &Inquiry) -> InquiryResult {
        match self
            .store
            .contains_proposal(inquiry.round, &inquiry.proposal_hash)
        {
            None => InquiryResult::Refuse,
            Some(true) => InquiryResult::AlreadyHave,
            Some(false) => InquiryResult::Need,
        }
    }

    /// Verify and insert a proposal body.
    pub fn apply_proposal_body(
        &self,
        message: ProposalBodyMessage,
    ) -> Result<InsertOutcome, SignatureError> {
        let round = message.round;
        let hash = message.body.verify(round)?;
        let outcome = self.store.insert_proposal(round, hash, message.body);
        trace!(round, hash = %hash, ?outcome, "proposal body");
        Ok(outcome)
    }

    /// Record every valid attestation in a bundle, then signal the round.
    /// Guarantees are ignored.
    pub fn apply_bundle(&self, bundle: &SigBundle) -> BundleReport {
        let round = bundle.round;
        let hash = bundle.proposal_hash;
        let mut report = BundleReport::default();

        for entry in &bundle.entries {
            let attestation = &entry.attestation;
            if let Err(e) = attestation.verify(round, &hash) {
                debug!(round, hash = %hash, error = %e, "invalid attestation skipped");
                report.invalid += 1;
                continue;
            }
            match self.store.record_attestation(
                round,
                hash,
                attestation.signer_id(),
                attestation.clone(),
            ) {
                AttestationOutcome::Inserted | AttestationOutcome::Replaced => report.recorded += 1,
                AttestationOutcome::Stale => report.stale += 1,
                AttestationOutcome::RoundClosed => {
                    trace!(round, "bundle for a round we are not running");
                    return report;
                }
            }
        }

        report.notified = self.store.notify(round, hash);
        report
    }
}

#[async_trait]
impl MessageHandler for MessageRouter {
    async fn on_inquiry(&self, inquiry: Inquiry, reply_to: Arc<IoHandle>) {
        let result = self.answer_inquiry(&inquiry);
        trace!(round = inquiry.round, hash = %inquiry.proposal_hash, ?result, "inquiry");
        let reply = WireMessage::InquiryReply(InquiryReply {
            transaction_id: inquiry.transaction_id,
            result,
        });
        if let Err(e) = reply_to.send_message(&reply, QUEUE_SEND_TIMEOUT).await {
            debug!(peer = ?reply_to.peer(), error = %e, "inquiry reply dropped");
        }
    }

    async fn on_inquiry_reply(&self, reply: InquiryReply, from: Arc<IoHandle>) {
        if !from.complete_reply(&reply) {
            trace!(peer = ?from.peer(), "late or unsolicited inquiry reply");
        }
    }

    async fn on_proposal_body(&self, message: ProposalBodyMessage) {
        let round = message.round;
        if let Err(e) = self.apply_proposal_body(message) {
            debug!(round, error = %e, "proposal body rejected");
        }
    }

    async fn on_sig_bundle(&self, bundle: SigBundle) {
        let report = self.apply_bundle(&bundle);
        trace!(round = bundle.round, hash = %bundle.proposal_hash, ?report, "bundle applied");
    }
}
