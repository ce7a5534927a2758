//! The seam between the transport and the consensus layer.

use std::sync::Arc;

use async_trait::async_trait;

use super::IoHandle;
use crate::wire::{Inquiry, InquiryReply, ProposalBodyMessage, SigBundle};

/// Business-message sink for a connection's read pipeline.
///
/// Each call runs on its own task, so implementations must tolerate
/// messages from one connection being handled out of order.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// A peer asks whether we need a proposal. The answer goes back on
    /// `reply_to`.
    async fn on_inquiry(&self, inquiry: Inquiry, reply_to: Arc<IoHandle>);

    /// A peer answered one of our inquiries on `from`.
    async fn on_inquiry_reply(&self, reply: InquiryReply, from: Arc<IoHandle>);

    async fn on_proposal_body(&self, message: ProposalBodyMessage);

    async fn on_sig_bundle(&self, bundle: SigBundle);
}
