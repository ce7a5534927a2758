//! # I/O Handle
//!
//! The face a connection shows to the rest of the node. Callers never touch
//! the socket; they get an [`IoHandle`] and use it to:
//!
//! - enqueue encoded frames for the write pipeline,
//! - wait for the handshake to finish (`ready`),
//! - observe or trigger the one-shot close signal,
//! - correlate inquiries with replies by transaction id.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use super::P2pError;
use crate::config::WRITE_QUEUE_CAPACITY;
use crate::crypto::NodeId;
use crate::wire::{InquiryReply, InquiryResult, TransactionId, WireMessage};

/// Shared handle to one peer connection.
#[derive(Debug)]
pub struct IoHandle {
    outbound: mpsc::Sender<Bytes>,
    closed: CancellationToken,
    ready: watch::Sender<bool>,
    peer: OnceLock<NodeId>,
    stale: AtomicBool,
    pending: DashMap<TransactionId, oneshot::Sender<InquiryResult>>,
}

impl IoHandle {
    /// A fresh handle plus the receiving end of its outbound queue, which
    /// belongs to the write pipeline.
    pub fn new() -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (outbound, rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let (ready, _) = watch::channel(false);
        let handle = Arc::new(Self {
            outbound,
            closed: CancellationToken::new(),
            ready,
            peer: OnceLock::new(),
            stale: AtomicBool::new(false),
            pending: DashMap::new(),
        });
        (handle, rx)
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Enqueue a frame, waiting at most `limit` for queue space.
    pub async fn send(&self, frame: Bytes, limit: Duration) -> Result<(), P2pError> {
        if self.is_closed() {
            return Err(P2pError::Closed);
        }
        tokio::select! {
            _ = self.closed.cancelled() => Err(P2pError::Closed),
            sent = tokio::time::timeout(limit, self.outbound.send(frame)) => match sent {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(P2pError::Closed),
                Err(_) => Err(P2pError::Timeout("outbound queue")),
            },
        }
    }

    /// Encode and enqueue a message.
    pub async fn send_message(&self, msg: &WireMessage, limit: Duration) -> Result<(), P2pError> {
        self.send(msg.encode()?, limit).await
    }

    /// Enqueue without waiting. Used for heartbeats, which are worthless
    /// if they have to queue behind real traffic.
    pub fn try_send(&self, frame: Bytes) -> Result<(), P2pError> {
        if self.is_closed() {
            return Err(P2pError::Closed);
        }
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => P2pError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => P2pError::Closed,
        })
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Fire the close signal. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the close signal has fired.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Record the authenticated peer and release everything waiting on
    /// [`wait_ready`](Self::wait_ready).
    pub fn mark_ready(&self, peer: NodeId) {
        let _ = self.peer.set(peer);
        self.ready.send_replace(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait until the handshake completes, the connection closes, or
    /// `limit` elapses.
    pub async fn wait_ready(&self, limit: Duration) -> Result<(), P2pError> {
        let mut rx = self.ready.subscribe();
        tokio::select! {
            _ = self.closed.cancelled() => Err(P2pError::Closed),
            ready = tokio::time::timeout(limit, rx.wait_for(|r| *r)) => match ready {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(_)) => Err(P2pError::Closed),
                Err(_) => Err(P2pError::ReadyTimeout),
            },
        }
    }

    /// Authenticated peer identity, once the handshake has completed.
    pub fn peer(&self) -> Option<NodeId> {
        self.peer.get().copied()
    }

    /// Flag this handle as superseded by a newer connection to the same peer.
    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::Relaxed);
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Relaxed)
    }

    // -----------------------------------------------------------------------
    // Request/reply correlation
    // -----------------------------------------------------------------------

    /// Register interest in the reply to `id`. The registration is removed
    /// when the returned guard drops, whether or not a reply arrived.
    pub fn expect_reply(self: &Arc<Self>, id: TransactionId) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        PendingReply {
            handle: Arc::clone(self),
            id,
            rx,
        }
    }

    /// Deliver a reply to whoever is waiting for it. Returns `false` if no
    /// one is (late reply, unknown id, or waiter already gone).
    pub fn complete_reply(&self, reply: &InquiryReply) -> bool {
        match self.pending.remove(&reply.transaction_id) {
            Some((_, tx)) => tx.send(reply.result).is_ok(),
            None => false,
        }
    }

    pub fn pending_replies(&self) -> usize {
        self.pending.len()
    }
}

/// Registration for one correlated reply.
#[derive(Debug)]
pub struct PendingReply {
    handle: Arc<IoHandle>,
    id: TransactionId,
    rx: oneshot::Receiver<InquiryResult>,
}

impl PendingReply {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Wait for the reply, the close signal, or `limit`.
    pub async fn wait(&mut self, limit: Duration) -> Result<InquiryResult, P2pError> {
        tokio::select! {
            _ = self.handle.closed.cancelled() => Err(P2pError::Closed),
            reply = tokio::time::timeout(limit, &mut self.rx) => match reply {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(_)) => Err(P2pError::Closed),
                Err(_) => Err(P2pError::Timeout("inquiry reply")),
            },
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.handle.pending.remove(&self.id);
    }
}
