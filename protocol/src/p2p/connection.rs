//! # Connection Manager
//!
//! Owns one peer stream from the first handshake byte to teardown.
//!
//! ## Lifecycle
//!
//! 1. A heartbeat task starts immediately. Every [`HEARTBEAT_INTERVAL`] it
//!    waits up to [`HEARTBEAT_READY_WAIT`] for the handshake and closes the
//!    connection if it never completes.
//! 2. The handshake runs on the raw stream (Hello/Response/Confirm).
//! 3. On success the peer is registered in the [`ConnectionTable`], the
//!    handle is marked ready, and the optional `established` channel fires.
//! 4. A write pipeline drains the outbound queue; it gives up after
//!    [`WRITE_IDLE_TIMEOUT`] without work. The read pipeline runs on the
//!    calling task and hands business messages to the [`MessageHandler`] on
//!    spawned tasks.
//! 5. Whatever ends first (read error, write error, idle writer, heartbeat
//!    failure, external close) fires the one-shot close signal; the table
//!    entry is removed and the stream dropped.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use super::handshake::{EstablishedPeer, HandshakeSession};
use super::{ConnectionTable, IoHandle, MessageHandler, P2pError};
use crate::bootstrap;
use crate::config::{
    HANDSHAKE_STEP_TIMEOUT, HEARTBEAT_DOMAIN, HEARTBEAT_INTERVAL, HEARTBEAT_READY_WAIT,
    MAX_FRAME_BODY, WRITE_IDLE_TIMEOUT,
};
use crate::consensus::timing::now_ms;
use crate::crypto::{NodeId, NodeKeypair};
use crate::directory::PeerDirectory;
use crate::wire::{read_message, write_frame, WireError, WireMessage};

/// Which side of the handshake this connection plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// A bootstrap report received from an authenticated peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerReport {
    pub node_id: NodeId,
    pub address: String,
}

/// Reported to a dialer once the handshake completes.
#[derive(Debug, Clone)]
pub struct Established {
    pub peer: EstablishedPeer,
    pub handle: Arc<IoHandle>,
}

/// Everything a connection needs from its node.
pub struct ConnectionContext {
    pub keypair: Arc<NodeKeypair>,
    pub table: Arc<ConnectionTable>,
    pub directory: Arc<dyn PeerDirectory>,
    /// Consensus sink. `None` on the bootstrap node, which rejects
    /// consensus traffic.
    pub handler: Option<Arc<dyn MessageHandler>>,
    /// Bootstrap report sink. `None` on regular nodes, which reject reports.
    pub reports: Option<mpsc::Sender<PeerReport>>,
    /// Identity of the bootstrap node we reported to. Bootstrap replies
    /// from anyone else are rejected.
    pub bootstrap_peer: RwLock<Option<NodeId>>,
}

impl ConnectionContext {
    /// Accept bootstrap replies from `peer` from now on.
    pub fn trust_bootstrap(&self, peer: NodeId) {
        *self.bootstrap_peer.write() = Some(peer);
    }

    pub fn is_trusted_bootstrap(&self, peer: &NodeId) -> bool {
        self.bootstrap_peer.read().as_ref() == Some(peer)
    }
}

/// Run a connection to completion.
///
/// Returns the reason the connection ended; a clean remote close is
/// `Ok(())`.
pub async fn run_connection<S>(
    stream: S,
    role: Role,
    ctx: Arc<ConnectionContext>,
    established: Option<oneshot::Sender<Established>>,
) -> Result<(), P2pError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (handle, outbound) = IoHandle::new();
    tokio::spawn(heartbeat_loop(Arc::clone(&handle)));

    let outcome = drive(stream, role, &ctx, &handle, outbound, established).await;

    handle.close();
    if let Some(peer) = handle.peer() {
        ctx.table.remove(&peer, &handle);
        match &outcome {
            Ok(()) => debug!(peer = %peer, "connection closed"),
            Err(e) => debug!(peer = %peer, error = %e, "connection terminated"),
        }
    } else if let Err(e) = &outcome {
        debug!(?role, error = %e, "connection failed before handshake completed");
    }
    outcome
}

async fn drive<S>(
    stream: S,
    role: Role,
    ctx: &Arc<ConnectionContext>,
    handle: &Arc<IoHandle>,
    outbound: mpsc::Receiver<bytes::Bytes>,
    established: Option<oneshot::Sender<Established>>,
) -> Result<(), P2pError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    let peer = tokio::select! {
        _ = handle.closed() => return Err(P2pError::Closed),
        peer = handshake(&mut reader, &mut writer, role, &ctx.keypair) => peer?,
    };

    ctx.table.register(peer.node_id, Arc::clone(handle));
    handle.mark_ready(peer.node_id);
    debug!(peer = %peer.node_id, ?role, "handshake completed");
    if let Some(tx) = established {
        let _ = tx.send(Established {
            peer: peer.clone(),
            handle: Arc::clone(handle),
        });
    }

    let writer_task = tokio::spawn(write_pipeline(writer, outbound, Arc::clone(handle)));
    let result = read_pipeline(reader, Arc::clone(handle), peer.node_id, ctx).await;
    handle.close();
    let _ = writer_task.await;
    result
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

async fn handshake<S>(
    reader: &mut ReadHalf<S>,
    writer: &mut WriteHalf<S>,
    role: Role,
    keypair: &NodeKeypair,
) -> Result<EstablishedPeer, P2pError>
where
    S: AsyncRead + AsyncWrite,
{
    match role {
        Role::Initiator => {
            let (mut session, hello) = HandshakeSession::initiate(keypair, now_ms());
            write_frame(writer, &WireMessage::Hello(hello).encode()?).await?;
            session.hello_sent()?;

            let response = match next_handshake_message(reader).await? {
                WireMessage::Response(response) => response,
                other => return Err(unexpected("handshake response", &other)),
            };
            let confirm = session.on_response(&response, keypair, now_ms())?;
            write_frame(writer, &WireMessage::Confirm(confirm).encode()?).await?;
            Ok(session.confirm_sent()?)
        }
        Role::Responder => {
            let mut session = HandshakeSession::accept();
            let hello = match next_handshake_message(reader).await? {
                WireMessage::Hello(hello) => hello,
                other => return Err(unexpected("handshake hello", &other)),
            };
            let response = session.on_hello(&hello, keypair, now_ms())?;
            write_frame(writer, &WireMessage::Response(response.clone()).encode()?).await?;

            let confirm = match next_handshake_message(reader).await? {
                WireMessage::Confirm(confirm) => confirm,
                other => return Err(unexpected("handshake confirm", &other)),
            };
            Ok(session.on_confirm(&confirm, &response)?)
        }
    }
}

async fn next_handshake_message<R>(reader: &mut R) -> Result<WireMessage, P2pError>
where
    R: AsyncRead + Unpin,
{
    match tokio::time::timeout(HANDSHAKE_STEP_TIMEOUT, read_message(reader, MAX_FRAME_BODY)).await
    {
        Ok(msg) => Ok(msg?),
        Err(_) => Err(P2pError::Timeout("handshake step")),
    }
}

fn unexpected(expected: &'static str, got: &WireMessage) -> P2pError {
    P2pError::UnexpectedMessage {
        expected,
        got: got.message_type(),
    }
}

// ---------------------------------------------------------------------------
// Pipelines
// ---------------------------------------------------------------------------

async fn read_pipeline<S>(
    mut reader: ReadHalf<S>,
    handle: Arc<IoHandle>,
    peer: NodeId,
    ctx: &Arc<ConnectionContext>,
) -> Result<(), P2pError>
where
    S: AsyncRead + AsyncWrite,
{
    loop {
        let msg = tokio::select! {
            _ = handle.closed() => return Ok(()),
            msg = read_message(&mut reader, MAX_FRAME_BODY) => match msg {
                Ok(msg) => msg,
                Err(WireError::Closed) => return Ok(()),
                Err(e) => return Err(e.into()),
            },
        };
        trace!(peer = %peer, kind = ?msg.message_type(), "frame received");

        match msg {
            WireMessage::Heartbeat { tag } if tag == HEARTBEAT_DOMAIN => {}
            WireMessage::Heartbeat { tag } => return Err(P2pError::BadHeartbeat(tag)),

            WireMessage::BootstrapReply(reply) => {
                if !ctx.is_trusted_bootstrap(&peer) {
                    return Err(P2pError::NotAccepted(crate::wire::MessageType::BootstrapReply));
                }
                let added = bootstrap::apply_reply(ctx.directory.as_ref(), &reply);
                debug!(peer = %peer, added, "bootstrap reply applied");
                // The bootstrap link is single-use; closing tells the sender
                // the reply landed.
                return Ok(());
            }
            WireMessage::BootstrapReport(report) => {
                let Some(reports) = &ctx.reports else {
                    return Err(P2pError::NotAccepted(crate::wire::MessageType::BootstrapReport));
                };
                let report = PeerReport {
                    node_id: peer,
                    address: report.address,
                };
                if let Err(e) = reports.send(report).await {
                    debug!(
                        peer = %peer,
                        address = %e.0.address,
                        "bootstrap report dropped, collection over"
                    );
                }
                // A reporter has nothing more to say.
                return Ok(());
            }

            WireMessage::Hello(_) | WireMessage::Response(_) | WireMessage::Confirm(_) => {
                return Err(unexpected("business message", &msg));
            }

            business => {
                let Some(handler) = ctx.handler.clone() else {
                    return Err(P2pError::NotAccepted(business.message_type()));
                };
                dispatch(handler, business, Arc::clone(&handle));
            }
        }
    }
}

/// Hand a business message to the handler on its own task.
fn dispatch(handler: Arc<dyn MessageHandler>, msg: WireMessage, handle: Arc<IoHandle>) {
    tokio::spawn(async move {
        match msg {
            WireMessage::Inquiry(inquiry) => handler.on_inquiry(inquiry, handle).await,
            WireMessage::InquiryReply(reply) => handler.on_inquiry_reply(reply, handle).await,
            WireMessage::ProposalBody(body) => handler.on_proposal_body(body).await,
            WireMessage::SigBundle(bundle) => handler.on_sig_bundle(bundle).await,
            _ => {}
        }
    });
}

async fn write_pipeline<S>(
    mut writer: WriteHalf<S>,
    mut outbound: mpsc::Receiver<bytes::Bytes>,
    handle: Arc<IoHandle>,
) where
    S: AsyncRead + AsyncWrite,
{
    loop {
        let frame = tokio::select! {
            _ = handle.closed() => break,
            next = tokio::time::timeout(WRITE_IDLE_TIMEOUT, outbound.recv()) => match next {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(_) => {
                    debug!(peer = ?handle.peer(), "write pipeline idle, closing");
                    break;
                }
            },
        };
        if let Err(e) = write_frame(&mut writer, &frame).await {
            debug!(peer = ?handle.peer(), error = %e, "write failed");
            break;
        }
    }
    handle.close();
    let _ = writer.shutdown().await;
}

async fn heartbeat_loop(handle: Arc<IoHandle>) {
    let frame = match (WireMessage::Heartbeat {
        tag: HEARTBEAT_DOMAIN,
    })
    .encode()
    {
        Ok(frame) => frame,
        Err(_) => return,
    };

    loop {
        tokio::select! {
            _ = handle.closed() => return,
            _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {}
        }
        if let Err(e) = handle.wait_ready(HEARTBEAT_READY_WAIT).await {
            debug!(error = %e, "heartbeat gave up waiting for handshake");
            handle.close();
            return;
        }
        match handle.try_send(frame.clone()) {
            Ok(()) | Err(P2pError::QueueFull) => {}
            Err(_) => return,
        }
    }
}
