//! Outbound links: reuse a live connection or dial a new one.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use super::connection::{run_connection, ConnectionContext, Established, Role};
use super::{IoHandle, P2pError};
use crate::config::{DIAL_READY_TIMEOUT, DIAL_TIMEOUT};
use crate::crypto::NodeId;

/// Something that can hand out a ready link to a peer.
///
/// The gossip sender only sees this trait, so tests can swap the network
/// for in-memory handles.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, peer: NodeId) -> Result<Arc<IoHandle>, P2pError>;
}

/// TCP dialer backed by the connection table and the peer directory.
#[derive(Clone)]
pub struct TcpConnector {
    ctx: Arc<ConnectionContext>,
}

impl TcpConnector {
    pub fn new(ctx: Arc<ConnectionContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<ConnectionContext> {
        &self.ctx
    }

    /// Open a fresh connection to `addr` as handshake initiator and wait
    /// for the peer to authenticate.
    pub async fn dial(&self, addr: &str) -> Result<Established, P2pError> {
        let stream = match tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(P2pError::Dial {
                    addr: addr.to_string(),
                    source,
                })
            }
            Err(_) => return Err(P2pError::Timeout("dial")),
        };
        if let Err(e) = stream.set_nodelay(true) {
            trace!(%addr, error = %e, "TCP_NODELAY not set");
        }

        let (tx, rx) = oneshot::channel();
        let ctx = Arc::clone(&self.ctx);
        let addr_owned = addr.to_string();
        tokio::spawn(async move {
            if let Err(e) = run_connection(stream, Role::Initiator, ctx, Some(tx)).await {
                debug!(addr = %addr_owned, error = %e, "outbound connection ended");
            }
        });

        match tokio::time::timeout(DIAL_READY_TIMEOUT, rx).await {
            Ok(Ok(established)) => Ok(established),
            Ok(Err(_)) => Err(P2pError::Closed),
            Err(_) => Err(P2pError::Timeout("handshake")),
        }
    }
}

#[async_trait]
impl PeerConnector for TcpConnector {
    async fn connect(&self, peer: NodeId) -> Result<Arc<IoHandle>, P2pError> {
        if let Some(handle) = self.ctx.table.get(&peer) {
            return Ok(handle);
        }
        let addr = self
            .ctx
            .directory
            .address_of(&peer)?
            .ok_or(P2pError::UnknownPeer(peer))?;

        let established = self.dial(&addr).await?;
        if established.peer.node_id != peer {
            established.handle.close();
            return Err(P2pError::PeerMismatch {
                expected: peer,
                got: established.peer.node_id,
            });
        }
        Ok(established.handle)
    }
}
