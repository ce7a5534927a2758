//! Error types for the peer-to-peer layer.

use thiserror::Error;

use super::handshake::HandshakeError;
use crate::crypto::NodeId;
use crate::directory::DirectoryError;
use crate::wire::{MessageType, WireError};

/// Errors raised by connections, dialing and the I/O handle.
///
/// Anything in here ends at most one connection; none of these are fatal
/// to the process.
#[derive(Debug, Error)]
pub enum P2pError {
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("unexpected {got:?} while waiting for {expected}")]
    UnexpectedMessage {
        expected: &'static str,
        got: MessageType,
    },

    #[error("heartbeat carried tag 0x{0:08X}")]
    BadHeartbeat(u32),

    #[error("{0:?} is not accepted on this connection")]
    NotAccepted(MessageType),

    #[error("connection not ready in time")]
    ReadyTimeout,

    #[error("outbound queue full")]
    QueueFull,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("connection closed")]
    Closed,

    #[error("no known address for peer {0}")]
    UnknownPeer(NodeId),

    #[error("dial {addr} failed: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("dialed {expected} but reached {got}")]
    PeerMismatch { expected: NodeId, got: NodeId },

    #[error("peer directory error: {0}")]
    Directory(#[from] DirectoryError),
}
