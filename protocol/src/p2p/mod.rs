//! # Peer-to-Peer Transport
//!
//! Authenticated point-to-point links over raw TCP with TrustMesh framing.
//!
//! - [`handshake`]: the pure three-step authentication state machine.
//! - [`connection`]: per-link read/write pipelines, heartbeats, teardown.
//! - [`handle`]: [`IoHandle`], the only thing callers hold onto.
//! - [`table`]: identity → handle registry shared across the node.
//! - [`dialer`] / [`listener`]: outbound and inbound link setup.
//! - [`handler`]: the [`MessageHandler`] seam into consensus.

pub mod connection;
pub mod dialer;
pub mod error;
pub mod handle;
pub mod handler;
pub mod handshake;
pub mod listener;
pub mod table;

pub use connection::{run_connection, ConnectionContext, Established, PeerReport, Role};
pub use dialer::{PeerConnector, TcpConnector};
pub use error::P2pError;
pub use handle::{IoHandle, PendingReply};
pub use handler::MessageHandler;
pub use handshake::{EstablishedPeer, HandshakeError, HandshakeSession, HandshakeState};
pub use listener::serve;
pub use table::ConnectionTable;
