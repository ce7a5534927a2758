//! # Handshake State Machine
//!
//! Three messages of mutual authentication before any business traffic:
//!
//! ```text
//! Initiator                              Responder
//!   |-- Hello { pk_i, nonce_i, t_i } ------>|   check |now - t_i|
//!   |<-- Response { sig_r, pk_r, n_r, t_r } -|   sig_r = sign(C)
//!   |   check |now - t_r|, verify sig_r     |
//!   |-- Confirm { sig_i } ------------------>|   verify sig_i over C
//! ```
//!
//! where `C = blake3(HANDSHAKE_DOMAIN ‖ pk_i ‖ nonce_i ‖ t_i ‖ pk_r ‖ n_r ‖ t_r)`.
//! Both sides sign the same challenge, so each proves possession of the key
//! it announced. Fresh nonces on both sides keep a recorded exchange from
//! being replayed into a new session.
//!
//! This module holds no I/O. The connection manager feeds it decoded
//! messages, sends whatever it returns, and reports back when a send went
//! through.

use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

use crate::config::{HANDSHAKE_DOMAIN, MAX_CLOCK_SKEW_SECS, NONCE_LENGTH};
use crate::crypto::{DomainHasher, NodeId, NodeKeypair, NodePublicKey};
use crate::wire::{Confirm, HandshakeResponse, Hello};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("peer clock differs by {skew_ms} ms")]
    ClockSkew { skew_ms: u64 },

    #[error("response signature does not verify")]
    BadResponseSignature,

    #[error("confirm signature does not verify")]
    BadConfirmSignature,

    #[error("{0} called in state {1:?}")]
    OutOfOrder(&'static str, HandshakeState),
}

/// Position in the three-step exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Initiator: Hello not yet on the wire. Responder: Hello not yet seen.
    WaitingInitial,
    /// Initiator: waiting for Response. Responder: waiting for Confirm.
    WaitingReply,
    Completed,
}

/// Outcome of a finished handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstablishedPeer {
    pub public_key: NodePublicKey,
    pub node_id: NodeId,
}

impl EstablishedPeer {
    fn new(public_key: NodePublicKey) -> Self {
        Self {
            node_id: public_key.node_id(),
            public_key,
        }
    }
}

/// Per-connection handshake driver for one side of the exchange.
#[derive(Debug)]
pub struct HandshakeSession {
    state: HandshakeState,
    hello: Option<Hello>,
    remote: Option<NodePublicKey>,
}

impl HandshakeSession {
    /// Initiator side: produce the Hello to send.
    pub fn initiate(keypair: &NodeKeypair, now_ms: u64) -> (Self, Hello) {
        let mut nonce = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce);
        let hello = Hello {
            public_key: keypair.public_key(),
            nonce,
            timestamp: now_ms,
        };
        let session = Self {
            state: HandshakeState::WaitingInitial,
            hello: Some(hello.clone()),
            remote: None,
        };
        (session, hello)
    }

    /// Responder side: a session waiting for the peer's Hello.
    pub fn accept() -> Self {
        Self {
            state: HandshakeState::WaitingInitial,
            hello: None,
            remote: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Initiator: the Hello reached the wire.
    pub fn hello_sent(&mut self) -> Result<(), HandshakeError> {
        self.require("hello_sent", HandshakeState::WaitingInitial)?;
        self.state = HandshakeState::WaitingReply;
        Ok(())
    }

    /// Responder: validate a Hello and build the signed Response.
    pub fn on_hello(
        &mut self,
        hello: &Hello,
        keypair: &NodeKeypair,
        now_ms: u64,
    ) -> Result<HandshakeResponse, HandshakeError> {
        self.require("on_hello", HandshakeState::WaitingInitial)?;
        check_clock_skew(hello.timestamp, now_ms)?;

        let mut nonce = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce);
        let public_key = keypair.public_key();
        let challenge = challenge_digest(hello, &public_key, &nonce, now_ms);

        self.hello = Some(hello.clone());
        self.remote = Some(hello.public_key);
        self.state = HandshakeState::WaitingReply;

        Ok(HandshakeResponse {
            signature: keypair.sign(&challenge),
            public_key,
            nonce,
            timestamp: now_ms,
        })
    }

    /// Initiator: verify the Response and build the Confirm.
    ///
    /// The session stays in `WaitingReply` until [`confirm_sent`] reports
    /// that the Confirm was written.
    ///
    /// [`confirm_sent`]: Self::confirm_sent
    pub fn on_response(
        &mut self,
        response: &HandshakeResponse,
        keypair: &NodeKeypair,
        now_ms: u64,
    ) -> Result<Confirm, HandshakeError> {
        self.require("on_response", HandshakeState::WaitingReply)?;
        let hello = self
            .hello
            .as_ref()
            .ok_or(HandshakeError::OutOfOrder("on_response", self.state))?;
        check_clock_skew(response.timestamp, now_ms)?;

        let challenge = challenge_digest(
            hello,
            &response.public_key,
            &response.nonce,
            response.timestamp,
        );
        if !response.public_key.verify(&challenge, &response.signature) {
            return Err(HandshakeError::BadResponseSignature);
        }

        self.remote = Some(response.public_key);
        Ok(Confirm {
            signature: keypair.sign(&challenge),
        })
    }

    /// Initiator: the Confirm reached the wire.
    pub fn confirm_sent(&mut self) -> Result<EstablishedPeer, HandshakeError> {
        self.require("confirm_sent", HandshakeState::WaitingReply)?;
        let remote = self
            .remote
            .ok_or(HandshakeError::OutOfOrder("confirm_sent", self.state))?;
        self.state = HandshakeState::Completed;
        Ok(EstablishedPeer::new(remote))
    }

    /// Responder: verify the initiator's signature over the challenge.
    ///
    /// `response` is the Response this session produced in [`on_hello`].
    ///
    /// [`on_hello`]: Self::on_hello
    pub fn on_confirm(
        &mut self,
        confirm: &Confirm,
        response: &HandshakeResponse,
    ) -> Result<EstablishedPeer, HandshakeError> {
        self.require("on_confirm", HandshakeState::WaitingReply)?;
        let (hello, remote) = match (&self.hello, self.remote) {
            (Some(hello), Some(remote)) => (hello, remote),
            _ => return Err(HandshakeError::OutOfOrder("on_confirm", self.state)),
        };
        let challenge = challenge_digest(
            hello,
            &response.public_key,
            &response.nonce,
            response.timestamp,
        );
        if !remote.verify(&challenge, &confirm.signature) {
            return Err(HandshakeError::BadConfirmSignature);
        }
        self.state = HandshakeState::Completed;
        Ok(EstablishedPeer::new(remote))
    }

    fn require(&self, op: &'static str, state: HandshakeState) -> Result<(), HandshakeError> {
        if self.state == state {
            Ok(())
        } else {
            Err(HandshakeError::OutOfOrder(op, self.state))
        }
    }
}

/// Reject timestamps at or beyond the skew bound in either direction.
pub fn check_clock_skew(remote_ms: u64, local_ms: u64) -> Result<(), HandshakeError> {
    let skew_ms = remote_ms.abs_diff(local_ms);
    if skew_ms >= MAX_CLOCK_SKEW_SECS * 1_000 {
        return Err(HandshakeError::ClockSkew { skew_ms });
    }
    Ok(())
}

fn challenge_digest(
    hello: &Hello,
    responder: &NodePublicKey,
    responder_nonce: &[u8; NONCE_LENGTH],
    responder_time: u64,
) -> [u8; 32] {
    DomainHasher::new(HANDSHAKE_DOMAIN)
        .bytes(hello.public_key.as_bytes())
        .bytes(&hello.nonce)
        .u64(hello.timestamp)
        .bytes(responder.as_bytes())
        .bytes(responder_nonce)
        .u64(responder_time)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::NodeSignature;

    const NOW: u64 = 1_700_000_000_000;

    /// Run the whole exchange in memory and return both sides' view.
    fn run(initiator: &NodeKeypair, responder: &NodeKeypair) -> (EstablishedPeer, EstablishedPeer) {
        let (mut init, hello) = HandshakeSession::initiate(initiator, NOW);
        init.hello_sent().unwrap();

        let mut resp = HandshakeSession::accept();
        let response = resp.on_hello(&hello, responder, NOW + 5).unwrap();

        let confirm = init.on_response(&response, initiator, NOW + 10).unwrap();
        assert_eq!(init.state(), HandshakeState::WaitingReply);
        let seen_by_initiator = init.confirm_sent().unwrap();

        let seen_by_responder = resp.on_confirm(&confirm, &response).unwrap();
        (seen_by_initiator, seen_by_responder)
    }

    #[test]
    fn test_both_sides_learn_each_other() {
        let a = NodeKeypair::generate();
        let b = NodeKeypair::generate();
        let (a_sees, b_sees) = run(&a, &b);
        assert_eq!(a_sees.node_id, b.node_id());
        assert_eq!(b_sees.node_id, a.node_id());
        assert_eq!(a_sees.public_key, b.public_key());
    }

    #[test]
    fn test_stale_hello_rejected() {
        let a = NodeKeypair::generate();
        let b = NodeKeypair::generate();
        let (_, hello) = HandshakeSession::initiate(&a, NOW);
        let mut resp = HandshakeSession::accept();
        let err = resp
            .on_hello(&hello, &b, NOW + MAX_CLOCK_SKEW_SECS * 1_000)
            .unwrap_err();
        assert!(matches!(err, HandshakeError::ClockSkew { .. }));
    }

    #[test]
    fn test_skew_just_inside_bound_accepted() {
        assert!(check_clock_skew(NOW, NOW + MAX_CLOCK_SKEW_SECS * 1_000 - 1).is_ok());
        assert!(check_clock_skew(NOW + MAX_CLOCK_SKEW_SECS * 1_000 - 1, NOW).is_ok());
        assert!(check_clock_skew(NOW + MAX_CLOCK_SKEW_SECS * 1_000, NOW).is_err());
    }

    #[test]
    fn test_stale_response_rejected() {
        let a = NodeKeypair::generate();
        let b = NodeKeypair::generate();
        let (mut init, hello) = HandshakeSession::initiate(&a, NOW);
        init.hello_sent().unwrap();
        let mut resp = HandshakeSession::accept();
        let response = resp.on_hello(&hello, &b, NOW).unwrap();
        let err = init
            .on_response(&response, &a, NOW + 2 * MAX_CLOCK_SKEW_SECS * 1_000)
            .unwrap_err();
        assert!(matches!(err, HandshakeError::ClockSkew { .. }));
    }

    #[test]
    fn test_forged_response_rejected() {
        let a = NodeKeypair::generate();
        let b = NodeKeypair::generate();
        let (mut init, hello) = HandshakeSession::initiate(&a, NOW);
        init.hello_sent().unwrap();
        let mut resp = HandshakeSession::accept();
        let mut response = resp.on_hello(&hello, &b, NOW).unwrap();

        // Claim a different identity without its key.
        response.public_key = NodeKeypair::generate().public_key();
        assert_eq!(
            init.on_response(&response, &a, NOW).unwrap_err(),
            HandshakeError::BadResponseSignature
        );
    }

    #[test]
    fn test_forged_confirm_rejected() {
        let a = NodeKeypair::generate();
        let b = NodeKeypair::generate();
        let (mut init, hello) = HandshakeSession::initiate(&a, NOW);
        init.hello_sent().unwrap();
        let mut resp = HandshakeSession::accept();
        let response = resp.on_hello(&hello, &b, NOW).unwrap();
        init.on_response(&response, &a, NOW).unwrap();

        let forged = Confirm {
            signature: NodeSignature::from_bytes([0u8; 64]),
        };
        assert_eq!(
            resp.on_confirm(&forged, &response).unwrap_err(),
            HandshakeError::BadConfirmSignature
        );
        assert_eq!(resp.state(), HandshakeState::WaitingReply);
    }

    #[test]
    fn test_confirm_from_other_session_rejected() {
        let a = NodeKeypair::generate();
        let b = NodeKeypair::generate();

        // A confirm from one session cannot close another: the nonces differ.
        let (mut init1, hello1) = HandshakeSession::initiate(&a, NOW);
        init1.hello_sent().unwrap();
        let mut resp1 = HandshakeSession::accept();
        let response1 = resp1.on_hello(&hello1, &b, NOW).unwrap();
        let confirm1 = init1.on_response(&response1, &a, NOW).unwrap();

        let (_, hello2) = HandshakeSession::initiate(&a, NOW);
        let mut resp2 = HandshakeSession::accept();
        let response2 = resp2.on_hello(&hello2, &b, NOW).unwrap();
        assert!(resp2.on_confirm(&confirm1, &response2).is_err());
    }

    #[test]
    fn test_out_of_order_calls() {
        let a = NodeKeypair::generate();
        let (mut init, _) = HandshakeSession::initiate(&a, NOW);
        assert!(matches!(
            init.confirm_sent(),
            Err(HandshakeError::OutOfOrder("confirm_sent", HandshakeState::WaitingInitial))
        ));

        let mut resp = HandshakeSession::accept();
        let confirm = Confirm {
            signature: NodeSignature::from_bytes([0u8; 64]),
        };
        let dummy = HandshakeResponse {
            signature: NodeSignature::from_bytes([0u8; 64]),
            public_key: a.public_key(),
            nonce: [0u8; 32],
            timestamp: NOW,
        };
        assert!(matches!(
            resp.on_confirm(&confirm, &dummy),
            Err(HandshakeError::OutOfOrder(..))
        ));
    }
}
