//! Typed messages and their body encodings.
//!
//! | Type            | Body                                                      |
//! |-----------------|-----------------------------------------------------------|
//! | Hello           | pubkey(32) nonce(32) time(8)                              |
//! | Response        | sig(64) pubkey(32) nonce(32) time(8)                      |
//! | Confirm         | sig(64)                                                   |
//! | Heartbeat       | tag(4)                                                    |
//! | BootstrapReport | address (UTF-8)                                           |
//! | BootstrapReply  | (node_id(32) '+' address ';')*                            |
//! | ProposalBody    | round(8) pubkey(32) time(8) sig(64) payload               |
//! | ProposalSig     | round(8) hash(32) n(2) n×{pubkey score(4) time sig g(2) g×{node_id sig}} |
//! | Inquiry         | round(8) hash(32) txid(32)                                |
//! | InquiryReply    | txid(32) result(4)                                        |
//!
//! All integers are big-endian.

use bytes::{BufMut, Bytes, BytesMut};

use super::{BodyLen, MessageType, WireError, PROPOSAL_BODY_PREFIX};
use crate::config::{
    INQUIRY_ALREADY_HAVE, INQUIRY_NEED, INQUIRY_REFUSE, MAX_FRAME_BODY, NONCE_LENGTH,
    TRANSACTION_ID_LENGTH,
};
use crate::consensus::types::{Attestation, Guarantee, ProposalBody, ProposalHash, Round};
use crate::crypto::{NodeId, NodePublicKey, NodeSignature};

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// First handshake message, initiator to responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub public_key: NodePublicKey,
    pub nonce: [u8; NONCE_LENGTH],
    /// Sender clock in unix milliseconds.
    pub timestamp: u64,
}

/// Responder's signed answer to a [`Hello`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub signature: NodeSignature,
    pub public_key: NodePublicKey,
    pub nonce: [u8; NONCE_LENGTH],
    pub timestamp: u64,
}

/// Initiator's signature over the same challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirm {
    pub signature: NodeSignature,
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Address other nodes should dial to reach the reporter.
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReply {
    pub peers: Vec<(NodeId, String)>,
}

// ---------------------------------------------------------------------------
// Consensus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalBodyMessage {
    pub round: Round,
    pub body: ProposalBody,
}

/// One signer's attestation plus the guarantees riding along with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleEntry {
    pub attestation: Attestation,
    /// `(guaranteed node, guarantee)` pairs.
    pub guarantees: Vec<(NodeId, Guarantee)>,
}

/// Every attestation (and guarantee) a node holds for one proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigBundle {
    pub round: Round,
    pub proposal_hash: ProposalHash,
    pub entries: Vec<BundleEntry>,
}

/// Random 32-byte id correlating an inquiry with its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(pub [u8; TRANSACTION_ID_LENGTH]);

impl TransactionId {
    pub fn random() -> Self {
        TransactionId(rand::random())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inquiry {
    pub round: Round,
    pub proposal_hash: ProposalHash,
    pub transaction_id: TransactionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InquiryResult {
    AlreadyHave,
    Need,
    Refuse,
}

impl InquiryResult {
    pub fn code(self) -> u32 {
        match self {
            InquiryResult::AlreadyHave => INQUIRY_ALREADY_HAVE,
            InquiryResult::Need => INQUIRY_NEED,
            InquiryResult::Refuse => INQUIRY_REFUSE,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            INQUIRY_ALREADY_HAVE => Some(InquiryResult::AlreadyHave),
            INQUIRY_NEED => Some(InquiryResult::Need),
            INQUIRY_REFUSE => Some(InquiryResult::Refuse),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InquiryReply {
    pub transaction_id: TransactionId,
    pub result: InquiryResult,
}

// ---------------------------------------------------------------------------
// WireMessage
// ---------------------------------------------------------------------------

/// Any message a connection can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Hello(Hello),
    Response(HandshakeResponse),
    Confirm(Confirm),
    Heartbeat { tag: u32 },
    BootstrapReport(BootstrapReport),
    BootstrapReply(BootstrapReply),
    ProposalBody(ProposalBodyMessage),
    SigBundle(SigBundle),
    Inquiry(Inquiry),
    InquiryReply(InquiryReply),
}

impl WireMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            WireMessage::Hello(_) => MessageType::Hello,
            WireMessage::Response(_) => MessageType::Response,
            WireMessage::Confirm(_) => MessageType::Confirm,
            WireMessage::Heartbeat { .. } => MessageType::Heartbeat,
            WireMessage::BootstrapReport(_) => MessageType::BootstrapReport,
            WireMessage::BootstrapReply(_) => MessageType::BootstrapReply,
            WireMessage::ProposalBody(_) => MessageType::ProposalBody,
            WireMessage::SigBundle(_) => MessageType::ProposalSig,
            WireMessage::Inquiry(_) => MessageType::Inquiry,
            WireMessage::InquiryReply(_) => MessageType::InquiryReply,
        }
    }

    /// Encode the complete frame: type header, optional length, body.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let ty = self.message_type();
        let mut body = BytesMut::new();
        self.encode_body(&mut body)?;

        let mut frame = BytesMut::with_capacity(body.len() + 8);
        frame.put_u32(ty.code());
        match ty.body_len() {
            BodyLen::Fixed(n) => debug_assert_eq!(body.len(), n, "{:?} body length", ty),
            BodyLen::Variable => {
                if body.len() > MAX_FRAME_BODY {
                    return Err(WireError::FrameTooLarge {
                        declared: body.len(),
                        max: MAX_FRAME_BODY,
                    });
                }
                frame.put_u32(body.len() as u32);
            }
        }
        frame.extend_from_slice(&body);
        Ok(frame.freeze())
    }

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        match self {
            WireMessage::Hello(hello) => {
                buf.put_slice(hello.public_key.as_bytes());
                buf.put_slice(&hello.nonce);
                buf.put_u64(hello.timestamp);
            }
            WireMessage::Response(resp) => {
                buf.put_slice(resp.signature.as_bytes());
                buf.put_slice(resp.public_key.as_bytes());
                buf.put_slice(&resp.nonce);
                buf.put_u64(resp.timestamp);
            }
            WireMessage::Confirm(confirm) => buf.put_slice(confirm.signature.as_bytes()),
            WireMessage::Heartbeat { tag } => buf.put_u32(*tag),
            WireMessage::BootstrapReport(report) => buf.put_slice(report.address.as_bytes()),
            WireMessage::BootstrapReply(reply) => {
                for (node_id, address) in &reply.peers {
                    if address.contains(';') {
                        return Err(WireError::malformed(
                            "bootstrap reply",
                            format!("address {:?} contains ';'", address),
                        ));
                    }
                    buf.put_slice(node_id.as_bytes());
                    buf.put_u8(b'+');
                    buf.put_slice(address.as_bytes());
                    buf.put_u8(b';');
                }
            }
            WireMessage::ProposalBody(msg) => {
                buf.put_u64(msg.round);
                buf.put_slice(msg.body.proposer.as_bytes());
                buf.put_u64(msg.body.timestamp);
                buf.put_slice(msg.body.signature.as_bytes());
                buf.put_slice(&msg.body.payload);
            }
            WireMessage::SigBundle(bundle) => {
                buf.put_u64(bundle.round);
                buf.put_slice(bundle.proposal_hash.as_bytes());
                buf.put_u16(count_u16(bundle.entries.len())?);
                for entry in &bundle.entries {
                    let att = &entry.attestation;
                    buf.put_slice(att.signer.as_bytes());
                    buf.put_u32(att.score);
                    buf.put_u64(att.timestamp);
                    buf.put_slice(att.signature.as_bytes());
                    buf.put_u16(count_u16(entry.guarantees.len())?);
                    for (guaranteed, guarantee) in &entry.guarantees {
                        buf.put_slice(guaranteed.as_bytes());
                        buf.put_slice(guarantee.signature.as_bytes());
                    }
                }
            }
            WireMessage::Inquiry(inq) => {
                buf.put_u64(inq.round);
                buf.put_slice(inq.proposal_hash.as_bytes());
                buf.put_slice(&inq.transaction_id.0);
            }
            WireMessage::InquiryReply(reply) => {
                buf.put_slice(&reply.transaction_id.0);
                buf.put_u32(reply.result.code());
            }
        }
        Ok(())
    }

    /// Decode a body whose type and extent have already been framed.
    pub fn decode(ty: MessageType, body: &[u8]) -> Result<Self, WireError> {
        let msg = match ty {
            MessageType::Hello => {
                let mut r = BodyReader::new(body, "hello");
                let msg = Hello {
                    public_key: NodePublicKey::from_bytes(r.array()?),
                    nonce: r.array()?,
                    timestamp: r.u64()?,
                };
                r.finish()?;
                WireMessage::Hello(msg)
            }
            MessageType::Response => {
                let mut r = BodyReader::new(body, "handshake response");
                let msg = HandshakeResponse {
                    signature: NodeSignature::from_bytes(r.array()?),
                    public_key: NodePublicKey::from_bytes(r.array()?),
                    nonce: r.array()?,
                    timestamp: r.u64()?,
                };
                r.finish()?;
                WireMessage::Response(msg)
            }
            MessageType::Confirm => {
                let mut r = BodyReader::new(body, "handshake confirm");
                let msg = Confirm {
                    signature: NodeSignature::from_bytes(r.array()?),
                };
                r.finish()?;
                WireMessage::Confirm(msg)
            }
            MessageType::Heartbeat => {
                let mut r = BodyReader::new(body, "heartbeat");
                let tag = r.u32()?;
                r.finish()?;
                WireMessage::Heartbeat { tag }
            }
            MessageType::BootstrapReport => {
                let address = std::str::from_utf8(body)
                    .map_err(|e| WireError::malformed("bootstrap report", e.to_string()))?;
                if address.is_empty() {
                    return Err(WireError::malformed("bootstrap report", "empty address"));
                }
                WireMessage::BootstrapReport(BootstrapReport {
                    address: address.to_string(),
                })
            }
            MessageType::BootstrapReply => WireMessage::BootstrapReply(decode_reply(body)?),
            MessageType::ProposalBody => {
                if body.len() <= PROPOSAL_BODY_PREFIX {
                    return Err(WireError::malformed("proposal body", "empty payload"));
                }
                let mut r = BodyReader::new(body, "proposal body");
                let round = r.u64()?;
                let proposer = NodePublicKey::from_bytes(r.array()?);
                let timestamp = r.u64()?;
                let signature = NodeSignature::from_bytes(r.array()?);
                WireMessage::ProposalBody(ProposalBodyMessage {
                    round,
                    body: ProposalBody {
                        proposer,
                        payload: r.rest().to_vec(),
                        timestamp,
                        signature,
                    },
                })
            }
            MessageType::ProposalSig => WireMessage::SigBundle(decode_bundle(body)?),
            MessageType::Inquiry => {
                let mut r = BodyReader::new(body, "inquiry");
                let msg = Inquiry {
                    round: r.u64()?,
                    proposal_hash: ProposalHash(r.array()?),
                    transaction_id: TransactionId(r.array()?),
                };
                r.finish()?;
                WireMessage::Inquiry(msg)
            }
            MessageType::InquiryReply => {
                let mut r = BodyReader::new(body, "inquiry reply");
                let transaction_id = TransactionId(r.array()?);
                let code = r.u32()?;
                r.finish()?;
                let result = InquiryResult::from_code(code).ok_or_else(|| {
                    WireError::malformed("inquiry reply", format!("unknown result 0x{:08X}", code))
                })?;
                WireMessage::InquiryReply(InquiryReply {
                    transaction_id,
                    result,
                })
            }
        };
        Ok(msg)
    }
}

fn count_u16(n: usize) -> Result<u16, WireError> {
    u16::try_from(n).map_err(|_| WireError::TooManyEntries(n))
}

fn decode_bundle(body: &[u8]) -> Result<SigBundle, WireError> {
    let mut r = BodyReader::new(body, "signature bundle");
    let round = r.u64()?;
    let proposal_hash = ProposalHash(r.array()?);
    let count = r.u16()? as usize;

    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let attestation = Attestation {
            signer: NodePublicKey::from_bytes(r.array()?),
            score: r.u32()?,
            timestamp: r.u64()?,
            signature: NodeSignature::from_bytes(r.array()?),
        };
        let guarantee_count = r.u16()? as usize;
        let mut guarantees = Vec::with_capacity(guarantee_count);
        for _ in 0..guarantee_count {
            let guaranteed = NodeId(r.array()?);
            let signature = NodeSignature::from_bytes(r.array()?);
            guarantees.push((guaranteed, Guarantee { signature }));
        }
        entries.push(BundleEntry {
            attestation,
            guarantees,
        });
    }
    r.finish()?;

    Ok(SigBundle {
        round,
        proposal_hash,
        entries,
    })
}

fn decode_reply(body: &[u8]) -> Result<BootstrapReply, WireError> {
    let mut r = BodyReader::new(body, "bootstrap reply");
    let mut peers = Vec::new();
    while !r.is_empty() {
        let node_id = NodeId(r.array()?);
        if r.u8()? != b'+' {
            return Err(WireError::malformed("bootstrap reply", "missing '+' separator"));
        }
        let rest = r.rest();
        let end = rest
            .iter()
            .position(|b| *b == b';')
            .ok_or_else(|| WireError::malformed("bootstrap reply", "missing ';' terminator"))?;
        let address = std::str::from_utf8(&rest[..end])
            .map_err(|e| WireError::malformed("bootstrap reply", e.to_string()))?;
        peers.push((node_id, address.to_string()));
        r = BodyReader::new(&rest[end + 1..], "bootstrap reply");
    }
    Ok(BootstrapReply { peers })
}

// ---------------------------------------------------------------------------
// BodyReader
// ---------------------------------------------------------------------------

/// Bounds-checked cursor over a message body.
struct BodyReader<'a> {
    buf: &'a [u8],
    what: &'static str,
}

impl<'a> BodyReader<'a> {
    fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, what }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.buf.len() < n {
            return Err(WireError::Truncated {
                what: self.what,
                need: n,
                got: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, WireError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, WireError> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }

    fn finish(self) -> Result<(), WireError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(WireError::malformed(
                self.what,
                format!("{} trailing bytes", self.buf.len()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HEARTBEAT_DOMAIN;
    use crate::crypto::NodeKeypair;

    /// Encode a message and decode the body part of the resulting frame.
    fn reencode(msg: &WireMessage) -> WireMessage {
        let frame = msg.encode().unwrap();
        let ty = MessageType::try_from(u32::from_be_bytes(frame[..4].try_into().unwrap())).unwrap();
        let body = match ty.body_len() {
            BodyLen::Fixed(n) => {
                assert_eq!(frame.len(), 4 + n);
                &frame[4..]
            }
            BodyLen::Variable => {
                let len = u32::from_be_bytes(frame[4..8].try_into().unwrap()) as usize;
                assert_eq!(frame.len(), 8 + len);
                &frame[8..]
            }
        };
        WireMessage::decode(ty, body).unwrap()
    }

    fn signed_attestation(score: u32) -> Attestation {
        let kp = NodeKeypair::generate();
        Attestation::sign(&kp, 9, &ProposalHash([1u8; 32]), score, 1_700_000_000_000)
    }

    #[test]
    fn test_bundle_preserves_every_field() {
        let guarantor_sig = NodeSignature::from_bytes([0xAB; 64]);
        let bundle = SigBundle {
            round: 9,
            proposal_hash: ProposalHash([1u8; 32]),
            entries: vec![
                BundleEntry {
                    attestation: signed_attestation(5_000),
                    guarantees: vec![],
                },
                BundleEntry {
                    attestation: signed_attestation(u32::MAX),
                    guarantees: vec![
                        (NodeId([2u8; 32]), Guarantee { signature: guarantor_sig }),
                        (NodeId([3u8; 32]), Guarantee { signature: guarantor_sig }),
                    ],
                },
            ],
        };
        let msg = WireMessage::SigBundle(bundle.clone());
        assert_eq!(reencode(&msg), msg);

        // Decoded attestations still verify, so no field was shuffled.
        if let WireMessage::SigBundle(decoded) = reencode(&msg) {
            for entry in &decoded.entries {
                assert!(entry.attestation.verify(9, &bundle.proposal_hash).is_ok());
            }
        }
    }

    #[test]
    fn test_empty_bundle() {
        let msg = WireMessage::SigBundle(SigBundle {
            round: 0,
            proposal_hash: ProposalHash([0u8; 32]),
            entries: vec![],
        });
        assert_eq!(reencode(&msg), msg);
    }

    #[test]
    fn test_truncated_bundle_is_rejected() {
        let msg = WireMessage::SigBundle(SigBundle {
            round: 1,
            proposal_hash: ProposalHash([1u8; 32]),
            entries: vec![BundleEntry {
                attestation: signed_attestation(10),
                guarantees: vec![],
            }],
        });
        let frame = msg.encode().unwrap();
        let body = &frame[8..frame.len() - 1];
        assert!(matches!(
            WireMessage::decode(MessageType::ProposalSig, body),
            Err(WireError::Truncated { .. })
        ));
    }

    #[test]
    fn test_bundle_count_overflow() {
        let entry = BundleEntry {
            attestation: signed_attestation(1),
            guarantees: vec![],
        };
        let msg = WireMessage::SigBundle(SigBundle {
            round: 1,
            proposal_hash: ProposalHash([1u8; 32]),
            entries: vec![entry; u16::MAX as usize + 1],
        });
        assert!(matches!(msg.encode(), Err(WireError::TooManyEntries(_))));
    }

    #[test]
    fn test_proposal_body_requires_payload() {
        let kp = NodeKeypair::generate();
        let (_, body) = ProposalBody::create(&kp, 3, b"x".to_vec(), 77);
        let msg = WireMessage::ProposalBody(ProposalBodyMessage { round: 3, body });
        assert_eq!(reencode(&msg), msg);

        let frame = msg.encode().unwrap();
        let without_payload = &frame[8..8 + PROPOSAL_BODY_PREFIX];
        assert!(WireMessage::decode(MessageType::ProposalBody, without_payload).is_err());
    }

    #[test]
    fn test_bootstrap_reply_format() {
        let reply = BootstrapReply {
            peers: vec![
                (NodeId([b';'; 32]), "10.0.0.1:9740".to_string()),
                (NodeId([7u8; 32]), "node-b:9740".to_string()),
            ],
        };
        let msg = WireMessage::BootstrapReply(reply);
        let frame = msg.encode().unwrap();
        // id + '+' + address + ';'
        assert_eq!(frame[8 + 32], b'+');
        assert_eq!(frame[8 + 32 + 1 + 13], b';');
        // A node id full of separator bytes still parses positionally.
        assert_eq!(reencode(&msg), msg);
    }

    #[test]
    fn test_bootstrap_reply_rejects_missing_terminator() {
        let mut body = vec![1u8; 32];
        body.push(b'+');
        body.extend_from_slice(b"host:1");
        assert!(WireMessage::decode(MessageType::BootstrapReply, &body).is_err());
    }

    #[test]
    fn test_bootstrap_reply_rejects_separator_in_address() {
        let msg = WireMessage::BootstrapReply(BootstrapReply {
            peers: vec![(NodeId([1u8; 32]), "a;b".to_string())],
        });
        assert!(msg.encode().is_err());
    }

    #[test]
    fn test_inquiry_reply_unknown_sentinel() {
        let mut body = vec![0u8; 32];
        body.extend_from_slice(&0xDEAD_BEEFu32.to_be_bytes());
        assert!(WireMessage::decode(MessageType::InquiryReply, &body).is_err());
    }

    #[test]
    fn test_inquiry_layout() {
        let inquiry = Inquiry {
            round: 0x0102_0304_0506_0708,
            proposal_hash: ProposalHash([0x11; 32]),
            transaction_id: TransactionId([0x22; 32]),
        };
        let frame = WireMessage::Inquiry(inquiry).encode().unwrap();
        assert_eq!(&frame[..4], &[0, 0, 0, 0x0B]);
        assert_eq!(&frame[4..12], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(frame[12], 0x11);
        assert_eq!(frame[44], 0x22);
    }

    #[test]
    fn test_heartbeat_carries_tag() {
        let frame = WireMessage::Heartbeat {
            tag: HEARTBEAT_DOMAIN,
        }
        .encode()
        .unwrap();
        assert_eq!(&frame[4..], &HEARTBEAT_DOMAIN.to_be_bytes());
    }

    #[test]
    fn test_fixed_body_rejects_trailing_bytes() {
        let body = [0u8; 5];
        assert!(WireMessage::decode(MessageType::Heartbeat, &body).is_err());
    }
}
