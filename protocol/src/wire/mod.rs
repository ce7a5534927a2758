//! # Wire Codec
//!
//! Binary framing for everything TrustMesh nodes say to each other.
//!
//! ## Frame layout
//!
//! ```text
//! +----------------+-------------------------------------------+
//! | type (u32 BE)  | fixed body                                |
//! +----------------+-------------------------------------------+
//! | type (u32 BE)  | len (u32 BE) | variable body (len bytes)  |
//! +----------------+-------------------------------------------+
//! ```
//!
//! Whether a body is fixed or variable is a property of the message type,
//! see [`MessageType::body_len`]. Variable bodies larger than
//! [`MAX_FRAME_BODY`](crate::config::MAX_FRAME_BODY) are rejected before
//! any body byte is read.
//!
//! The codec is pure: [`messages`] turns typed messages into bytes and
//! back, [`frame`] moves those bytes across an async stream.

pub mod error;
pub mod frame;
pub mod messages;

pub use error::WireError;
pub use frame::{read_message, write_frame};
pub use messages::{
    BootstrapReply, BootstrapReport, BundleEntry, Confirm, HandshakeResponse, Hello, Inquiry,
    InquiryReply, InquiryResult, ProposalBodyMessage, SigBundle, TransactionId, WireMessage,
};

/// Message type codes (first four bytes of every frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    Hello = 0x01,
    Response = 0x02,
    Confirm = 0x03,
    Heartbeat = 0x06,
    BootstrapReport = 0x07,
    BootstrapReply = 0x08,
    ProposalBody = 0x09,
    ProposalSig = 0x0A,
    Inquiry = 0x0B,
    InquiryReply = 0x0C,
}

/// How a message body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLen {
    Fixed(usize),
    Variable,
}

/// Hello: public key + nonce + timestamp.
pub const HELLO_LEN: usize = 32 + 32 + 8;
/// Response: signature + public key + nonce + timestamp.
pub const RESPONSE_LEN: usize = 64 + HELLO_LEN;
/// Confirm: signature.
pub const CONFIRM_LEN: usize = 64;
/// Heartbeat: domain tag.
pub const HEARTBEAT_LEN: usize = 4;
/// Inquiry: round + proposal hash + transaction id.
pub const INQUIRY_LEN: usize = 8 + 32 + 32;
/// Inquiry reply: transaction id + result sentinel.
pub const INQUIRY_REPLY_LEN: usize = 32 + 4;
/// Fixed prefix of a proposal body frame: round + key + timestamp + signature.
pub const PROPOSAL_BODY_PREFIX: usize = 8 + 32 + 8 + 64;

impl MessageType {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn body_len(self) -> BodyLen {
        match self {
            MessageType::Hello => BodyLen::Fixed(HELLO_LEN),
            MessageType::Response => BodyLen::Fixed(RESPONSE_LEN),
            MessageType::Confirm => BodyLen::Fixed(CONFIRM_LEN),
            MessageType::Heartbeat => BodyLen::Fixed(HEARTBEAT_LEN),
            MessageType::Inquiry => BodyLen::Fixed(INQUIRY_LEN),
            MessageType::InquiryReply => BodyLen::Fixed(INQUIRY_REPLY_LEN),
            MessageType::BootstrapReport
            | MessageType::BootstrapReply
            | MessageType::ProposalBody
            | MessageType::ProposalSig => BodyLen::Variable,
        }
    }
}

impl TryFrom<u32> for MessageType {
    type Error = WireError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        Ok(match code {
            0x01 => MessageType::Hello,
            0x02 => MessageType::Response,
            0x03 => MessageType::Confirm,
            0x06 => MessageType::Heartbeat,
            0x07 => MessageType::BootstrapReport,
            0x08 => MessageType::BootstrapReply,
            0x09 => MessageType::ProposalBody,
            0x0A => MessageType::ProposalSig,
            0x0B => MessageType::Inquiry,
            0x0C => MessageType::InquiryReply,
            other => return Err(WireError::UnknownMessageType(other)),
        })
    }
}
