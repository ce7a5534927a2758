//! Error types for the wire codec.
//!
//! Every variant is a protocol violation from the connection's point of
//! view: the connection that produced it is closed, the process is not.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("unknown message type 0x{0:02X}")]
    UnknownMessageType(u32),

    #[error("declared body length {declared} exceeds maximum {max}")]
    FrameTooLarge { declared: usize, max: usize },

    #[error("{what}: need {need} bytes, got {got}")]
    Truncated {
        what: &'static str,
        need: usize,
        got: usize,
    },

    #[error("malformed {what}: {reason}")]
    Malformed { what: &'static str, reason: String },

    #[error("{0} entries exceed the u16 count field")]
    TooManyEntries(usize),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("connection closed by peer")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    pub(crate) fn malformed(what: &'static str, reason: impl Into<String>) -> Self {
        WireError::Malformed {
            what,
            reason: reason.into(),
        }
    }
}
