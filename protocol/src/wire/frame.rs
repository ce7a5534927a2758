//! Async framing over a byte stream.
//!
//! Every read and write carries [`IO_DEADLINE`]. Reading stops at the
//! length prefix when it exceeds the caller's maximum, so an abusive peer
//! never gets us to allocate or consume its body.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{BodyLen, MessageType, WireError, WireMessage};
use crate::config::IO_DEADLINE;

/// Read one complete message.
///
/// `max_body` bounds variable-length bodies; fixed bodies are bounded by
/// their type.
pub async fn read_message<R>(reader: &mut R, max_body: usize) -> Result<WireMessage, WireError>
where
    R: AsyncRead + Unpin,
{
    let code = deadline("read header", IO_DEADLINE, reader.read_u32()).await?;
    let ty = MessageType::try_from(code)?;

    let len = match ty.body_len() {
        BodyLen::Fixed(n) => n,
        BodyLen::Variable => {
            let declared = deadline("read length", IO_DEADLINE, reader.read_u32()).await? as usize;
            if declared > max_body {
                return Err(WireError::FrameTooLarge {
                    declared,
                    max: max_body,
                });
            }
            declared
        }
    };

    let mut body = vec![0u8; len];
    deadline("read body", IO_DEADLINE, reader.read_exact(&mut body)).await?;
    WireMessage::decode(ty, &body)
}

/// Write an encoded frame and flush it.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    deadline("write", IO_DEADLINE, async {
        writer.write_all(frame).await?;
        writer.flush().await
    })
    .await
}

async fn deadline<T, F>(what: &'static str, limit: Duration, fut: F) -> Result<T, WireError>
where
    F: Future<Output = std::io::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(WireError::Closed),
        Ok(Err(e)) => Err(WireError::Io(e)),
        Err(_) => Err(WireError::Timeout(what)),
    }
}
