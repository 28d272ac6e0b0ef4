//! Length-prefixed framing for [`ChatMessage`].
//!
//! ```text
//! +------------------+---------------------------+
//! | length (4 bytes) | payload (length bytes)    |
//! | big-endian u32   | JSON object               |
//! +------------------+---------------------------+
//! ```
//!
//! A payload that fails to parse is reported as [`RelayError::Decode`] after the
//! whole frame has been consumed, so the caller may keep reading. Truncated
//! frames and oversized length prefixes leave the stream unsynchronised and are
//! reported as fatal errors.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    error::{RelayError, Result},
    message::ChatMessage,
};

pub const MAX_FRAME_LEN: usize = 1024 * 1024;

const HEADER_LEN: usize = 4;

pub fn encode(message: &ChatMessage) -> Result<Vec<u8>> {
    serde_json::to_vec(message).map_err(RelayError::Encode)
}

pub fn decode(payload: &[u8]) -> Result<ChatMessage> {
    serde_json::from_slice(payload).map_err(RelayError::Decode)
}

/// Reads one frame. Returns `Ok(None)` when the peer closed the stream on a
/// frame boundary.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let read = reader.read(&mut header[filled..]).await?;
        if read == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream closed inside a frame header",
            )
            .into());
        }
        filled += read;
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(RelayError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(RelayError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }

    // Header and payload go out in a single write.
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_message<R>(reader: &mut R) -> Result<Option<ChatMessage>>
where
    R: AsyncRead + Unpin,
{
    match read_frame(reader).await? {
        Some(payload) => decode(&payload).map(Some),
        None => Ok(None),
    }
}

pub async fn write_message<W>(writer: &mut W, message: &ChatMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = encode(message)?;
    write_frame(writer, &payload).await
}
