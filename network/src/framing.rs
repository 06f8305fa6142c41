//! Length-prefixed frame codec shared by both sides of a mesh link.
//!
//! A frame is a big-endian u32 length followed by that many payload bytes.
//! A dealer-to-router message is an identity frame followed by a payload
//! frame; a router-to-dealer reply is a single payload frame.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame. Protocol payloads are a few hex-encoded
/// field elements, so anything near this limit is garbage.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Writes one frame and flushes the stream.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Reads one frame, rejecting oversized length prefixes before allocating.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Vec<u8>> {
    let length = reader.read_u32().await? as usize;
    if length > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {length} exceeds the maximum of {MAX_FRAME_LEN}"),
        ));
    }
    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}
