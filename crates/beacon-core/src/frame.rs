//! Length-prefixed frame codec.
//!
//! Wire layout:
//!
//! ```text
//! +---------------------------+------------------------+
//! | length: i32 little-endian | payload: length bytes  |
//! +---------------------------+------------------------+
//! ```
//!
//! The length prefix is validated before any payload buffer is allocated:
//! negative values and values above the caller's maximum are rejected.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::FrameError;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Default maximum payload size: 9,500 capture bytes plus 2,000 bytes of
/// compression overhead.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 9_500 + 2_000;

/// Outcome of [`read_full`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fill {
    /// The buffer was filled completely.
    Complete,
    /// The stream ended after `read` bytes.
    Eof {
        /// Bytes written into the buffer before end of stream.
        read: usize,
    },
}

/// Decode a length prefix and check it against `max_frame_size`.
pub fn decode_length(
    prefix: [u8; LENGTH_PREFIX_LEN],
    max_frame_size: usize,
) -> Result<usize, FrameError> {
    let raw = i32::from_le_bytes(prefix);
    let len = usize::try_from(raw).map_err(|_| FrameError::NegativeLength(raw))?;
    if len > max_frame_size {
        return Err(FrameError::TooLarge {
            len,
            max: max_frame_size,
        });
    }
    Ok(len)
}

/// Encode a payload length as a little-endian `i32` prefix.
pub fn encode_length(len: usize) -> Result<[u8; LENGTH_PREFIX_LEN], FrameError> {
    let raw = i32::try_from(len).map_err(|_| FrameError::PayloadTooLarge(len))?;
    Ok(raw.to_le_bytes())
}

/// Fill `buf` through repeated partial reads.
///
/// A zero-byte read ends the fill early and reports how much arrived, so the
/// caller can tell a clean disconnect (nothing read) from a truncated section.
pub async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<Fill>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut offset = 0;
    while offset < buf.len() {
        let n = reader.read(&mut buf[offset..]).await?;
        if n == 0 {
            return Ok(Fill::Eof { read: offset });
        }
        offset += n;
    }
    Ok(Fill::Complete)
}

/// Read exactly `len` payload bytes.
pub async fn read_payload<R>(reader: &mut R, len: usize) -> Result<Bytes, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut payload = BytesMut::zeroed(len);
    match read_full(reader, &mut payload).await? {
        Fill::Complete => Ok(payload.freeze()),
        Fill::Eof { read } => Err(FrameError::Truncated {
            expected: len,
            read,
        }),
    }
}

/// Read one frame.
///
/// Returns `Ok(None)` when the stream ends cleanly on a frame boundary.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Option<Bytes>, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    match read_full(reader, &mut prefix).await? {
        Fill::Complete => {}
        Fill::Eof { read: 0 } => return Ok(None),
        Fill::Eof { read } => {
            return Err(FrameError::Truncated {
                expected: LENGTH_PREFIX_LEN,
                read,
            });
        }
    }
    let len = decode_length(prefix, max_frame_size)?;
    read_payload(reader, len).await.map(Some)
}

/// Write one frame (prefix, payload) and flush.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let prefix = encode_length(payload.len())?;
    writer.write_all(&prefix).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
