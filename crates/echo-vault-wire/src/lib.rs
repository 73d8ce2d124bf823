// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Length-prefixed frame codec for the vault wire protocol.
//!
//! Every message, request or response, is a protocol version (`u32`, big
//! endian), a body length (`u32`, big endian), and exactly that many bytes
//! of body. This crate only knows about that envelope; the body bytes are
//! opaque to it (see `echo-vault-proto` for what lives inside).

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// The only protocol version this codec understands.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default ceiling on a single frame's body length.
///
/// Generous enough for any array payload this deployment expects to carry,
/// while still bounding the allocation a malformed or hostile peer can
/// trigger before a single byte of body has been read.
pub const DEFAULT_MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

/// Failures that can occur while reading or writing a frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The peer closed the connection (cleanly, between frames).
    #[error("connection closed")]
    Closed,
    /// The peer closed mid-frame, or some other I/O failure occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The frame header named a protocol version this codec does not speak.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u32),
    /// The frame header named a body length larger than the configured cap.
    #[error("frame body of {len} bytes exceeds the {max} byte limit")]
    TooLarge {
        /// Body length claimed by the frame header.
        len: u32,
        /// Configured maximum.
        max: u32,
    },
}

/// Reads one frame from `reader`, returning its body bytes.
///
/// Returns [`FrameError::Closed`] if the peer closes before sending any
/// bytes of a new frame (a clean closure between messages, not an error
/// condition for callers to report). Any other unexpected EOF — a partial
/// header or a partial body — surfaces as [`FrameError::Io`].
pub async fn read_frame<R>(reader: &mut R, max_frame_bytes: u32) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut version_buf = [0u8; 4];
    match reader.read_exact(&mut version_buf).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::Closed)
        }
        Err(err) => return Err(FrameError::Io(err)),
    }
    let version = u32::from_be_bytes(version_buf);
    if version != PROTOCOL_VERSION {
        return Err(FrameError::UnsupportedVersion(version));
    }

    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > max_frame_bytes {
        return Err(FrameError::TooLarge {
            len,
            max: max_frame_bytes,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

/// Writes one frame carrying `body` to `writer` as a single contiguous
/// send of `version || length || body`.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(body.len()).map_err(|_| FrameError::TooLarge {
        len: u32::MAX,
        max: u32::MAX,
    })?;
    let mut out = Vec::with_capacity(8 + body.len());
    out.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(body);
    writer.write_all(&out).await?;
    writer.flush().await?;
    Ok(())
}
