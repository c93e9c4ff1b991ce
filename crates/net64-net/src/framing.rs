//! Length-prefixed framing over byte streams.
//!
//! Every payload travels as one frame:
//!
//! ```text
//! +-------------------+--------------------+
//! | length (4 bytes)  |   payload          |
//! | u32 little-endian |   (length bytes)   |
//! +-------------------+--------------------+
//! ```
//!
//! The prefix counts payload bytes only. [`read_frame`] and [`write_frame`]
//! work directly on async streams; [`FrameDecoder`] accumulates bytes from
//! cancel-safe reads and hands out whole frames without ever dropping input.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX: usize = 4;

/// Configuration for the framing layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameConfig {
    /// Largest payload accepted in either direction. Default: 1 MiB.
    pub max_payload_size: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 1_048_576,
        }
    }
}

/// Errors that can occur during framing operations.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The announced or supplied payload exceeds the configured maximum.
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// The announced or supplied payload size.
        size: u32,
        /// The configured maximum.
        max: u32,
    },

    /// The peer closed the stream before a whole frame arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// Reading or writing the underlying stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn eof_as_closed(e: std::io::Error) -> FrameError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::ConnectionClosed
    } else {
        FrameError::Io(e)
    }
}

/// Read one frame from `reader` and return its payload.
///
/// Not cancel-safe: dropping the future mid-frame loses the bytes already
/// consumed. Long-lived loops that `select!` over reads should feed a
/// [`FrameDecoder`] instead.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Vec<u8>, FrameError> {
    let mut prefix = [0u8; LENGTH_PREFIX];
    reader.read_exact(&mut prefix).await.map_err(eof_as_closed)?;

    let len = u32::from_le_bytes(prefix);
    if len > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: config.max_payload_size,
        });
    }

    let mut payload = vec![0u8; len as usize];
    if len > 0 {
        reader.read_exact(&mut payload).await.map_err(eof_as_closed)?;
    }
    Ok(payload)
}

/// Write `payload` as one frame and flush.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
    config: &FrameConfig,
) -> Result<(), FrameError> {
    let len = checked_len(payload, config)?;
    writer.write_all(&len.to_le_bytes()).await?;
    if !payload.is_empty() {
        writer.write_all(payload).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Prefix `payload` with its length, producing the exact bytes [`write_frame`] sends.
pub fn encode_frame(payload: &[u8], config: &FrameConfig) -> Result<Vec<u8>, FrameError> {
    let len = checked_len(payload, config)?;
    let mut out = Vec::with_capacity(LENGTH_PREFIX + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

fn checked_len(payload: &[u8], config: &FrameConfig) -> Result<u32, FrameError> {
    let too_large = || FrameError::PayloadTooLarge {
        size: u32::try_from(payload.len()).unwrap_or(u32::MAX),
        max: config.max_payload_size,
    };
    let len = u32::try_from(payload.len()).map_err(|_| too_large())?;
    if len > config.max_payload_size {
        return Err(too_large());
    }
    Ok(len)
}

/// Incremental frame splitter for bytes arriving in arbitrary chunks.
///
/// Bytes are only ever removed from the buffer as part of a whole frame, so a
/// caller that rejects one payload can keep pulling the frames behind it.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    config: FrameConfig,
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new(config: FrameConfig) -> Self {
        Self {
            config,
            buf: Vec::new(),
        }
    }

    /// Append freshly read bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete payload.
    ///
    /// Returns `Ok(None)` while the buffered bytes do not yet hold a whole
    /// frame. An oversize length prefix is reported without consuming
    /// anything: the stream cannot be realigned and must be closed.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let Some(prefix) = self.buf.first_chunk::<LENGTH_PREFIX>() else {
            return Ok(None);
        };
        let len = u32::from_le_bytes(*prefix);
        if len > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: len,
                max: self.config.max_payload_size,
            });
        }

        let end = LENGTH_PREFIX + len as usize;
        if self.buf.len() < end {
            return Ok(None);
        }
        let payload = self.buf[LENGTH_PREFIX..end].to_vec();
        self.buf.drain(..end);
        Ok(Some(payload))
    }

    /// Bytes received but not yet returned as part of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop any partial frame, e.g. when the transport is replaced.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
