//! Length-prefixed framing for stream transports.
//!
//! ```text
//! +-------------------+--------------------+
//! | length (4 bytes)  |   payload          |
//! | u32 little-endian |   (length bytes)   |
//! +-------------------+--------------------+
//! ```
//!
//! The prefix does not count itself. Zero-length frames are legal and are
//! skipped by the reader.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size limits for the framing layer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 1 MiB.
    pub max_payload_size: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 1_048_576,
        }
    }
}

/// Errors raised while reading or writing frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds [`FrameConfig::max_payload_size`].
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// Announced or attempted size.
        size: u32,
        /// Configured maximum.
        max: u32,
    },

    /// The stream ended before a complete frame arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn eof_as_closed(err: std::io::Error) -> FrameError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::ConnectionClosed
    } else {
        FrameError::Io(err)
    }
}

/// Reads frames from the read half of a stream.
pub struct FrameReader<R> {
    inner: R,
    config: FrameConfig,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap `inner` with the given limits.
    pub fn new(inner: R, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// The wrapped stream.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Read the next non-empty frame payload.
    ///
    /// An oversized announcement is reported without consuming the payload;
    /// the stream is unusable afterwards.
    pub async fn next_frame(&mut self) -> Result<Vec<u8>, FrameError> {
        loop {
            let mut len_buf = [0u8; 4];
            self.inner
                .read_exact(&mut len_buf)
                .await
                .map_err(eof_as_closed)?;

            let len = u32::from_le_bytes(len_buf);
            if len > self.config.max_payload_size {
                return Err(FrameError::PayloadTooLarge {
                    size: len,
                    max: self.config.max_payload_size,
                });
            }
            if len == 0 {
                continue;
            }

            let mut payload = vec![0u8; len as usize];
            self.inner
                .read_exact(&mut payload)
                .await
                .map_err(eof_as_closed)?;
            return Ok(payload);
        }
    }
}

/// Writes frames to the write half of a stream.
pub struct FrameWriter<W> {
    inner: W,
    config: FrameConfig,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap `inner` with the given limits.
    pub fn new(inner: W, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Write one frame and flush it.
    pub async fn send_frame(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        let len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
        if len > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: len,
                max: self.config.max_payload_size,
            });
        }

        self.inner.write_all(&len.to_le_bytes()).await?;
        self.inner.write_all(payload).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Shut down the write direction of the stream.
    pub async fn shutdown(&mut self) -> Result<(), FrameError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
