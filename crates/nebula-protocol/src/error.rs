//! Error types shared by the protocol core and its transports.

use std::error::Error as StdError;

use crate::codec::CodecError;
use crate::framing::FrameError;

/// Reason string attached to every timeout-driven disconnect.
pub const TIMEOUT_REASON: &str = "Connection timed out";

/// Faults reported by a transport, either on the read side or as the result
/// of a write.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No data arrived within the transport's read deadline.
    #[error("Connection timed out")]
    Timeout,

    /// The transport is closed and cannot carry the operation.
    #[error("connection closed")]
    Closed,

    /// An I/O error occurred on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The framing layer rejected a frame.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// A frame could not be decoded into a packet.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// An application handler failed while processing inbound data.
    #[error("handler failed: {source}")]
    Handler {
        /// The handler's own error.
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// A fault known only by its message.
    #[error("{0}")]
    Message(String),
}

impl TransportError {
    /// Wrap an application handler failure.
    pub fn handler(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        TransportError::Handler {
            source: source.into(),
        }
    }

    /// Whether this fault means the peer is unreachable.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }

    /// A copy of this error carrying the same reason, for reporting one
    /// failure to two parties.
    pub fn replicate(&self) -> Self {
        match self {
            TransportError::Timeout => TransportError::Timeout,
            TransportError::Closed => TransportError::Closed,
            TransportError::Io(err) => {
                TransportError::Io(std::io::Error::new(err.kind(), err.to_string()))
            }
            other => TransportError::Message(other.reason()),
        }
    }

    /// The message surfaced to the peer and to local observers.
    ///
    /// Handler failures report their cause rather than the wrapper.
    pub fn reason(&self) -> String {
        match self {
            TransportError::Handler { source } => source.to_string(),
            other => other.to_string(),
        }
    }
}

/// Errors returned by the public send surface of a connection.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The connection is closed; the packet was not transmitted.
    #[error("connection is closed")]
    Closed,
}
