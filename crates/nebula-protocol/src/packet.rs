//! Packet model: the two control packets the protocol core intercepts, plus
//! an open extension point for application messages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Bound satisfied by application message types carried in
/// [`Packet::Application`].
///
/// The core never inspects the payload; it only needs to move it across
/// threads and print it in log lines.
pub trait Payload: fmt::Debug + Send + Sync + 'static {}

impl<T> Payload for T where T: fmt::Debug + Send + Sync + 'static {}

/// A decoded packet flowing through a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet<M> {
    /// Keepalive. A ping when `is_reply` is false, a pong otherwise.
    Heartbeat {
        /// Whether this heartbeat answers a ping.
        is_reply: bool,
    },
    /// Announces that the sender is about to close the connection.
    Disconnect {
        /// Human-readable reason, surfaced to the peer's observers.
        reason: String,
    },
    /// Application-defined message, forwarded untouched.
    Application(M),
}

/// Fieldless tag identifying a [`Packet`] variant, used in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// Heartbeat ping.
    Ping,
    /// Heartbeat pong.
    Pong,
    /// Disconnect notice.
    Disconnect,
    /// Application message.
    Application,
}

impl<M> Packet<M> {
    /// A heartbeat ping.
    pub fn ping() -> Self {
        Packet::Heartbeat { is_reply: false }
    }

    /// A heartbeat pong.
    pub fn pong() -> Self {
        Packet::Heartbeat { is_reply: true }
    }

    /// A disconnect notice carrying `reason`.
    pub fn disconnect(reason: impl Into<String>) -> Self {
        Packet::Disconnect {
            reason: reason.into(),
        }
    }

    /// Extract the variant tag without consuming the packet.
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Heartbeat { is_reply: false } => PacketKind::Ping,
            Packet::Heartbeat { is_reply: true } => PacketKind::Pong,
            Packet::Disconnect { .. } => PacketKind::Disconnect,
            Packet::Application(_) => PacketKind::Application,
        }
    }

    /// Whether the protocol core intercepts this packet.
    pub fn is_control(&self) -> bool {
        !matches!(self, Packet::Application(_))
    }

    /// Whether this is a heartbeat ping that expects a pong.
    pub fn is_ping(&self) -> bool {
        matches!(self, Packet::Heartbeat { is_reply: false })
    }
}

impl<M> From<M> for Packet<M> {
    fn from(message: M) -> Self {
        Packet::Application(message)
    }
}
