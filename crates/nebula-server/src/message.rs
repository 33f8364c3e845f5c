//! Application messages exchanged between players and the server.

use serde::{Deserialize, Serialize};

/// Payload of [`Packet::Application`](nebula_protocol::Packet::Application)
/// for this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameMessage {
    /// First message from a joining player. Completes the handshake.
    Hello {
        /// Display name.
        name: String,
    },
    /// Server reply to [`GameMessage::Hello`].
    Welcome {
        /// Connection id the server assigned.
        connection: u64,
    },
    /// A chat line. Players leave `from` empty; the server fills it in when
    /// relaying.
    Chat {
        /// Sender's display name.
        from: String,
        /// Message text.
        text: String,
    },
}
