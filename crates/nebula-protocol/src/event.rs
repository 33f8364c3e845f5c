//! Events a connection publishes, and the sinks that receive them.
//!
//! Each connection is handed two sinks at construction: its own local sink
//! and the system-wide one. They may be the same sink.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::handler::{ConnectionHandler, ConnectionId};
use crate::packet::Packet;

/// Notification published by a [`ConnectionHandler`].
pub enum NetworkEvent<M> {
    /// A packet arrived. Heartbeats are included.
    PacketReceived {
        /// The connection the packet arrived on, for replies.
        handler: Arc<ConnectionHandler<M>>,
        /// The decoded packet.
        packet: Packet<M>,
    },
    /// The connection is gone. Published at most once per connection.
    Disconnected {
        /// The connection that closed.
        connection: ConnectionId,
        /// Why it closed.
        reason: String,
    },
}

impl<M> NetworkEvent<M> {
    /// The connection this event concerns.
    pub fn connection(&self) -> ConnectionId {
        match self {
            NetworkEvent::PacketReceived { handler, .. } => handler.id(),
            NetworkEvent::Disconnected { connection, .. } => *connection,
        }
    }
}

impl<M: Clone> Clone for NetworkEvent<M> {
    fn clone(&self) -> Self {
        match self {
            NetworkEvent::PacketReceived { handler, packet } => NetworkEvent::PacketReceived {
                handler: Arc::clone(handler),
                packet: packet.clone(),
            },
            NetworkEvent::Disconnected { connection, reason } => NetworkEvent::Disconnected {
                connection: *connection,
                reason: reason.clone(),
            },
        }
    }
}

impl<M: std::fmt::Debug> std::fmt::Debug for NetworkEvent<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkEvent::PacketReceived { handler, packet } => f
                .debug_struct("PacketReceived")
                .field("connection", &handler.id())
                .field("packet", packet)
                .finish(),
            NetworkEvent::Disconnected { connection, reason } => f
                .debug_struct("Disconnected")
                .field("connection", connection)
                .field("reason", reason)
                .finish(),
        }
    }
}

/// Receiver of [`NetworkEvent`]s.
pub trait EventSink<M>: Send + Sync {
    /// Deliver one event. Must not block.
    fn publish(&self, event: NetworkEvent<M>);
}

impl<M, F> EventSink<M> for F
where
    F: Fn(NetworkEvent<M>) + Send + Sync,
{
    fn publish(&self, event: NetworkEvent<M>) {
        self(event);
    }
}

/// Sink that forwards events over an unbounded channel, so the game thread
/// can drain them once per tick.
pub struct ChannelSink<M> {
    tx: mpsc::UnboundedSender<NetworkEvent<M>>,
}

impl<M> ChannelSink<M> {
    /// Create a sink and the receiver that drains it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NetworkEvent<M>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl<M: Send + Sync> EventSink<M> for ChannelSink<M> {
    fn publish(&self, event: NetworkEvent<M>) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Event receiver dropped, discarding network event");
        }
    }
}
