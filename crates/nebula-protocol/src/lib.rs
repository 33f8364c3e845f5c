//! Per-connection game protocol: heartbeats, disconnect notices, write
//! queueing, fault handling, and the transports that carry packets.

pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod fault;
pub mod framing;
pub mod handler;
pub mod loopback;
pub mod packet;
pub mod queue;
pub mod status;
pub mod tcp;
pub mod traffic;
pub mod transport;

#[cfg(test)]
mod mock;

pub use codec::{CodecError, PROTOCOL_VERSION, decode_packet, encode_packet};
pub use config::ProtocolConfig;
pub use error::{ProtocolError, TIMEOUT_REASON, TransportError};
pub use event::{ChannelSink, EventSink, NetworkEvent};
pub use fault::{FaultAction, FaultKind, FaultLatch};
pub use framing::{FrameConfig, FrameError, FrameReader, FrameWriter};
pub use handler::{
    ConnectionHandler, ConnectionId, DEFAULT_CLOSE_REASON, HandlerBuilder, IdGenerator, drive,
};
pub use loopback::{LoopbackEnd, LoopbackTransport};
pub use packet::{Packet, PacketKind, Payload};
pub use queue::{PendingEntry, PendingQueue};
pub use status::ConnectionStatus;
pub use tcp::TcpTransport;
pub use traffic::{TrafficMonitor, TrafficStats};
pub use transport::{CloseFuture, Inbound, Transport, WriteCallback, WriteResult, completion};
