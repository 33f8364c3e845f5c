//! The transport seam: what the protocol core needs from a byte pipe.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::oneshot;

use crate::error::TransportError;
use crate::packet::Packet;

/// Outcome of a single write, reported once the transport is done with it.
pub type WriteResult = Result<(), TransportError>;

/// Completion callback for a write. Runs exactly once.
pub type WriteCallback = Box<dyn FnOnce(WriteResult) + Send + 'static>;

/// Future returned by [`Transport::close`]; resolves once teardown finished.
pub type CloseFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A connected byte transport carrying [`Packet`]s.
///
/// Implementations must never invoke a write callback from inside
/// [`Transport::write`] itself. Callbacks run later, from the transport's own
/// I/O task, so callers may hold locks across `write`.
pub trait Transport<M>: Send + Sync {
    /// Queue `packet` for transmission; `on_complete` fires once the packet
    /// has been handed to the peer or the write has failed.
    fn write(&self, packet: Packet<M>, on_complete: WriteCallback);

    /// Whether the transport still accepts writes.
    fn is_open(&self) -> bool;

    /// Begin closing. The returned future resolves when teardown is done.
    /// Calling it again after the transport closed resolves immediately.
    fn close(&self) -> CloseFuture;

    /// Pause or resume consumption of inbound data.
    fn set_read_enabled(&self, enabled: bool);

    /// Whether both ends live in the same process.
    fn is_loopback(&self) -> bool;

    /// Description of the remote end, for log lines.
    fn peer(&self) -> String;
}

/// What a transport reports to the I/O side of a connection.
#[derive(Debug)]
pub enum Inbound<M> {
    /// A decoded packet.
    Packet(Packet<M>),
    /// A transport-level fault. The stream may continue afterwards.
    Fault(TransportError),
    /// The transport closed. Nothing follows.
    Closed,
}

/// Create a callback paired with a receiver that resolves to the write's
/// outcome, for callers that prefer awaiting over callbacks.
pub fn completion() -> (WriteCallback, oneshot::Receiver<WriteResult>) {
    let (tx, rx) = oneshot::channel();
    let callback: WriteCallback = Box::new(move |result| {
        let _ = tx.send(result);
    });
    (callback, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completion_delivers_result() {
        let (callback, rx) = completion();
        callback(Ok(()));
        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_completion_delivers_failure() {
        let (callback, rx) = completion();
        callback(Err(TransportError::Closed));
        assert!(matches!(rx.await.unwrap(), Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_dropped_callback_closes_receiver() {
        let (callback, rx) = completion();
        drop(callback);
        assert!(rx.await.is_err());
    }
}
