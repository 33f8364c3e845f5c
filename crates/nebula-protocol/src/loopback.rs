//! In-process transport connecting two handlers in the same process, as used
//! by a single-player game hosting its own server.
//!
//! Each end writes straight into the other end's buffer. Disabling reads on
//! an end only holds packets in that buffer; the writer is never blocked.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

use crate::config::ProtocolConfig;
use crate::error::TransportError;
use crate::packet::{Packet, Payload};
use crate::transport::{CloseFuture, Inbound, Transport, WriteCallback};

/// State shared by both ends of a pair. Closing either end closes both.
struct PairState {
    open: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

impl PairState {
    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            self.closed_tx.send_replace(true);
        }
    }
}

/// One end of an in-process connection.
pub struct LoopbackTransport<M> {
    side: &'static str,
    runtime: Handle,
    to_peer: mpsc::UnboundedSender<Packet<M>>,
    read_tx: watch::Sender<bool>,
    state: Arc<PairState>,
}

/// A loopback end together with the inbound stream to pass to
/// [`drive`](crate::drive).
pub struct LoopbackEnd<M> {
    /// The transport to build a handler around.
    pub transport: Arc<LoopbackTransport<M>>,
    /// Packets written by the other end, plus the final close.
    pub inbound: mpsc::Receiver<Inbound<M>>,
}

impl<M: Payload> LoopbackTransport<M> {
    /// Create two connected ends. Must be called inside a tokio runtime.
    pub fn pair(config: &ProtocolConfig) -> (LoopbackEnd<M>, LoopbackEnd<M>) {
        let (closed_tx, closed_rx) = watch::channel(false);
        let state = Arc::new(PairState {
            open: AtomicBool::new(true),
            closed_tx,
        });

        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        let a = Self::spawn_end("client", b_tx, a_rx, &state, closed_rx.clone(), config);
        let b = Self::spawn_end("server", a_tx, b_rx, &state, closed_rx, config);
        (a, b)
    }

    fn spawn_end(
        side: &'static str,
        to_peer: mpsc::UnboundedSender<Packet<M>>,
        from_peer: mpsc::UnboundedReceiver<Packet<M>>,
        state: &Arc<PairState>,
        closed_rx: watch::Receiver<bool>,
        config: &ProtocolConfig,
    ) -> LoopbackEnd<M> {
        let (read_tx, read_rx) = watch::channel(true);
        let (inbound_tx, inbound) = mpsc::channel(config.inbound_buffer.max(1));

        tokio::spawn(pump(from_peer, inbound_tx, read_rx, closed_rx));

        LoopbackEnd {
            transport: Arc::new(Self {
                side,
                runtime: Handle::current(),
                to_peer,
                read_tx,
                state: Arc::clone(state),
            }),
            inbound,
        }
    }
}

/// Move packets from the peer's buffer into this end's inbound stream while
/// reading is enabled. Packets already buffered when the pair closes are still
/// delivered, unless reading is disabled at that point.
async fn pump<M: Payload>(
    mut from_peer: mpsc::UnboundedReceiver<Packet<M>>,
    inbound_tx: mpsc::Sender<Inbound<M>>,
    mut read_rx: watch::Receiver<bool>,
    mut closed_rx: watch::Receiver<bool>,
) {
    loop {
        if *closed_rx.borrow_and_update() {
            break;
        }

        if !*read_rx.borrow_and_update() {
            tokio::select! {
                biased;
                changed = closed_rx.changed() => if changed.is_err() { break },
                changed = read_rx.changed() => if changed.is_err() { break },
            }
            continue;
        }

        tokio::select! {
            biased;
            changed = closed_rx.changed() => if changed.is_err() { break },
            _ = read_rx.changed() => {}
            packet = from_peer.recv() => {
                let Some(packet) = packet else { break };
                if inbound_tx.send(Inbound::Packet(packet)).await.is_err() {
                    return;
                }
            }
        }
    }

    from_peer.close();
    let deliver = *read_rx.borrow();
    while let Ok(packet) = from_peer.try_recv() {
        if deliver && inbound_tx.send(Inbound::Packet(packet)).await.is_err() {
            return;
        }
    }
    let _ = inbound_tx.send(Inbound::Closed).await;
}

impl<M: Payload> Transport<M> for LoopbackTransport<M> {
    /// Completes once the packet is in the peer's buffer, whether or not the
    /// peer is currently reading.
    fn write(&self, packet: Packet<M>, on_complete: WriteCallback) {
        let result = if self.is_open() && self.to_peer.send(packet).is_ok() {
            Ok(())
        } else {
            Err(TransportError::Closed)
        };
        self.runtime.spawn(async move { on_complete(result) });
    }

    fn is_open(&self) -> bool {
        self.state.open.load(Ordering::Acquire)
    }

    fn close(&self) -> CloseFuture {
        self.state.close();
        Box::pin(async {})
    }

    fn set_read_enabled(&self, enabled: bool) {
        self.read_tx.send_replace(enabled);
    }

    fn is_loopback(&self) -> bool {
        true
    }

    fn peer(&self) -> String {
        format!("loopback:{}", self.side)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ChannelSink, NetworkEvent};
    use crate::handler::{ConnectionHandler, ConnectionId, drive};
    use crate::transport::completion;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    type Events = UnboundedReceiver<NetworkEvent<String>>;

    fn connect(
        id: u64,
        end: LoopbackEnd<String>,
    ) -> (Arc<ConnectionHandler<String>>, Arc<LoopbackTransport<String>>, Events) {
        let (sink, events) = ChannelSink::<String>::new();
        let transport: Arc<dyn Transport<String>> = end.transport.clone();
        let handler = ConnectionHandler::builder(ConnectionId(id), transport, Arc::new(sink)).build();
        tokio::spawn(drive(Arc::clone(&handler), end.inbound));
        (handler, end.transport, events)
    }

    async fn next_event(events: &mut Events) -> NetworkEvent<String> {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn next_disconnect(events: &mut Events) -> String {
        loop {
            if let NetworkEvent::Disconnected { reason, .. } = next_event(events).await {
                return reason;
            }
        }
    }

    #[tokio::test]
    async fn test_packets_cross_in_order() {
        let (a, b) = LoopbackTransport::pair(&ProtocolConfig::default());
        let (client, _, _client_events) = connect(1, a);
        let (_server, _, mut server_events) = connect(2, b);

        assert!(client.is_loopback());
        for word in ["one", "two", "three"] {
            client
                .enqueue(Packet::Application(word.to_string()), None)
                .unwrap();
        }
        client.flush_all();

        for expected in ["one", "two", "three"] {
            match next_event(&mut server_events).await {
                NetworkEvent::PacketReceived { packet, .. } => {
                    assert_eq!(packet, Packet::Application(expected.to_string()));
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_ping_answered_across_pair() {
        let (a, b) = LoopbackTransport::pair(&ProtocolConfig::default());
        let (client, _, mut client_events) = connect(1, a);
        let (_server, _, _server_events) = connect(2, b);

        client.tick();
        match next_event(&mut client_events).await {
            NetworkEvent::PacketReceived { packet, .. } => assert_eq!(packet, Packet::pong()),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_write_acknowledged_on_delivery() {
        let (a, b) = LoopbackTransport::pair(&ProtocolConfig::default());
        let (client, _, _client_events) = connect(1, a);
        let (_server, _, _server_events) = connect(2, b);

        let (callback, rx) = completion();
        client
            .send_now(Packet::Application("hi".to_string()), Some(callback))
            .unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), rx).await.unwrap();
        assert!(result.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_read_disabled_holds_packets() {
        let (a, b) = LoopbackTransport::pair(&ProtocolConfig::default());
        let (client, _, _client_events) = connect(1, a);
        let (server, _, mut server_events) = connect(2, b);

        server.set_read_enabled(false);
        tokio::task::yield_now().await;
        client
            .send_now(Packet::Application("held".to_string()), None)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(server_events.try_recv().is_err());

        server.set_read_enabled(true);
        assert!(matches!(
            next_event(&mut server_events).await,
            NetworkEvent::PacketReceived { .. }
        ));
    }

    #[tokio::test]
    async fn test_close_reaches_both_sides() {
        let (a, b) = LoopbackTransport::pair(&ProtocolConfig::default());
        let (client, _, mut client_events) = connect(1, a);
        let (server, _, mut server_events) = connect(2, b);

        client.close("quit to menu").await;
        assert_eq!(next_disconnect(&mut client_events).await, "quit to menu");
        assert_eq!(next_disconnect(&mut server_events).await, "Connection closed");
        assert!(!server.is_open());
    }

    #[tokio::test]
    async fn test_fault_sends_notice_to_peer() {
        let (a, b) = LoopbackTransport::pair(&ProtocolConfig::default());
        let (client, _, mut client_events) = connect(1, a);
        let (server, _, mut server_events) = connect(2, b);

        server.on_inbound_failure(TransportError::handler("world save failed"));

        assert_eq!(next_disconnect(&mut server_events).await, "world save failed");
        assert_eq!(next_disconnect(&mut client_events).await, "world save failed");
        assert!(!client.is_open());
    }

    #[tokio::test]
    async fn test_both_ends_faulting_still_close() {
        let (a, b) = LoopbackTransport::pair(&ProtocolConfig::default());
        let (client, _, mut client_events) = connect(1, a);
        let (server, _, mut server_events) = connect(2, b);

        server.on_inbound_failure(TransportError::Message("server fault".to_string()));
        client.on_inbound_failure(TransportError::Message("client fault".to_string()));

        assert_eq!(next_disconnect(&mut server_events).await, "server fault");
        assert_eq!(next_disconnect(&mut client_events).await, "client fault");
        assert!(!client.is_open());
        assert!(!server.is_open());
    }

    #[tokio::test]
    async fn test_write_completes_while_peer_paused() {
        let (a, b) = LoopbackTransport::pair(&ProtocolConfig::default());
        let (client, _, _client_events) = connect(1, a);
        let (server, _, _server_events) = connect(2, b);

        server.set_read_enabled(false);
        let (callback, rx) = completion();
        client.send_now(Packet::ping(), Some(callback)).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), rx).await.unwrap();
        assert!(result.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_write_after_close_fails_callback() {
        let (a, _b) = LoopbackTransport::<String>::pair(&ProtocolConfig::default());
        let transport = a.transport;
        drop(transport.close());

        let (callback, rx) = completion();
        transport.write(Packet::ping(), callback);
        assert!(matches!(rx.await.unwrap(), Err(TransportError::Closed)));
    }
}
