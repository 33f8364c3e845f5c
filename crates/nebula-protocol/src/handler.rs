//! Per-connection protocol handler.
//!
//! A [`ConnectionHandler`] sits between one transport and the rest of the
//! game. Two call sources share it: the transport's I/O task, which feeds
//! inbound packets and faults through [`drive`], and the simulation thread,
//! which calls [`ConnectionHandler::tick`], sends packets, and may close the
//! connection on shutdown.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::mpsc;

use crate::config::ProtocolConfig;
use crate::error::{ProtocolError, TransportError};
use crate::event::{EventSink, NetworkEvent};
use crate::fault::{FaultAction, FaultKind, FaultLatch};
use crate::packet::{Packet, Payload};
use crate::queue::{PendingEntry, PendingQueue};
use crate::status::{ConnectionStatus, StatusCell};
use crate::traffic::{TrafficMonitor, TrafficStats};
use crate::transport::{Inbound, Transport, WriteCallback};

/// Reason reported when the transport closes without anyone giving one.
pub const DEFAULT_CLOSE_REASON: &str = "Connection closed";

/// Identifier of a connection within one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Atomic generator for monotonically increasing [`ConnectionId`]s.
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Create a new generator starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Return the next unique [`ConnectionId`].
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`ConnectionHandler`].
pub struct HandlerBuilder<M> {
    id: ConnectionId,
    transport: Arc<dyn Transport<M>>,
    global_sink: Arc<dyn EventSink<M>>,
    local_sink: Option<Arc<dyn EventSink<M>>>,
    window_ticks: u32,
}

impl<M: Payload> HandlerBuilder<M> {
    /// Give the connection its own event sink. Without one, the global sink
    /// receives everything.
    pub fn local_sink(mut self, sink: Arc<dyn EventSink<M>>) -> Self {
        self.local_sink = Some(sink);
        self
    }

    /// Take the traffic window length from `config`.
    pub fn config(mut self, config: &ProtocolConfig) -> Self {
        self.window_ticks = config.heartbeat_window_ticks;
        self
    }

    /// Build the handler.
    pub fn build(self) -> Arc<ConnectionHandler<M>> {
        let local_sink = self
            .local_sink
            .unwrap_or_else(|| Arc::clone(&self.global_sink));

        Arc::new_cyclic(|weak_self| ConnectionHandler {
            id: self.id,
            weak_self: weak_self.clone(),
            transport: self.transport,
            local_sink,
            global_sink: self.global_sink,
            status: StatusCell::new(),
            queue: PendingQueue::new(),
            traffic: TrafficMonitor::new(self.window_ticks),
            latch: Mutex::new(FaultLatch::Ok),
            close_reason: Mutex::new(None),
            notified: AtomicBool::new(false),
        })
    }
}

/// Protocol engine for one logical connection.
pub struct ConnectionHandler<M> {
    id: ConnectionId,
    weak_self: Weak<ConnectionHandler<M>>,
    transport: Arc<dyn Transport<M>>,
    local_sink: Arc<dyn EventSink<M>>,
    global_sink: Arc<dyn EventSink<M>>,
    status: StatusCell,
    queue: PendingQueue<M>,
    traffic: TrafficMonitor,
    latch: Mutex<FaultLatch>,
    /// Most recent reason a close was requested for.
    close_reason: Mutex<Option<String>>,
    notified: AtomicBool,
}

impl<M> ConnectionHandler<M> {
    /// Start building a handler for `transport`, publishing disconnects to
    /// `global_sink`.
    pub fn builder(
        id: ConnectionId,
        transport: Arc<dyn Transport<M>>,
        global_sink: Arc<dyn EventSink<M>>,
    ) -> HandlerBuilder<M> {
        HandlerBuilder {
            id,
            transport,
            global_sink,
            local_sink: None,
            window_ticks: ProtocolConfig::default().heartbeat_window_ticks,
        }
    }

    /// This connection's identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current lifecycle phase.
    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    /// Called by the handshake layer once negotiation has finished.
    pub fn mark_ready(&self) -> bool {
        self.status.transition(ConnectionStatus::Ready)
    }

    /// Record an application-defined sub-phase. The handler never reads it.
    pub fn set_phase(&self, label: &str) {
        self.status.set_phase(label);
    }

    /// The application-defined sub-phase, if one was set.
    pub fn phase(&self) -> Option<String> {
        self.status.phase()
    }

    /// Whether the transport is still open.
    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// Whether the peer lives in this process.
    pub fn is_loopback(&self) -> bool {
        self.transport.is_loopback()
    }

    /// Pause or resume inbound reads on the transport.
    pub fn set_read_enabled(&self, enabled: bool) {
        self.transport.set_read_enabled(enabled);
    }

    /// Description of the remote end.
    pub fn peer(&self) -> String {
        self.transport.peer()
    }

    /// Snapshot of the traffic monitor.
    pub fn traffic(&self) -> TrafficStats {
        self.traffic.stats()
    }

    /// Number of packets queued but not yet handed to the transport.
    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    fn accepts_writes(&self) -> bool {
        self.status() != ConnectionStatus::Closed && self.transport.is_open()
    }

    fn set_close_reason(&self, reason: &str) {
        *self
            .close_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reason.to_string());
    }

    fn latch(&self) -> std::sync::MutexGuard<'_, FaultLatch> {
        self.latch.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Complete a refused write's callback so awaiting callers never hang.
fn reject(on_complete: Option<WriteCallback>) -> ProtocolError {
    if let Some(callback) = on_complete {
        callback(Err(TransportError::Closed));
    }
    ProtocolError::Closed
}

impl<M: Payload> ConnectionHandler<M> {
    /// Queue `packet` for the next flush. Never blocks on I/O.
    pub fn enqueue(
        &self,
        packet: Packet<M>,
        on_complete: Option<WriteCallback>,
    ) -> Result<(), ProtocolError> {
        if !self.accepts_writes() {
            return Err(reject(on_complete));
        }
        self.queue
            .push(PendingEntry::new(packet, on_complete))
            .map_err(|entry| reject(entry.on_complete))
    }

    /// Flush everything queued, then write `packet`.
    ///
    /// A caller mixing [`enqueue`](Self::enqueue) and `send_now` never sees a
    /// later `send_now` overtake an earlier queued packet.
    pub fn send_now(
        &self,
        packet: Packet<M>,
        on_complete: Option<WriteCallback>,
    ) -> Result<(), ProtocolError> {
        if !self.accepts_writes() {
            return Err(reject(on_complete));
        }
        self.queue
            .flush_then(PendingEntry::new(packet, on_complete), |entry| {
                self.submit(entry)
            })
            .map_err(|entry| reject(entry.on_complete))
    }

    /// Hand every queued packet to the transport. Returns how many were sent.
    pub fn flush_all(&self) -> usize {
        self.queue.flush(|entry| self.submit(entry))
    }

    /// Write one entry. A failed write is reported back into the fault path
    /// after the caller's own callback has seen it.
    fn submit(&self, entry: PendingEntry<M>) {
        let PendingEntry {
            packet,
            on_complete,
        } = entry;
        let kind = packet.kind();
        let weak = self.weak_self.clone();

        self.traffic.record_outbound();
        self.transport.write(
            packet,
            Box::new(move |result| {
                let failure = result.as_ref().err().map(TransportError::replicate);
                if let Some(callback) = on_complete {
                    callback(result);
                }
                if let Some(err) = failure
                    && let Some(handler) = weak.upgrade()
                {
                    tracing::debug!(
                        "Write of {kind:?} on connection {:?} failed: {err}",
                        handler.id
                    );
                    // Already torn down, e.g. by this write's own callback.
                    let closed = *handler.latch() == FaultLatch::Closed;
                    if !closed {
                        handler.on_inbound_failure(err);
                    }
                }
            }),
        );
    }

    /// Advance the traffic monitor by one simulation tick.
    ///
    /// Sends a heartbeat ping when outbound traffic has gone quiet, and
    /// flushes the pending queue either way.
    pub fn tick(&self) {
        if self.status() == ConnectionStatus::Closed {
            return;
        }

        if self.traffic.tick() {
            tracing::debug!("Connection {:?} idle, sending heartbeat", self.id);
            if self.send_now(Packet::ping(), None).is_err() {
                tracing::trace!("Heartbeat skipped, connection {:?} closed", self.id);
            }
        } else {
            self.flush_all();
        }
    }

    /// Dispatch one decoded inbound packet.
    pub fn on_packet(self: &Arc<Self>, packet: Packet<M>) {
        self.traffic.record_inbound();

        match &packet {
            Packet::Heartbeat { is_reply: false } => {
                tracing::debug!("Heartbeat ping received on connection {:?}", self.id);
                if self.send_now(Packet::pong(), None).is_err() {
                    tracing::trace!("Pong skipped, connection {:?} closed", self.id);
                }
            }
            Packet::Heartbeat { is_reply: true } => {
                tracing::debug!("Heartbeat pong received on connection {:?}", self.id);
            }
            Packet::Disconnect { reason } => {
                tracing::info!(
                    "Peer {} announced disconnect of {:?}: {reason}",
                    self.peer(),
                    self.id
                );
                let mut close_reason = self
                    .close_reason
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                close_reason.get_or_insert_with(|| reason.clone());
            }
            Packet::Application(_) => {}
        }

        self.local_sink.publish(NetworkEvent::PacketReceived {
            handler: Arc::clone(self),
            packet,
        });
    }

    /// React to a low-level transport fault.
    ///
    /// Never blocks: any close this triggers runs on a spawned task.
    pub fn on_inbound_failure(self: &Arc<Self>, error: TransportError) {
        let open = self.transport.is_open();
        let action = self.latch().on_fault(&error, open);

        match action {
            FaultAction::Graceful { reason } => {
                tracing::warn!(
                    "Exception in connection {:?} to {}: {error:?}",
                    self.id,
                    self.peer()
                );
                self.status.transition(ConnectionStatus::Disconnecting);
                self.set_close_reason(&reason);

                let weak = self.weak_self.clone();
                let close_reason = reason.clone();
                let notice = self.send_now(
                    Packet::disconnect(reason),
                    Some(Box::new(move |_| {
                        if let Some(handler) = weak.upgrade() {
                            handler.force_close(close_reason);
                        }
                    })),
                );
                // The rejected callback already scheduled the close.
                if notice.is_err() {
                    tracing::debug!("Disconnect notice for {:?} not sent", self.id);
                }
                self.transport.set_read_enabled(false);
            }
            FaultAction::ForceClose { reason, kind } => {
                match kind {
                    FaultKind::DoubleFault => tracing::error!(
                        "DOUBLE FAILURE! Exception in connection {:?} to {}: {error:?}",
                        self.id,
                        self.peer()
                    ),
                    FaultKind::Timeout => tracing::warn!(
                        "Connection {:?} to {} timed out",
                        self.id,
                        self.peer()
                    ),
                    FaultKind::Protocol => tracing::warn!(
                        "Exception on closed connection {:?}: {error:?}",
                        self.id
                    ),
                }
                self.force_close(reason);
            }
        }
    }

    /// Close without notifying the peer. Runs the close on a spawned task.
    fn force_close(self: &Arc<Self>, reason: String) {
        self.latch().close();

        if !self.transport.is_open() {
            self.set_close_reason(&reason);
            self.finish_close(reason);
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let handler = Arc::clone(self);
                runtime.spawn(async move {
                    handler.close(reason).await;
                });
            }
            Err(_) => {
                tracing::debug!(
                    "No runtime for connection {:?}, closing without waiting",
                    self.id
                );
                self.set_close_reason(&reason);
                drop(self.transport.close());
                self.finish_close(reason);
            }
        }
    }

    /// Close the transport, wait for teardown, then publish the disconnect.
    ///
    /// Does nothing if the transport is already closed. May suspend; do not
    /// call from a context that must stay non-blocking.
    pub async fn close(&self, reason: impl Into<String>) {
        if !self.transport.is_open() {
            return;
        }

        let reason = reason.into();
        self.set_close_reason(&reason);
        self.latch().close();
        self.status.transition(ConnectionStatus::Disconnecting);
        tracing::info!(
            "Closing connection {:?} to {}: {reason}",
            self.id,
            self.peer()
        );

        self.transport.close().await;
        self.finish_close(reason);
    }

    /// The transport reported that it closed.
    pub fn on_transport_closed(&self) {
        let reason = self
            .close_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| DEFAULT_CLOSE_REASON.to_string());
        self.finish_close(reason);
    }

    fn finish_close(&self, reason: String) {
        self.status.transition(ConnectionStatus::Closed);
        self.latch().close();

        let dropped = self.queue.close();
        if !dropped.is_empty() {
            tracing::debug!(
                "Discarding {} unsent packets on connection {:?}",
                dropped.len(),
                self.id
            );
        }
        for entry in dropped {
            reject(entry.on_complete);
        }

        self.notify_disconnect(reason);
    }

    /// Publish [`NetworkEvent::Disconnected`] once per connection.
    ///
    /// The local sink and, when it is a different sink, the global sink each
    /// receive it. Later calls do nothing.
    pub fn notify_disconnect(&self, reason: impl Into<String>) {
        if self.notified.swap(true, Ordering::AcqRel) {
            return;
        }

        let reason = reason.into();
        tracing::info!("Connection {:?} disconnected: {reason}", self.id);

        let event = || NetworkEvent::Disconnected {
            connection: self.id,
            reason: reason.clone(),
        };
        if !Arc::ptr_eq(&self.local_sink, &self.global_sink) {
            self.local_sink.publish(event());
        }
        self.global_sink.publish(event());
    }

    /// Whether the disconnect event has been published.
    pub fn is_disconnect_notified(&self) -> bool {
        self.notified.load(Ordering::Acquire)
    }
}

/// Feed a transport's inbound stream into `handler` until it closes.
pub async fn drive<M: Payload>(
    handler: Arc<ConnectionHandler<M>>,
    mut inbound: mpsc::Receiver<Inbound<M>>,
) {
    while let Some(event) = inbound.recv().await {
        match event {
            Inbound::Packet(packet) => handler.on_packet(packet),
            Inbound::Fault(err) => handler.on_inbound_failure(err),
            Inbound::Closed => break,
        }
    }
    handler.on_transport_closed();
}
