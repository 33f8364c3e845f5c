//! Recording transport for unit tests.
//!
//! Writes are recorded and their callbacks parked until the test
//! acknowledges or fails them, which keeps callbacks off the `write` path.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::TransportError;
use crate::packet::Packet;
use crate::transport::{CloseFuture, Transport, WriteCallback};

pub(crate) struct MockTransport<M> {
    writes: Mutex<Vec<Packet<M>>>,
    callbacks: Mutex<VecDeque<WriteCallback>>,
    open: AtomicBool,
    read_enabled: AtomicBool,
    close_calls: AtomicUsize,
}

impl<M: Clone> MockTransport<M> {
    pub(crate) fn new() -> Self {
        Self {
            writes: Mutex::new(Vec::new()),
            callbacks: Mutex::new(VecDeque::new()),
            open: AtomicBool::new(true),
            read_enabled: AtomicBool::new(true),
            close_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn writes(&self) -> Vec<Packet<M>> {
        self.writes.lock().unwrap().clone()
    }

    fn pop_callback(&self) -> Option<WriteCallback> {
        self.callbacks.lock().unwrap().pop_front()
    }

    /// Acknowledge every outstanding write, oldest first.
    pub(crate) fn ack_all(&self) {
        while let Some(callback) = self.pop_callback() {
            callback(Ok(()));
        }
    }

    /// Fail the oldest outstanding write.
    pub(crate) fn fail_next(&self, err: TransportError) {
        if let Some(callback) = self.pop_callback() {
            callback(Err(err));
        }
    }

    pub(crate) fn read_enabled(&self) -> bool {
        self.read_enabled.load(Ordering::SeqCst)
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Simulate the peer vanishing: the transport reports closed without
    /// anyone calling `close`.
    pub(crate) fn drop_connection(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

impl<M: Clone + Send + Sync> Transport<M> for MockTransport<M> {
    fn write(&self, packet: Packet<M>, on_complete: WriteCallback) {
        self.writes.lock().unwrap().push(packet);
        self.callbacks.lock().unwrap().push_back(on_complete);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) -> CloseFuture {
        if self.open.swap(false, Ordering::SeqCst) {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
        }
        Box::pin(async {})
    }

    fn set_read_enabled(&self, enabled: bool) {
        self.read_enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_loopback(&self) -> bool {
        false
    }

    fn peer(&self) -> String {
        "mock".to_string()
    }
}
