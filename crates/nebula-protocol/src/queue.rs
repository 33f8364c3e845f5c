//! FIFO buffer of packets awaiting hand-off to the transport.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use crate::packet::Packet;
use crate::transport::WriteCallback;

/// A packet waiting to be written, with its optional completion callback.
pub struct PendingEntry<M> {
    /// The packet to write.
    pub packet: Packet<M>,
    /// Fired once the transport has finished with the packet.
    pub on_complete: Option<WriteCallback>,
}

impl<M> PendingEntry<M> {
    /// Create an entry.
    pub fn new(packet: Packet<M>, on_complete: Option<WriteCallback>) -> Self {
        Self {
            packet,
            on_complete,
        }
    }
}

struct Inner<M> {
    entries: VecDeque<PendingEntry<M>>,
    closed: bool,
}

/// Ordered queue of [`PendingEntry`]s shared by the tick and I/O sides.
///
/// The lock is held for the whole drain-and-submit, so two concurrent
/// flushes cannot interleave their writes.
pub struct PendingQueue<M> {
    inner: Mutex<Inner<M>>,
}

impl<M> PendingQueue<M> {
    /// Create an empty, open queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: VecDeque::new(),
                closed: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<M>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append to the tail. Hands the entry back if the queue is closed.
    pub fn push(&self, entry: PendingEntry<M>) -> Result<(), PendingEntry<M>> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(entry);
        }
        inner.entries.push_back(entry);
        Ok(())
    }

    /// Drain every queued entry in FIFO order into `submit`.
    ///
    /// Returns the number of entries submitted.
    pub fn flush(&self, mut submit: impl FnMut(PendingEntry<M>)) -> usize {
        let mut inner = self.lock();
        let count = inner.entries.len();
        while let Some(entry) = inner.entries.pop_front() {
            submit(entry);
        }
        count
    }

    /// Drain the queue, then submit `entry`, without letting any other
    /// flush run in between. Hands the entry back if the queue is closed.
    pub fn flush_then(
        &self,
        entry: PendingEntry<M>,
        mut submit: impl FnMut(PendingEntry<M>),
    ) -> Result<(), PendingEntry<M>> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(entry);
        }
        while let Some(queued) = inner.entries.pop_front() {
            submit(queued);
        }
        submit(entry);
        Ok(())
    }

    /// Close the queue and return whatever was still waiting.
    ///
    /// Later pushes are refused.
    pub fn close(&self) -> Vec<PendingEntry<M>> {
        let mut inner = self.lock();
        inner.closed = true;
        inner.entries.drain(..).collect()
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}

impl<M> Default for PendingQueue<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn app(n: u32) -> PendingEntry<u32> {
        PendingEntry::new(Packet::Application(n), None)
    }

    fn payload(entry: &PendingEntry<u32>) -> u32 {
        match entry.packet {
            Packet::Application(n) => n,
            _ => panic!("expected application packet"),
        }
    }

    #[test]
    fn test_flush_is_fifo() {
        let queue = PendingQueue::new();
        for n in 0..5 {
            queue.push(app(n)).ok().unwrap();
        }
        let mut seen = Vec::new();
        assert_eq!(queue.flush(|e| seen.push(payload(&e))), 5);
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_flush_then_sends_queued_first() {
        let queue = PendingQueue::new();
        queue.push(app(1)).ok().unwrap();
        queue.push(app(2)).ok().unwrap();

        let mut seen = Vec::new();
        queue
            .flush_then(app(3), |e| seen.push(payload(&e)))
            .ok()
            .unwrap();
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn test_closed_queue_refuses_and_returns_leftovers() {
        let queue = PendingQueue::new();
        queue.push(app(1)).ok().unwrap();
        let leftovers = queue.close();
        assert_eq!(leftovers.len(), 1);

        assert!(queue.push(app(2)).is_err());
        let mut submitted = 0;
        assert!(queue.flush_then(app(3), |_| submitted += 1).is_err());
        assert_eq!(submitted, 0);
    }

    #[test]
    fn test_concurrent_producers_keep_per_producer_order() {
        let queue = Arc::new(PendingQueue::new());
        let handles: Vec<_> = (0..4u32)
            .map(|producer| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for seq in 0..100u32 {
                        queue.push(app(producer * 1000 + seq)).ok().unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut seen = Vec::new();
        queue.flush(|e| seen.push(payload(&e)));
        assert_eq!(seen.len(), 400);
        for producer in 0..4u32 {
            let mine: Vec<u32> = seen
                .iter()
                .copied()
                .filter(|n| n / 1000 == producer)
                .collect();
            assert!(mine.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
