//! Single-fault latch.
//!
//! The first ordinary fault on a connection gets one graceful attempt: a
//! `Disconnect` notice is sent and the transport closes once that write
//! completes. Anything after that, and any timeout, closes immediately.
//!
//! ```text
//!   Ok ──fault──▶ Faulted ──fault──▶ Closed
//!    └──────────timeout / close──────▶┘
//! ```

use crate::error::{TIMEOUT_REASON, TransportError};

/// Position of a connection on the fault path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultLatch {
    /// No fault observed.
    #[default]
    Ok,
    /// One fault observed; a graceful disconnect is in flight.
    Faulted,
    /// The connection is being, or has been, force-closed.
    Closed,
}

/// Classification of a fault, used for logging severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The peer stopped responding.
    Timeout,
    /// Any other transport-level fault, seen for the first time.
    Protocol,
    /// A fault arriving while a previous one is still being handled.
    DoubleFault,
}

/// What the handler must do in response to a fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultAction {
    /// Send a `Disconnect` notice, stop reading, close when the write completes.
    Graceful {
        /// Reason placed in the notice and the local event.
        reason: String,
    },
    /// Close the transport right away without notifying the peer.
    ForceClose {
        /// Reason placed in the local event.
        reason: String,
        /// Classification for logging.
        kind: FaultKind,
    },
}

impl FaultLatch {
    /// Apply a fault and return the action it requires.
    ///
    /// `transport_open` is the transport's state when the fault was seen. A
    /// fault on an already-closed transport does not move the latch.
    pub fn on_fault(&mut self, error: &TransportError, transport_open: bool) -> FaultAction {
        if !transport_open {
            return FaultAction::ForceClose {
                reason: error.reason(),
                kind: self.classify(error),
            };
        }

        if error.is_timeout() {
            *self = FaultLatch::Closed;
            return FaultAction::ForceClose {
                reason: TIMEOUT_REASON.to_string(),
                kind: FaultKind::Timeout,
            };
        }

        match *self {
            FaultLatch::Ok => {
                *self = FaultLatch::Faulted;
                FaultAction::Graceful {
                    reason: error.reason(),
                }
            }
            FaultLatch::Faulted | FaultLatch::Closed => {
                *self = FaultLatch::Closed;
                FaultAction::ForceClose {
                    reason: error.reason(),
                    kind: FaultKind::DoubleFault,
                }
            }
        }
    }

    /// Record a close that did not come from a fault.
    pub fn close(&mut self) {
        *self = FaultLatch::Closed;
    }

    /// Whether a fault has been latched.
    pub fn is_faulted(self) -> bool {
        self != FaultLatch::Ok
    }

    fn classify(self, error: &TransportError) -> FaultKind {
        if error.is_timeout() {
            FaultKind::Timeout
        } else if self == FaultLatch::Ok {
            FaultKind::Protocol
        } else {
            FaultKind::DoubleFault
        }
    }
}
