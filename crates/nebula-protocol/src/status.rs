//! Connection lifecycle: Handshaking → Ready → Disconnecting → Closed.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};

/// Coarse lifecycle phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionStatus {
    /// Negotiation in progress; application packets not yet expected.
    Handshaking = 0,
    /// Negotiation finished, the connection carries application traffic.
    Ready = 1,
    /// A graceful close has started.
    Disconnecting = 2,
    /// The transport is confirmed closed. Terminal.
    Closed = 3,
}

impl ConnectionStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectionStatus::Handshaking,
            1 => ConnectionStatus::Ready,
            2 => ConnectionStatus::Disconnecting,
            _ => ConnectionStatus::Closed,
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: ConnectionStatus) -> bool {
        use ConnectionStatus::*;
        matches!(
            (self, next),
            (Handshaking, Ready)
                | (Handshaking | Ready, Disconnecting)
                | (Handshaking | Ready | Disconnecting, Closed)
        )
    }

    /// Whether application packets may flow.
    pub fn is_usable(self) -> bool {
        self == ConnectionStatus::Ready
    }

    /// Whether a close is in progress or done.
    pub fn is_closing(self) -> bool {
        matches!(
            self,
            ConnectionStatus::Disconnecting | ConnectionStatus::Closed
        )
    }
}

/// Lock-free holder for a [`ConnectionStatus`], plus the opaque
/// application-defined sub-phase label.
pub struct StatusCell {
    raw: AtomicU8,
    phase: Mutex<Option<String>>,
}

impl StatusCell {
    /// Create a cell in [`ConnectionStatus::Handshaking`].
    pub fn new() -> Self {
        Self {
            raw: AtomicU8::new(ConnectionStatus::Handshaking as u8),
            phase: Mutex::new(None),
        }
    }

    /// Current status.
    pub fn get(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.raw.load(Ordering::Acquire))
    }

    /// Attempt the transition to `next`.
    ///
    /// Illegal transitions are ignored and return `false`; teardown races
    /// routinely produce redundant close requests.
    pub fn transition(&self, next: ConnectionStatus) -> bool {
        let result = self
            .raw
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                ConnectionStatus::from_u8(raw)
                    .can_transition_to(next)
                    .then_some(next as u8)
            });

        match result {
            Ok(_) => true,
            Err(raw) => {
                tracing::trace!(
                    "Rejected status transition {:?} -> {:?}",
                    ConnectionStatus::from_u8(raw),
                    next
                );
                false
            }
        }
    }

    /// Set the application-defined sub-phase label.
    pub fn set_phase(&self, label: &str) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = Some(label.to_string());
    }

    /// The application-defined sub-phase label, if any.
    pub fn phase(&self) -> Option<String> {
        self.phase
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionStatus::*;

    #[test]
    fn test_starts_handshaking() {
        assert_eq!(StatusCell::new().get(), Handshaking);
    }

    #[test]
    fn test_forward_path() {
        let cell = StatusCell::new();
        assert!(cell.transition(Ready));
        assert!(cell.transition(Disconnecting));
        assert!(cell.transition(Closed));
        assert_eq!(cell.get(), Closed);
    }

    #[test]
    fn test_close_during_handshake() {
        let cell = StatusCell::new();
        assert!(cell.transition(Disconnecting));
        assert_eq!(cell.get(), Disconnecting);

        let cell = StatusCell::new();
        assert!(cell.transition(Closed));
    }

    #[test]
    fn test_closed_is_terminal() {
        let cell = StatusCell::new();
        cell.transition(Closed);
        for next in [Handshaking, Ready, Disconnecting, Closed] {
            assert!(!cell.transition(next));
        }
        assert_eq!(cell.get(), Closed);
    }

    #[test]
    fn test_backward_transitions_rejected() {
        let cell = StatusCell::new();
        cell.transition(Ready);
        assert!(!cell.transition(Handshaking));
        cell.transition(Disconnecting);
        assert!(!cell.transition(Ready));
        assert!(!cell.transition(Disconnecting));
        assert_eq!(cell.get(), Disconnecting);
    }

    #[test]
    fn test_usable_only_when_ready() {
        assert!(Ready.is_usable());
        assert!(!Handshaking.is_usable());
        assert!(!Disconnecting.is_usable());
        assert!(Disconnecting.is_closing());
        assert!(Closed.is_closing());
    }

    #[test]
    fn test_phase_label_is_opaque() {
        let cell = StatusCell::new();
        assert_eq!(cell.phase(), None);
        cell.set_phase("awaiting-login");
        assert_eq!(cell.phase().as_deref(), Some("awaiting-login"));
        assert_eq!(cell.get(), Handshaking);
    }
}
