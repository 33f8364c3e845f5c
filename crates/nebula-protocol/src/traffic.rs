//! Packet-rate tracking and the keepalive decision.
//!
//! Counters are bumped from the I/O side without locking. Every
//! `window_ticks` ticks the counts are folded into an exponential moving
//! average and reset. When the smoothed outbound rate rounds to zero the
//! connection looks idle to the peer, and a heartbeat ping is due.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

/// Weight of the newest window in the moving average.
pub const SMOOTHING: f32 = 0.25;

/// Default number of ticks per measurement window.
pub const DEFAULT_WINDOW_TICKS: u32 = 20;

/// Point-in-time view of the traffic monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrafficStats {
    /// Smoothed inbound packets per window.
    pub avg_in: f32,
    /// Smoothed outbound packets per window.
    pub avg_out: f32,
    /// Inbound packets counted so far in the current window.
    pub window_in: u32,
    /// Outbound packets counted so far in the current window.
    pub window_out: u32,
    /// Number of completed windows.
    pub windows: u64,
}

#[derive(Default)]
struct Averages {
    ticks: u64,
    avg_in: f32,
    avg_out: f32,
    windows: u64,
}

/// Inbound/outbound packet counters with per-window smoothing.
pub struct TrafficMonitor {
    window_ticks: u32,
    packets_in: AtomicU32,
    packets_out: AtomicU32,
    averages: Mutex<Averages>,
}

impl TrafficMonitor {
    /// Create a monitor that closes a window every `window_ticks` ticks.
    pub fn new(window_ticks: u32) -> Self {
        Self {
            window_ticks: window_ticks.max(1),
            packets_in: AtomicU32::new(0),
            packets_out: AtomicU32::new(0),
            averages: Mutex::new(Averages::default()),
        }
    }

    /// Count one received packet.
    pub fn record_inbound(&self) {
        self.packets_in.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one packet handed to the transport.
    pub fn record_outbound(&self) {
        self.packets_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Advance by one tick. Returns `true` when a heartbeat ping is due.
    ///
    /// The first tick always closes a window.
    pub fn tick(&self) -> bool {
        let mut averages = self.averages.lock().unwrap_or_else(PoisonError::into_inner);
        let boundary = averages.ticks % u64::from(self.window_ticks) == 0;
        averages.ticks += 1;
        if !boundary {
            return false;
        }

        let count_in = self.packets_in.swap(0, Ordering::Relaxed);
        let count_out = self.packets_out.swap(0, Ordering::Relaxed);
        averages.avg_in = averages.avg_in * (1.0 - SMOOTHING) + count_in as f32 * SMOOTHING;
        averages.avg_out = averages.avg_out * (1.0 - SMOOTHING) + count_out as f32 * SMOOTHING;
        averages.windows += 1;

        (averages.avg_out * 4.0).round() == 0.0
    }

    /// Snapshot the current averages and in-window counts.
    pub fn stats(&self) -> TrafficStats {
        let averages = self.averages.lock().unwrap_or_else(PoisonError::into_inner);
        TrafficStats {
            avg_in: averages.avg_in,
            avg_out: averages.avg_out,
            window_in: self.packets_in.load(Ordering::Relaxed),
            window_out: self.packets_out.load(Ordering::Relaxed),
            windows: averages.windows,
        }
    }
}

impl Default for TrafficMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_TICKS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run one full window, recording `outbound` packets before its boundary
    /// tick. Returns whether the boundary asked for a heartbeat.
    fn run_window(monitor: &TrafficMonitor, outbound: u32) -> bool {
        for _ in 0..outbound {
            monitor.record_outbound();
        }
        let due = monitor.tick();
        for _ in 1..monitor.window_ticks {
            assert!(!monitor.tick(), "only the boundary tick may request a ping");
        }
        due
    }

    #[test]
    fn test_idle_connection_pings_at_first_boundary() {
        let monitor = TrafficMonitor::default();
        assert!(monitor.tick());
    }

    #[test]
    fn test_idle_windows_keep_requesting() {
        let monitor = TrafficMonitor::default();
        for _ in 0..5 {
            assert!(run_window(&monitor, 0));
        }
        assert_eq!(monitor.stats().windows, 5);
    }

    #[test]
    fn test_steady_traffic_suppresses_ping() {
        let monitor = TrafficMonitor::default();
        for _ in 0..10 {
            assert!(!run_window(&monitor, 1));
        }
        assert!(monitor.stats().avg_out > 0.125);
    }

    #[test]
    fn test_average_formula() {
        let monitor = TrafficMonitor::new(1);
        for _ in 0..4 {
            monitor.record_outbound();
        }
        monitor.record_inbound();
        monitor.tick();
        let stats = monitor.stats();
        assert_eq!(stats.avg_out, 1.0);
        assert_eq!(stats.avg_in, 0.25);

        monitor.tick();
        assert_eq!(monitor.stats().avg_out, 0.75);
    }

    #[test]
    fn test_counters_reset_each_window() {
        let monitor = TrafficMonitor::new(2);
        monitor.record_inbound();
        monitor.record_outbound();
        assert_eq!(monitor.stats().window_in, 1);
        monitor.tick();
        let stats = monitor.stats();
        assert_eq!(stats.window_in, 0);
        assert_eq!(stats.window_out, 0);
    }

    #[test]
    fn test_ping_resumes_after_traffic_decays() {
        let monitor = TrafficMonitor::new(1);
        for _ in 0..4 {
            monitor.record_outbound();
        }
        assert!(!monitor.tick());

        // avg_out = 0.75^n; rounds to zero once below 0.125
        let quiet_windows = (1..=20).find(|_| monitor.tick()).unwrap();
        assert_eq!(quiet_windows, 8);
    }

    #[test]
    fn test_zero_window_treated_as_one() {
        let monitor = TrafficMonitor::new(0);
        assert!(monitor.tick());
        assert!(monitor.tick());
    }
}
