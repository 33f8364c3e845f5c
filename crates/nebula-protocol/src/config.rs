//! Tunables for connection handlers and the supplied transports.

use std::time::Duration;

use crate::framing::FrameConfig;
use crate::traffic::DEFAULT_WINDOW_TICKS;

/// Configuration shared by [`ConnectionHandler`](crate::ConnectionHandler)s
/// and transports.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Ticks per traffic window. Default: 20.
    pub heartbeat_window_ticks: u32,
    /// How long a stream transport waits for a frame before reporting a
    /// timeout fault. `None` disables the deadline. Default: 30 s.
    pub read_timeout: Option<Duration>,
    /// Capacity of a transport's inbound event channel. Default: 256.
    pub inbound_buffer: usize,
    /// Frame size limits.
    pub frame: FrameConfig,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            heartbeat_window_ticks: DEFAULT_WINDOW_TICKS,
            read_timeout: Some(Duration::from_secs(30)),
            inbound_buffer: 256,
            frame: FrameConfig::default(),
        }
    }
}
