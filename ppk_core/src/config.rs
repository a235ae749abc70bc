//! Runtime configuration for the acquisition engine.
//!
//! Separate from the TOML-deserialized config in `ppk_config`; see
//! `conversions` for the bridge.
use std::time::Duration;

/// Timeouts, retry policy and decode options of a device handle.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineCfg {
    /// Bound on a single channel read.
    pub read_timeout: Duration,
    /// Consecutive failed reads tolerated before the stream ends.
    pub max_retries: u32,
    /// Backoff step; attempt n waits `backoff * n`.
    pub backoff: Duration,
    /// Readings discarded after each range switch.
    pub settle_drop: u8,
    pub spike_filter: bool,
    /// Bound on the identification exchange at open.
    pub identify_timeout: Duration,
    /// Bound on waiting for a mode-select echo.
    pub ack_timeout: Duration,
    /// Bytes requested per read.
    pub read_chunk: usize,
    /// Upper bound on bytes discarded when draining the channel.
    pub drain_limit: usize,
}

impl Default for EngineCfg {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(100),
            max_retries: 3,
            backoff: Duration::from_millis(10),
            settle_drop: 1,
            spike_filter: false,
            identify_timeout: Duration::from_secs(2),
            ack_timeout: Duration::from_millis(500),
            read_chunk: 4096,
            drain_limit: 1 << 20,
        }
    }
}
