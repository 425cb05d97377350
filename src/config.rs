//! Runtime configuration for a bridge session

use std::time::Duration;

use crate::protocol::buffer::DEFAULT_CAPACITY;
use crate::pty::WindowSize;

/// Default bound on each readiness wait, which is also how often child
/// liveness is checked
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default size of the transient read chunk used for both directions
pub const DEFAULT_READ_CHUNK: usize = 65536;

/// Session configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Upper bound on a single readiness wait
    pub poll_interval: Duration,
    /// Bytes read per call from either stream
    pub read_chunk: usize,
    /// Initial frame buffer capacity
    pub initial_capacity: usize,
    /// Window size the PTY starts with
    pub window: WindowSize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            read_chunk: DEFAULT_READ_CHUNK,
            initial_capacity: DEFAULT_CAPACITY,
            window: WindowSize::default(),
        }
    }
}

impl SessionConfig {
    /// Poll timeout in the millisecond form `poll(2)` takes, clamped to
    /// what fits in an `i32`
    pub fn poll_timeout_ms(&self) -> i32 {
        i32::try_from(self.poll_interval.as_millis()).unwrap_or(i32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.read_chunk, 65536);
        assert_eq!(config.initial_capacity, 8192);
        assert_eq!(config.window, WindowSize::new(80, 24));
    }

    #[test]
    fn test_poll_timeout_clamped() {
        let config = SessionConfig {
            poll_interval: Duration::from_secs(u64::MAX),
            ..SessionConfig::default()
        };
        assert_eq!(config.poll_timeout_ms(), i32::MAX);
        assert_eq!(SessionConfig::default().poll_timeout_ms(), 100);
    }
}
