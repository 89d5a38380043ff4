//! Shared types for the three event-stream workers.

use std::time::Duration;

use thiserror::Error;

/// Connection configuration shared by all three stream workers.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// WebSocket URL to connect to.
    pub url: String,
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
}

impl StreamConfig {
    /// Builds a config with the spec default 30s heartbeat interval.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// Connection lifecycle state of a stream worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No connection attempt in progress.
    Disconnected,
    /// TCP/TLS handshake and WebSocket upgrade in progress.
    Connecting,
    /// Connected and receiving messages.
    Connected,
    /// Shutdown requested; draining in-flight work.
    Closing,
}

/// Errors a stream worker's connect-and-run loop can surface for one
/// connection attempt. The outer reconnect loop treats all of these as
/// transient and retries with backoff.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The initial connect (TCP/TLS/WebSocket upgrade) failed.
    #[error("stream connect failed: {0}")]
    ConnectFailed(String),

    /// A message on the wire did not match the expected shape.
    #[error("stream protocol violation: {0}")]
    ProtocolViolation(String),

    /// The connection was closed by the remote side or dropped.
    #[error("stream connection closed")]
    ConnectionClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_config_defaults_to_thirty_second_heartbeat() {
        let config = StreamConfig::new("wss://example/orders");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
    }
}
