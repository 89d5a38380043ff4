//! Broker HTTP client configuration.

use std::time::Duration;

/// Backoff parameters for broker HTTP retries.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first), for transient
    /// failures (429 / 408 / 5xx / network errors).
    pub max_attempts: u32,
    /// Backoff before the second attempt.
    pub initial_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
    /// Multiplier applied to the backoff after each attempt.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

/// Configuration for the broker HTTP adapter.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Base URL for the broker's REST API.
    pub base_url: String,
    /// API key sent in both the `Authorization` bearer header and the
    /// `X-API-Key` header.
    pub api_key: String,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Total request timeout, including retries for a single logical call.
    pub total_timeout: Duration,
    /// Retry/backoff policy for transient failures.
    pub retry: RetryConfig,
}

impl BrokerConfig {
    /// Builds a config with the spec-mandated defaults: 5s connect timeout,
    /// 10s total timeout.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            connect_timeout: Duration::from_secs(5),
            total_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
        }
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_timeouts() {
        let config = BrokerConfig::new("https://broker.example", "key");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.total_timeout, Duration::from_secs(10));
    }
}
