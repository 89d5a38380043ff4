//! Broker HTTP connection configuration, loaded from the environment.

use crate::error::EngineError;
use crate::infrastructure::broker;

/// `BROKER_API_BASE_URL` and `BROKER_API_KEY`, required per `spec.md` §6.
///
/// `spec.md` names only the REST surface; the three WebSocket stream URLs
/// (orders, positions, quotes) are this repo's addition, derived from
/// `base_url` by swapping the scheme to `ws`/`wss` unless overridden.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Base URL for the broker's REST API.
    pub base_url: String,
    /// Bearer/`X-API-Key` credential.
    pub api_key: String,
    /// Order-stream WebSocket URL.
    pub orders_stream_url: String,
    /// Position-stream WebSocket URL.
    pub positions_stream_url: String,
    /// Quote-stream WebSocket URL.
    pub quotes_stream_url: String,
}

impl BrokerConfig {
    /// Loads from `BROKER_API_BASE_URL` / `BROKER_API_KEY`. Both are
    /// required; a missing value is a [`EngineError::ConfigError`] since
    /// there is no safe default for broker credentials. Stream URLs default
    /// to `base_url` with its scheme swapped to `ws`/`wss` and `/orders`,
    /// `/positions`, `/quotes` appended, overridable via
    /// `ORDERS_STREAM_URL`, `POSITIONS_STREAM_URL`, `QUOTES_STREAM_URL`.
    pub fn from_env() -> Result<Self, EngineError> {
        let base_url = std::env::var("BROKER_API_BASE_URL")
            .map_err(|_| EngineError::config_error("BROKER_API_BASE_URL is required"))?;
        let api_key = std::env::var("BROKER_API_KEY")
            .map_err(|_| EngineError::config_error("BROKER_API_KEY is required"))?;
        let ws_base = to_ws_scheme(&base_url);
        Ok(Self {
            orders_stream_url: super::env_or("ORDERS_STREAM_URL", &format!("{ws_base}/orders")),
            positions_stream_url: super::env_or(
                "POSITIONS_STREAM_URL",
                &format!("{ws_base}/positions"),
            ),
            quotes_stream_url: super::env_or("QUOTES_STREAM_URL", &format!("{ws_base}/quotes")),
            base_url,
            api_key,
        })
    }

    /// Builds the infrastructure-layer [`broker::BrokerConfig`] this config
    /// describes, with the spec-default retry policy.
    #[must_use]
    pub fn to_client_config(&self) -> broker::BrokerConfig {
        broker::BrokerConfig::new(self.base_url.clone(), self.api_key.clone())
    }
}

fn to_ws_scheme(base_url: &str) -> String {
    if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base_url.to_string()
    }
}
