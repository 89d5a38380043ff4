//! Configuration: one `Config` root composed of nested `*Config` structs,
//! each loaded from the environment variables `spec.md` §6 names.
//!
//! One nested `*Config` struct per subsystem: every knob has a
//! free-function default, every field is overridable by environment
//! variable, and loading never panics — a malformed value is a
//! [`crate::error::EngineError::ConfigError`] the caller decides how to
//! handle (reject startup, or fall back and warn, per field).

mod broker;
mod persistence;
mod server;
mod tracker;

pub use broker::BrokerConfig;
pub use persistence::PersistenceConfig;
pub use server::ServerConfig;
pub use tracker::{load_tracker_config, ReconciliationConfig, TrackerRuntimeConfig};

use crate::error::EngineError;

/// Root configuration, composed of the nested configs each subsystem
/// constructs itself from.
#[derive(Debug, Clone)]
pub struct Config {
    /// Broker HTTP connection settings.
    pub broker: BrokerConfig,
    /// Reconnect-window, reconcile-cooldown, and rehydration pacing.
    pub reconciliation: ReconciliationConfig,
    /// Position-wait and post-creation-check timing for the lifecycle
    /// engine.
    pub tracker_runtime: TrackerRuntimeConfig,
    /// Durable store location and write-debounce timing.
    pub persistence: PersistenceConfig,
    /// HTTP control/status surface bind address.
    pub server: ServerConfig,
}

impl Config {
    /// Loads configuration from the process environment, having already
    /// loaded a `.env` file from the working directory or an ancestor (see
    /// [`load_dotenv_from_ancestors`]). Required variables
    /// (`BROKER_API_BASE_URL`, `BROKER_API_KEY`) missing is a
    /// [`EngineError::ConfigError`]; everything else falls back to its
    /// documented default.
    pub fn load_from_env() -> Result<Self, EngineError> {
        Ok(Self {
            broker: BrokerConfig::from_env()?,
            reconciliation: ReconciliationConfig::from_env(),
            tracker_runtime: TrackerRuntimeConfig::from_env(),
            persistence: PersistenceConfig::from_env(),
            server: ServerConfig::from_env(),
        })
    }
}

/// Loads a `.env` file from the current directory or the nearest ancestor
/// that has one. Silently does nothing if none is found — `.env` is a
/// convenience for local development, never a startup requirement.
pub fn load_dotenv_from_ancestors() {
    let mut dir = std::env::current_dir().ok();
    while let Some(candidate) = dir {
        let path = candidate.join(".env");
        if path.is_file() {
            if let Err(error) = dotenvy::from_path(&path) {
                tracing::warn!(path = %path.display(), %error, "failed to load .env file");
            }
            return;
        }
        dir = candidate.parent().map(std::path::Path::to_path_buf);
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_duration_ms(name: &str, default_ms: u64) -> std::time::Duration {
    let raw = env_or(name, &default_ms.to_string());
    parse_duration_ms(&raw, name, default_ms)
}

fn parse_duration_ms(raw: &str, name: &str, default_ms: u64) -> std::time::Duration {
    match raw.parse::<u64>() {
        Ok(ms) => std::time::Duration::from_millis(ms),
        Err(error) => {
            tracing::warn!(name, raw, %error, "invalid duration, using default");
            std::time::Duration::from_millis(default_ms)
        }
    }
}
