//! Durable-store location and write-debounce timing, loaded from the
//! environment.

use std::time::Duration;

use super::env_duration_ms;

const DEFAULT_CACHE_DEBOUNCE_MS: u64 = 2_000;
const DEFAULT_CACHE_FLUSH_MS: u64 = 30_000;

/// `DB_URI`, `CACHE_DEBOUNCE_MS`, `CACHE_FLUSH_MS` per `spec.md` §6.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// `turso` connection URI. `None` when `DB_URI` is unset, in which
    /// case the store falls back to an in-memory, volatile database and a
    /// warning is logged at startup (never a fatal startup error).
    pub db_uri: Option<String>,
    /// Debounce interval applied to non-critical writes.
    pub debounce_interval: Duration,
    /// Periodic flush interval that bounds how long a debounced write can
    /// be delayed.
    pub flush_interval: Duration,
}

impl PersistenceConfig {
    /// Loads from `DB_URI` (optional), `CACHE_DEBOUNCE_MS` (default 2000),
    /// `CACHE_FLUSH_MS` (default 30000).
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            db_uri: std::env::var("DB_URI").ok().filter(|s| !s.is_empty()),
            debounce_interval: env_duration_ms("CACHE_DEBOUNCE_MS", DEFAULT_CACHE_DEBOUNCE_MS),
            flush_interval: env_duration_ms("CACHE_FLUSH_MS", DEFAULT_CACHE_FLUSH_MS),
        }
    }
}
