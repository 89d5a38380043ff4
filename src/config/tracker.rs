//! Reconnect/reconcile timing, tracker wait timing, and the trailing-stop
//! step configuration loader.

use std::time::Duration;

use rust_decimal_macros::dec;

use super::env_duration_ms;
use crate::error::EngineError;
use crate::models::{TrackerConfig, TrackerGroup, TrackerStep};

const DEFAULT_RECONNECT_WINDOW_MS: u64 = 30_000;
const DEFAULT_RECONCILE_COOLDOWN_MS: u64 = 5_000;
const DEFAULT_POSITION_WAIT_MS: u64 = 3_000;
const DEFAULT_POST_CREATE_CHECK_MS: u64 = 500;

/// `STOPLIMIT_RECONNECT_WINDOW_MS`, `RECONCILE_COOLDOWN_MS`.
#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    /// Window after a stream reconnect during which a buy fill is treated
    /// as a possible replay rather than a fresh fill.
    pub reconnect_window: Duration,
    /// Minimum interval between unprompted full-state reconciliations.
    pub reconcile_cooldown: Duration,
}

impl ReconciliationConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            reconnect_window: env_duration_ms(
                "STOPLIMIT_RECONNECT_WINDOW_MS",
                DEFAULT_RECONNECT_WINDOW_MS,
            ),
            reconcile_cooldown: env_duration_ms(
                "RECONCILE_COOLDOWN_MS",
                DEFAULT_RECONCILE_COOLDOWN_MS,
            ),
        }
    }
}

/// `STOPLIMIT_POSITION_WAIT_MS`, `STOPLIMIT_POST_CREATE_CHECK_MS`.
#[derive(Debug, Clone)]
pub struct TrackerRuntimeConfig {
    /// How long `on_buy_filled` waits for the position to appear before
    /// giving up.
    pub position_wait: Duration,
    /// Delay before the post-creation duplicate-order verification check.
    pub post_create_check: Duration,
}

impl TrackerRuntimeConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            position_wait: env_duration_ms("STOPLIMIT_POSITION_WAIT_MS", DEFAULT_POSITION_WAIT_MS),
            post_create_check: env_duration_ms(
                "STOPLIMIT_POST_CREATE_CHECK_MS",
                DEFAULT_POST_CREATE_CHECK_MS,
            ),
        }
    }
}

/// Loads the trailing-stop step configuration from a JSON file at `path`,
/// or falls back to a single built-in default group when `path` is `None`
/// or the file doesn't exist. Spec §6 leaves the ratchet steps
/// operator-tunable but doesn't name a storage format; JSON-on-disk with a
/// safe built-in default is this repo's choice, recorded in `DESIGN.md`.
pub fn load_tracker_config(path: Option<&str>) -> Result<TrackerConfig, EngineError> {
    let config = match path {
        Some(path) if std::path::Path::new(path).is_file() => {
            let raw = std::fs::read_to_string(path)
                .map_err(|error| EngineError::config_error(format!("reading {path}: {error}")))?;
            serde_json::from_str(&raw)
                .map_err(|error| EngineError::config_error(format!("parsing {path}: {error}")))?
        }
        _ => default_tracker_config(),
    };

    for group in &config.groups {
        if !group.is_well_formed() {
            return Err(EngineError::config_error(format!(
                "tracker group {} has non-monotonic steps",
                group.group_id
            )));
        }
    }

    Ok(config)
}

fn default_tracker_config() -> TrackerConfig {
    TrackerConfig {
        version: 1,
        groups: vec![TrackerGroup {
            group_id: "default".into(),
            min_price: dec!(0),
            max_price: dec!(1_000_000),
            enabled: true,
            initial_stop_price_offset: dec!(-0.20),
            steps: vec![
                TrackerStep {
                    pnl: dec!(1.00),
                    stop: dec!(0.00),
                },
                TrackerStep {
                    pnl: dec!(2.00),
                    stop: dec!(1.00),
                },
            ],
        }],
    }
}
