//! Trailing-stop tracker progress and the versioned step configuration it
//! is driven by.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single ratchet step: once unrealized P&L reaches `pnl`, the stop
/// price advances to `avg_price + stop` (an offset against the average
/// entry price, not an absolute price).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackerStep {
    /// Unrealized P&L threshold that activates this step.
    pub pnl: Decimal,
    /// Stop-price offset against the position's average entry price.
    pub stop: Decimal,
}

/// A price-banded group of ratchet steps.
///
/// A group applies to fills whose price falls within
/// `[min_price, max_price]`. `steps` must be sorted ascending by `pnl` with
/// a monotonically non-decreasing `stop`; this is validated at config load
/// time, not re-checked on every tracker tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerGroup {
    /// Stable identifier for this group, also stored on `TrackerProgress`.
    pub group_id: String,
    /// Lower bound (inclusive) of the price band this group covers.
    pub min_price: Decimal,
    /// Upper bound (inclusive) of the price band this group covers.
    pub max_price: Decimal,
    /// Whether this group is eligible for new matches.
    pub enabled: bool,
    /// Initial stop-price offset against the fill price, used before the
    /// first ratchet step activates.
    pub initial_stop_price_offset: Decimal,
    /// Ratchet steps, ascending by `pnl`.
    pub steps: Vec<TrackerStep>,
}

impl TrackerGroup {
    /// True if `price` falls within this group's band and the group is
    /// enabled.
    #[must_use]
    pub fn matches(&self, price: Decimal) -> bool {
        self.enabled && price >= self.min_price && price <= self.max_price
    }

    /// Validates the monotonicity invariant: `steps` sorted ascending by
    /// `pnl`, `stop` non-decreasing.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.steps
            .windows(2)
            .all(|pair| pair[0].pnl <= pair[1].pnl && pair[0].stop <= pair[1].stop)
    }
}

/// Versioned collection of tracker groups, the unit the configuration
/// store persists and hot-reloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Monotonically increasing version number.
    pub version: u64,
    /// All configured groups. Groups are matched in order; the first
    /// enabled group whose band contains the price wins.
    pub groups: Vec<TrackerGroup>,
}

impl TrackerConfig {
    /// Returns the first enabled group whose price band contains `price`.
    #[must_use]
    pub fn matching_group(&self, price: Decimal) -> Option<&TrackerGroup> {
        self.groups.iter().find(|group| group.matches(price))
    }
}

/// Per-symbol ratchet state for the trailing-stop tracker.
///
/// Identity key is `symbol`. `current_step_index` is monotonically
/// non-decreasing for the lifetime of a position and resets to `-1` the
/// moment the position closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerProgress {
    /// Underlying symbol. Identity key for this record.
    pub symbol: String,
    /// Which tracker group this symbol is currently tracked under.
    pub group_id: String,
    /// Index into `TrackerGroup::steps`; `-1` means no step has activated
    /// yet.
    pub current_step_index: i32,
    /// Most recently observed unrealized P&L.
    pub last_pnl: Decimal,
    /// When this record was last updated.
    pub last_update: DateTime<Utc>,
}

impl TrackerProgress {
    /// Builds a fresh progress record with no step activated yet.
    #[must_use]
    pub fn fresh(symbol: impl Into<String>, group_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            group_id: group_id.into(),
            current_step_index: -1,
            last_pnl: Decimal::ZERO,
            last_update: now,
        }
    }

    /// Resets the ratchet to its pre-position state, as required the
    /// moment a position closes.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.current_step_index = -1;
        self.last_pnl = Decimal::ZERO;
        self.last_update = now;
    }
}
