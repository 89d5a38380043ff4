//! The stop-limit repository entry: the lifecycle engine's own record of
//! the one protective order it believes is active for a symbol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::order::Order;

/// Lifecycle state of a repository entry.
///
/// `Initial` exists only in memory before the first broker round-trip
/// completes; every persisted entry is `Creating` or later.
/// `Modifying` is re-entrant with `Active` while a quantity or stop-price
/// modification is in flight; `Terminal` entries are deleted, not kept
/// around as tombstones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Not yet submitted to the broker.
    Initial,
    /// `place_order` in flight.
    Creating,
    /// Order is live and unmodified since the last confirmed state.
    Active,
    /// A `modify_order_quantity` or `modify_order_stop_price` call is in
    /// flight for an otherwise-active order.
    Modifying,
    /// Filled, canceled, expired, rejected, or otherwise terminal. Entries
    /// in this state are removed from the repository, never retained.
    Terminal,
}

impl EntryState {
    /// True for `Active` and `Modifying`: the order is live either way.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active | Self::Modifying)
    }
}

/// The lifecycle engine's exclusive record of the protective stop-limit
/// order for a symbol.
///
/// Identity key is `symbol`. At most one entry with an active `status`
/// exists per symbol at a time; only the lifecycle engine (under the
/// per-symbol serializer) mutates this record. Other components read it
/// advisorily.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopLimitRepositoryEntry {
    /// Underlying symbol. Identity key for this record.
    pub symbol: String,
    /// Broker order id of the protective stop-limit.
    pub order_id: String,
    /// When the entry was first written.
    pub opened_date_time: DateTime<Utc>,
    /// Current lifecycle state.
    pub status: EntryState,
    /// The most recently observed view of the underlying order, if any.
    pub order: Option<Order>,
}

impl StopLimitRepositoryEntry {
    /// Builds a fresh entry in the `Creating` state, as written synchronously
    /// right after `place_order` succeeds.
    #[must_use]
    pub fn creating(symbol: impl Into<String>, order_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            order_id: order_id.into(),
            opened_date_time: now,
            status: EntryState::Creating,
            order: None,
        }
    }

    /// True if this entry currently represents a live order.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Opaque echo payload stored alongside a repository entry for audit,
/// distinct from the order's own `full_order_data`.
#[must_use]
pub fn echo_payload(order: &Order) -> Value {
    serde_json::to_value(order).unwrap_or(Value::Null)
}
