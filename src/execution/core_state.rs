//! The composite in-memory core state: one value holding every cache the
//! reconciler, lifecycle engine, and tracker read and write, replacing a
//! scatter of independent global maps.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::models::{Order, OrderSide, Position, StopLimitRepositoryEntry, TrackerProgress};

/// Key for the "one active protective order per symbol+side" index.
pub type SymbolSide = (String, OrderSide);

/// In-memory view of everything the coordinator currently believes about
/// the world. Every field is independently lockable so unrelated readers
/// (e.g. the status endpoint) never contend with the hot path.
#[derive(Debug, Default)]
pub struct CoreState {
    /// Orders keyed by broker order id.
    pub orders: RwLock<HashMap<String, Order>>,
    /// Positions keyed by symbol.
    pub positions: RwLock<HashMap<String, Position>>,
    /// Broker order id of the active order for a given `(symbol, side)`,
    /// used for the fast existence check during `onBuyFilled`.
    pub active_orders_by_symbol_side: RwLock<HashMap<SymbolSide, String>>,
    /// The lifecycle engine's own repository of protective stop-limit
    /// entries, keyed by symbol.
    pub stop_limit_repository: RwLock<HashMap<String, StopLimitRepositoryEntry>>,
    /// Trailing-stop ratchet progress, keyed by symbol.
    pub tracker_progress: RwLock<HashMap<String, TrackerProgress>>,
    /// Monotonically advancing barrier: existence checks that run before
    /// this instant treat stream-only evidence as unreliable and fall back
    /// to a fresh snapshot.
    pub reconnect_window_until: RwLock<DateTime<Utc>>,
    /// Last time `reconcileSymbolOrders` actually ran for a symbol, used to
    /// enforce the 5s-per-symbol rate limit.
    pub last_reconcile_at: RwLock<HashMap<String, DateTime<Utc>>>,
    /// Broker order ids of buy orders this system is tracking as its own
    /// (placed or otherwise known ahead of the fill). A fill for an order
    /// id not in this set is the FALLBACK path (`spec.md` §4.3).
    pub pending_manual_buy_orders: RwLock<HashSet<String>>,
}

impl CoreState {
    /// Builds an empty core state with the reconnect window already
    /// elapsed (i.e. not inside a reconnect window).
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            reconnect_window_until: RwLock::new(Utc::now()),
            ..Self::default()
        })
    }

    /// True if `now` falls inside the reconnect barrier window, meaning
    /// stream-only existence evidence is not yet trustworthy.
    pub async fn within_reconnect_window(&self, now: DateTime<Utc>) -> bool {
        now < *self.reconnect_window_until.read().await
    }

    /// Publishes a new reconnect barrier, advancing `reconnect_window_until`
    /// to `now + window`.
    pub async fn raise_reconnect_barrier(&self, now: DateTime<Utc>, window: chrono::Duration) {
        let mut guard = self.reconnect_window_until.write().await;
        let candidate = now + window;
        if candidate > *guard {
            *guard = candidate;
        }
    }

    /// True if `reconcileSymbolOrders` may run again for `symbol` given the
    /// per-symbol cooldown.
    pub async fn reconcile_due(&self, symbol: &str, now: DateTime<Utc>, cooldown: chrono::Duration) -> bool {
        let last = self.last_reconcile_at.read().await.get(symbol).copied();
        match last {
            Some(last) => now - last >= cooldown,
            None => true,
        }
    }

    /// Records that `reconcileSymbolOrders` just ran for `symbol`.
    pub async fn mark_reconciled(&self, symbol: &str, now: DateTime<Utc>) {
        self.last_reconcile_at
            .write()
            .await
            .insert(symbol.to_string(), now);
    }

    /// Marks `broker_order_id` as a buy this system originated or otherwise
    /// already knows about, exempting its eventual fill from the FALLBACK
    /// gate.
    pub async fn mark_pending_manual_buy(&self, broker_order_id: &str) {
        self.pending_manual_buy_orders
            .write()
            .await
            .insert(broker_order_id.to_string());
    }

    /// Removes and reports whether `broker_order_id` was a tracked pending
    /// buy. Called once, at fill time, to decide tracked-vs-FALLBACK.
    pub async fn take_pending_manual_buy(&self, broker_order_id: &str) -> bool {
        self.pending_manual_buy_orders
            .write()
            .await
            .remove(broker_order_id)
    }
}
