//! State reconciler: keeps the in-memory core state consistent with what
//! the broker reports, through both the live streams and on-demand REST
//! snapshots.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::EngineError;
use crate::execution::core_state::CoreState;
use crate::execution::persistence::{order_from_parts, Store};
use crate::infrastructure::broker::BrokerClient;
use crate::models::{Order, OrderSide, OrderSource, OrderStatus, Position};

/// Default reconnect barrier window (`STOPLIMIT_RECONNECT_WINDOW_MS`).
pub const DEFAULT_RECONNECT_WINDOW: Duration = Duration::from_secs(30);
/// Default minimum time between `reconcileSymbolOrders` calls for the same
/// symbol (`RECONCILE_COOLDOWN_MS`).
pub const DEFAULT_RECONCILE_COOLDOWN: Duration = Duration::from_secs(5);
/// Pacing applied between symbols during mass rehydration.
const REHYDRATE_PACING: Duration = Duration::from_millis(200);

/// Reconciles broker-observed state into the shared [`CoreState`] and the
/// durable [`Store`].
pub struct StateReconciler {
    core: Arc<CoreState>,
    store: Arc<Store>,
    broker: Arc<BrokerClient>,
    reconnect_window: Duration,
    reconcile_cooldown: Duration,
}

impl StateReconciler {
    /// Builds a reconciler over the shared core state, durable store, and
    /// broker client, using the spec's default reconnect-window and
    /// reconcile-cooldown timing. Use [`Self::with_timing`] to override
    /// either from `STOPLIMIT_RECONNECT_WINDOW_MS`/`RECONCILE_COOLDOWN_MS`.
    #[must_use]
    pub const fn new(core: Arc<CoreState>, store: Arc<Store>, broker: Arc<BrokerClient>) -> Self {
        Self {
            core,
            store,
            broker,
            reconnect_window: DEFAULT_RECONNECT_WINDOW,
            reconcile_cooldown: DEFAULT_RECONCILE_COOLDOWN,
        }
    }

    /// Builds a reconciler with explicit reconnect-window/reconcile-cooldown
    /// timing, per the `STOPLIMIT_RECONNECT_WINDOW_MS`/`RECONCILE_COOLDOWN_MS`
    /// environment variables named in `spec.md` §6.
    #[must_use]
    pub const fn with_timing(
        core: Arc<CoreState>,
        store: Arc<Store>,
        broker: Arc<BrokerClient>,
        reconnect_window: Duration,
        reconcile_cooldown: Duration,
    ) -> Self {
        Self {
            core,
            store,
            broker,
            reconnect_window,
            reconcile_cooldown,
        }
    }

    /// Applies a freshly observed order view to the in-memory cache and
    /// queues the durable write.
    pub async fn upsert_order(&self, order: Order) -> Result<(), EngineError> {
        {
            let mut orders = self.core.orders.write().await;
            orders.insert(order.broker_order_id.clone(), order.clone());
        }

        if order.is_active() {
            let mut index = self.core.active_orders_by_symbol_side.write().await;
            index.insert((order.symbol.clone(), order.side), order.broker_order_id.clone());
        } else {
            let mut index = self.core.active_orders_by_symbol_side.write().await;
            if index.get(&(order.symbol.clone(), order.side)) == Some(&order.broker_order_id) {
                index.remove(&(order.symbol.clone(), order.side));
            }
        }

        self.store
            .upsert_order_state(&order)
            .await
            .map_err(EngineError::from)?;
        Ok(())
    }

    /// Applies a freshly observed position view. A zero quantity is a
    /// position-closed event and the caller (lifecycle engine/tracker)
    /// must react to the returned flag by tearing down tracker progress
    /// and the repository entry for the symbol.
    pub async fn upsert_position(&self, symbol: &str, qty: Decimal, avg_price: Decimal) -> Result<bool, EngineError> {
        let position = Position {
            symbol: symbol.to_string(),
            quantity: qty,
            average_price: avg_price,
            last_updated: Utc::now(),
        };
        let closed = position.is_closed();

        if closed {
            self.core.positions.write().await.remove(symbol);
            self.store
                .delete_position_immediate(symbol)
                .await
                .map_err(EngineError::from)?;
        } else {
            self.core.positions.write().await.insert(symbol.to_string(), position.clone());
            self.store
                .upsert_position(&position)
                .await
                .map_err(EngineError::from)?;
        }
        Ok(closed)
    }

    /// Raises the reconnect barrier, marking the next `window` as a period
    /// during which stream-only evidence is not authoritative.
    pub async fn reconnect_barrier(&self, now: DateTime<Utc>) {
        self.core
            .raise_reconnect_barrier(now, chrono::Duration::from_std(self.reconnect_window).unwrap_or_default())
            .await;
    }

    /// Fetches a fresh REST snapshot of open orders for `symbol` and merges
    /// it into the cache, rate-limited to once per `reconcile_cooldown`
    /// per symbol. Never marks an in-memory active order inactive purely
    /// because it is absent from the snapshot — the snapshot only adds
    /// evidence, it does not retract it.
    pub async fn reconcile_symbol_orders(&self, symbol: &str) -> Result<(), EngineError> {
        let now = Utc::now();
        if !self
            .core
            .reconcile_due(symbol, now, chrono::Duration::from_std(self.reconcile_cooldown).unwrap_or_default())
            .await
        {
            return Ok(());
        }
        self.core.mark_reconciled(symbol, now).await;

        let rows = self.broker.get_orders().await.map_err(EngineError::from)?;
        for row in rows.into_iter().filter(|row| row.symbol.as_deref() == Some(symbol)) {
            let side = if row.side.eq_ignore_ascii_case("buy") {
                OrderSide::Buy
            } else {
                OrderSide::Sell
            };
            let qty = row.qty;
            let order = order_from_parts(
                row.order_id,
                symbol.to_string(),
                side,
                row.order_type,
                row.status,
                row.limit_price,
                row.stop_price,
                qty,
                row.remaining_qty.unwrap_or(qty),
                DateTime::parse_from_rfc3339(&row.opened_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or(now),
                OrderSource::RestSnapshot,
                row.raw,
            );
            self.upsert_order(order).await?;
        }
        Ok(())
    }

    /// Loads every durably-recorded active order at startup, then
    /// reconciles each distinct symbol against a fresh snapshot, paced to
    /// avoid a thundering herd of REST calls.
    pub async fn rehydrate_active_orders(&self) -> Result<(), EngineError> {
        let rows = self.store.load_all_active_orders().await.map_err(EngineError::from)?;
        let mut seen = std::collections::HashSet::new();
        for order in rows {
            let symbol = order.symbol.clone();
            self.upsert_order(order).await?;
            seen.insert(symbol);
        }

        for symbol in seen {
            self.reconcile_symbol_orders(&symbol).await?;
            tokio::time::sleep(REHYDRATE_PACING).await;
        }

        tracing::info!("rehydration of active orders complete");
        Ok(())
    }
}
