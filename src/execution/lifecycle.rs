//! The stop-limit lifecycle engine: the component that actually decides
//! whether to place, modify, or leave alone the one protective order for a
//! symbol.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;

use crate::error::{wait_with_deadline, EngineError, LifecycleOutcome, OutcomeReason};
use crate::execution::core_state::CoreState;
use crate::execution::persistence::Store;
use crate::execution::reconciler::StateReconciler;
use crate::execution::serializer::PerSymbolSerializer;
use crate::infrastructure::broker::{BrokerClient, PlaceOrderRequest, PlaceOrderSide, PlaceOrderType};
use crate::models::{EntryState, Order, OrderSide, StopLimitRepositoryEntry, TrackerConfig};

/// Position-wait poll interval.
const POSITION_WAIT_INTERVAL: Duration = Duration::from_millis(500);
/// Default position-wait hard cap on the buy-fill path
/// (`STOPLIMIT_POSITION_WAIT_MS`).
const DEFAULT_POSITION_WAIT_DEADLINE: Duration = Duration::from_secs(3);
/// Position-wait hard cap on the reconnect-fallback path. Not independently
/// configurable: `spec.md` §5 names only one fallback deadline (2s).
const RECONNECT_FALLBACK_DEADLINE: Duration = Duration::from_secs(2);
/// Default delay before the post-creation duplicate check
/// (`STOPLIMIT_POST_CREATE_CHECK_MS`).
const DEFAULT_POST_CREATE_CHECK_DELAY: Duration = Duration::from_millis(500);

/// Whether a buy fill was already known to this system (tracked) or was
/// discovered purely from the orders stream (the FALLBACK path named in
/// `spec.md` §4.3/GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOrigin {
    /// The fill's order id was in `pendingManualBuyOrders`.
    Tracked,
    /// No prior knowledge of this order id; entered via FALLBACK gating.
    Fallback,
}

/// Drives the full `onBuyFilled`/`onPositionUpdate`/`onOrderStatusChange`/
/// `onTrackerStepAdvance` contract named in `spec.md` §4.3.
pub struct StopLimitLifecycleEngine {
    core: Arc<CoreState>,
    store: Arc<Store>,
    broker: Arc<BrokerClient>,
    serializer: Arc<PerSymbolSerializer>,
    reconciler: Arc<StateReconciler>,
    tracker_config: std::sync::RwLock<Arc<TrackerConfig>>,
    position_wait_deadline: Duration,
    post_create_check_delay: Duration,
}

impl StopLimitLifecycleEngine {
    /// Builds the engine over its shared collaborators, using the spec's
    /// default position-wait and post-create-check timing. Use
    /// [`Self::with_timing`] to override either from
    /// `STOPLIMIT_POSITION_WAIT_MS`/`STOPLIMIT_POST_CREATE_CHECK_MS`.
    pub fn new(
        core: Arc<CoreState>,
        store: Arc<Store>,
        broker: Arc<BrokerClient>,
        serializer: Arc<PerSymbolSerializer>,
        reconciler: Arc<StateReconciler>,
        tracker_config: TrackerConfig,
    ) -> Self {
        Self::with_timing(
            core,
            store,
            broker,
            serializer,
            reconciler,
            tracker_config,
            DEFAULT_POSITION_WAIT_DEADLINE,
            DEFAULT_POST_CREATE_CHECK_DELAY,
        )
    }

    /// Builds the engine with explicit position-wait/post-create-check
    /// timing, per the environment variables named in `spec.md` §6.
    #[allow(clippy::too_many_arguments)]
    pub fn with_timing(
        core: Arc<CoreState>,
        store: Arc<Store>,
        broker: Arc<BrokerClient>,
        serializer: Arc<PerSymbolSerializer>,
        reconciler: Arc<StateReconciler>,
        tracker_config: TrackerConfig,
        position_wait_deadline: Duration,
        post_create_check_delay: Duration,
    ) -> Self {
        Self {
            core,
            store,
            broker,
            serializer,
            reconciler,
            tracker_config: std::sync::RwLock::new(Arc::new(tracker_config)),
            position_wait_deadline,
            post_create_check_delay,
        }
    }

    /// Hot-swaps the tracker configuration (new version, new groups).
    #[allow(clippy::significant_drop_tightening)]
    pub fn update_tracker_config(&self, config: TrackerConfig) {
        #[allow(clippy::unwrap_used)]
        let mut guard = self.tracker_config.write().unwrap();
        *guard = Arc::new(config);
    }

    async fn current_position_qty(&self, symbol: &str) -> Option<Decimal> {
        if let Some(position) = self.core.positions.read().await.get(symbol) {
            if !position.quantity.is_zero() {
                return Some(position.quantity);
            }
        }
        None
    }

    async fn position_qty_from_db(&self, symbol: &str) -> Option<Decimal> {
        match self.store.get_position(symbol).await {
            Ok(Some(position)) if !position.quantity.is_zero() => Some(position.quantity),
            Ok(_) => None,
            Err(error) => {
                tracing::warn!(symbol, %error, "failed to read position from durable store");
                None
            }
        }
    }

    /// Handles a confirmed buy fill (or, via the fallback path, an
    /// untracked fill that looks like one): ensures exactly one active
    /// protective stop-limit sell order exists at the current position
    /// quantity.
    pub async fn on_buy_filled(
        &self,
        broker_order_id: &str,
        symbol: &str,
        fill_price: Decimal,
        _filled_qty: Decimal,
        origin: FillOrigin,
    ) -> LifecycleOutcome {
        let _guard = self.serializer.acquire(symbol).await;
        let now = Utc::now();
        let within_reconnect = self.core.within_reconnect_window(now).await;

        // Step 2: position-wait loop. The FALLBACK path gets a tighter 2s
        // cap while inside the reconnect window, per spec.md §4.3: a
        // fallback fill that never finds a position under that window is
        // most likely a historical replay, not a live buy.
        let deadline = if origin == FillOrigin::Fallback && within_reconnect {
            RECONNECT_FALLBACK_DEADLINE
        } else {
            self.position_wait_deadline
        };
        let qty = wait_with_deadline(POSITION_WAIT_INTERVAL, deadline, || {
            let symbol = symbol.to_string();
            async move { self.current_position_qty(&symbol).await }
        })
        .await;

        let qty = match qty {
            Some(qty) => Some(qty),
            None => self.position_qty_from_db(symbol).await,
        };
        let Some(qty) = qty else {
            if origin == FillOrigin::Fallback && within_reconnect {
                return LifecycleOutcome::Skipped(OutcomeReason::ReplayDuringReconnect);
            }
            return LifecycleOutcome::Skipped(OutcomeReason::PositionMissing);
        };

        // Step 3: existence check, a -> c, with a reconnect-window
        // reconciliation pass first when inside the barrier.
        if within_reconnect {
            if let Err(error) = self.reconciler.reconcile_symbol_orders(symbol).await {
                tracing::warn!(symbol, %error, "reconcile before existence check failed");
            }
        }

        match self.find_existing_active_sell(symbol).await {
            Ok(Some(existing)) => self.modify_to_quantity(symbol, &existing, qty, fill_price).await,
            Ok(None) => self.create_stop_limit(symbol, broker_order_id, fill_price, qty).await,
            Err(error) => LifecycleOutcome::Failed(error),
        }
    }

    /// Reacts to a position update that is not itself a fill notification.
    /// A drop to zero quantity is a position-closed event; anything else is
    /// informational (the cache already reflects it via the reconciler).
    pub async fn on_position_update(&self, symbol: &str, new_qty: Decimal) -> LifecycleOutcome {
        if new_qty.is_zero() {
            self.on_position_closed(symbol).await
        } else {
            LifecycleOutcome::NoOp(OutcomeReason::Other("position update recorded".into()))
        }
    }

    /// Existence resolver: in-memory repo -> durable repo row ->
    /// `activeOrdersBySymbolSide` index, in that order, as specified in
    /// `spec.md` §9 (single authoritative existence resolver).
    async fn find_existing_active_sell(&self, symbol: &str) -> Result<Option<String>, EngineError> {
        if let Some(entry) = self.core.stop_limit_repository.read().await.get(symbol) {
            if entry.is_active() {
                return Ok(Some(entry.order_id.clone()));
            }
        }

        if let Some(entry) = self
            .store
            .find_active_stop_limit_by_symbol(symbol)
            .await
            .map_err(EngineError::from)?
        {
            return Ok(Some(entry.order_id));
        }

        let index = self.core.active_orders_by_symbol_side.read().await;
        if let Some(order_id) = index.get(&(symbol.to_string(), OrderSide::Sell)) {
            let orders = self.core.orders.read().await;
            if orders.get(order_id).is_some_and(Order::is_stop_limit_sell) {
                return Ok(Some(order_id.clone()));
            }
        }

        Ok(None)
    }

    /// Modifies the existing protective order to the current position
    /// quantity. Per `spec.md` §4.3 step 4/§7 `PermanentUpstream`, a
    /// terminal rejection removes the repository entry and falls through to
    /// [`Self::create_stop_limit`] instead of surfacing a bare failure —
    /// otherwise the symbol is left with an open position and no protective
    /// order, violating P1. A transient rejection just surfaces: the next
    /// fill or reconcile pass retries.
    async fn modify_to_quantity(
        &self,
        symbol: &str,
        order_id: &str,
        qty: Decimal,
        fill_price: Decimal,
    ) -> LifecycleOutcome {
        match self.broker.modify_order_quantity(order_id, qty).await {
            Ok(response) if response.success => {
                self.mark_repository_state(symbol, order_id, EntryState::Active).await;
                LifecycleOutcome::Modified {
                    order_id: order_id.to_string(),
                }
            }
            Ok(response) => {
                tracing::error!(symbol, order_id, error = ?response.error, "modify_order_quantity rejected, order is terminal");
                self.core.stop_limit_repository.write().await.remove(symbol);
                self.create_stop_limit(symbol, order_id, fill_price, qty).await
            }
            Err(error) => {
                let engine_error: EngineError = error.into();
                if engine_error.is_retryable() {
                    LifecycleOutcome::Failed(engine_error)
                } else {
                    tracing::error!(symbol, order_id, %engine_error, "modify_order_quantity failed permanently, order is terminal");
                    self.core.stop_limit_repository.write().await.remove(symbol);
                    self.create_stop_limit(symbol, order_id, fill_price, qty).await
                }
            }
        }
    }

    async fn create_stop_limit(
        &self,
        symbol: &str,
        _triggering_order_id: &str,
        fill_price: Decimal,
        qty: Decimal,
    ) -> LifecycleOutcome {
        #[allow(clippy::unwrap_used)]
        let config = Arc::clone(&self.tracker_config.read().unwrap());
        let Some(group) = config.matching_group(fill_price) else {
            return LifecycleOutcome::NoOp(OutcomeReason::NoMatchingTrackerGroup);
        };
        let initial_stop = fill_price + group.initial_stop_price_offset;

        let request = PlaceOrderRequest {
            symbol: symbol.to_string(),
            side: PlaceOrderSide::Sell,
            order_type: PlaceOrderType::StopLimit,
            qty,
            limit_price: Some(initial_stop),
            stop_price: Some(initial_stop),
        };

        let response = match self.broker.place_order(&request).await {
            Ok(response) => response,
            Err(error) => return LifecycleOutcome::Failed(error.into()),
        };

        let entry = StopLimitRepositoryEntry::creating(symbol, response.order_id.clone(), Utc::now());
        let mut active_entry = entry.clone();
        active_entry.status = EntryState::Active;
        if let Err(error) = self.store.upsert_stop_limit_entry(&active_entry).await {
            tracing::error!(symbol, %error, "failed to persist new stop-limit entry");
        }
        self.core
            .stop_limit_repository
            .write()
            .await
            .insert(symbol.to_string(), active_entry);
        self.core
            .active_orders_by_symbol_side
            .write()
            .await
            .insert((symbol.to_string(), OrderSide::Sell), response.order_id.clone());

        self.verify_no_duplicate_after_creation(symbol, &response.order_id).await;

        LifecycleOutcome::Created {
            order_id: response.order_id,
        }
    }

    async fn verify_no_duplicate_after_creation(&self, symbol: &str, created_order_id: &str) {
        tokio::time::sleep(self.post_create_check_delay).await;
        let index = self.core.active_orders_by_symbol_side.read().await;
        let Some(current) = index.get(&(symbol.to_string(), OrderSide::Sell)).cloned() else {
            return;
        };
        drop(index);
        if current != created_order_id {
            tracing::warn!(symbol, created_order_id, newer = %current, "duplicate stop-limit detected post-creation, canceling the one just created");
            if let Err(error) = self.broker.cancel_order(created_order_id).await {
                tracing::warn!(symbol, created_order_id, %error, "best-effort cancel of duplicate failed");
            }
        }
    }

    async fn mark_repository_state(&self, symbol: &str, order_id: &str, state: EntryState) {
        let mut repo = self.core.stop_limit_repository.write().await;
        if let Some(entry) = repo.get_mut(symbol) {
            if entry.order_id == order_id {
                entry.status = state;
            }
        }
    }

    /// Handles a position update that is not itself a fill notification.
    /// Position-closed cleanup is driven by the reconciler's return value;
    /// this just exposes the cleanup path for direct callers.
    pub async fn on_position_closed(&self, symbol: &str) -> LifecycleOutcome {
        let _guard = self.serializer.acquire(symbol).await;
        let entry = self.core.stop_limit_repository.write().await.remove(symbol);
        self.core
            .active_orders_by_symbol_side
            .write()
            .await
            .remove(&(symbol.to_string(), OrderSide::Sell));
        self.core.tracker_progress.write().await.remove(symbol);
        if let Err(error) = self.store.delete_tracker_progress_immediate(symbol).await {
            tracing::error!(symbol, %error, "failed to delete tracker progress on position close");
        }

        let Some(mut entry) = entry else {
            return LifecycleOutcome::NoOp(OutcomeReason::Other("no repository entry to tear down".into()));
        };
        entry.status = EntryState::Terminal;
        if let Err(error) = self.store.upsert_stop_limit_entry(&entry).await {
            tracing::error!(symbol, %error, "failed to remove stop-limit entry on position close");
            return LifecycleOutcome::Failed(error.into());
        }
        if let Err(error) = self.broker.cancel_order(&entry.order_id).await {
            tracing::warn!(symbol, order_id = %entry.order_id, %error, "cancel on position close failed (best-effort)");
        }
        LifecycleOutcome::Modified {
            order_id: entry.order_id,
        }
    }

    /// Reacts to a raw order-status observation from the stream: feeds the
    /// reconciler, and tears down the repository entry if the order just
    /// went terminal.
    pub async fn on_order_status_change(&self, order: Order) -> LifecycleOutcome {
        let symbol = order.symbol.clone();
        let order_id = order.broker_order_id.clone();
        let terminal = !order.is_active();

        if let Err(error) = self.reconciler.upsert_order(order).await {
            return LifecycleOutcome::Failed(error);
        }

        if terminal {
            let _guard = self.serializer.acquire(&symbol).await;
            let mut repo = self.core.stop_limit_repository.write().await;
            if repo.get(&symbol).is_some_and(|entry| entry.order_id == order_id) {
                if let Some(mut entry) = repo.remove(&symbol) {
                    entry.status = EntryState::Terminal;
                    drop(repo);
                    if let Err(error) = self.store.upsert_stop_limit_entry(&entry).await {
                        tracing::error!(symbol, %error, "failed to remove terminal stop-limit entry");
                    }
                    return LifecycleOutcome::NoOp(OutcomeReason::Other("repository entry retired".into()));
                }
            }
        }

        LifecycleOutcome::NoOp(OutcomeReason::Other("order status recorded".into()))
    }

    /// Modifies the active stop-limit's stop (and limit) price, called by
    /// the trailing-stop tracker when a ratchet step advances.
    pub async fn on_tracker_step_advance(&self, symbol: &str, new_stop_price: Decimal) -> LifecycleOutcome {
        let _guard = self.serializer.acquire(symbol).await;
        let Ok(Some(order_id)) = self.find_existing_active_sell(symbol).await else {
            return LifecycleOutcome::Skipped(OutcomeReason::Other("no active stop-limit to advance".into()));
        };

        match self
            .broker
            .modify_order_stop_price(&order_id, new_stop_price, new_stop_price)
            .await
        {
            Ok(response) if response.success => {
                self.mark_repository_state(symbol, &order_id, EntryState::Active).await;
                LifecycleOutcome::Modified { order_id }
            }
            Ok(response) => LifecycleOutcome::Failed(EngineError::permanent_upstream(
                response.error.unwrap_or_else(|| "stop price modify rejected".to_string()),
            )),
            Err(error) => LifecycleOutcome::Failed(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::broker::BrokerConfig;
    use crate::models::{TrackerGroup, TrackerStep};
    use rust_decimal_macros::dec;

    fn test_config() -> TrackerConfig {
        TrackerConfig {
            version: 1,
            groups: vec![TrackerGroup {
                group_id: "core".into(),
                min_price: dec!(0),
                max_price: dec!(1000),
                enabled: true,
                initial_stop_price_offset: dec!(-0.20),
                steps: vec![TrackerStep {
                    pnl: dec!(1.00),
                    stop: dec!(0.00),
                }],
            }],
        }
    }

    async fn test_engine() -> StopLimitLifecycleEngine {
        let core = CoreState::new();
        let store = Arc::new(Store::open_in_memory(Duration::ZERO).await.unwrap());
        let broker = Arc::new(BrokerClient::new(BrokerConfig::new("http://127.0.0.1:0", "key")).unwrap());
        let serializer = PerSymbolSerializer::new();
        let reconciler = Arc::new(StateReconciler::new(Arc::clone(&core), Arc::clone(&store), Arc::clone(&broker)));
        StopLimitLifecycleEngine::new(core, store, broker, serializer, reconciler, test_config())
    }

    #[tokio::test]
    async fn on_buy_filled_skips_when_position_never_appears() {
        let engine = test_engine().await;
        let outcome = engine
            .on_buy_filled("ord-1", "AAPL", dec!(225.50), dec!(500), FillOrigin::Tracked)
            .await;
        assert_eq!(outcome, LifecycleOutcome::Skipped(OutcomeReason::PositionMissing));
    }

    #[tokio::test]
    async fn fallback_fill_inside_reconnect_window_skips_as_replay() {
        let engine = test_engine().await;
        engine
            .core
            .raise_reconnect_barrier(Utc::now(), chrono::Duration::seconds(30))
            .await;
        let outcome = engine
            .on_buy_filled("ord-1", "AAPL", dec!(225.50), dec!(500), FillOrigin::Fallback)
            .await;
        assert_eq!(outcome, LifecycleOutcome::Skipped(OutcomeReason::ReplayDuringReconnect));
    }

    #[tokio::test]
    async fn on_position_update_to_zero_tears_down_repository() {
        let engine = test_engine().await;
        engine.core.stop_limit_repository.write().await.insert(
            "AAPL".into(),
            crate::models::StopLimitRepositoryEntry::creating("AAPL", "ord-1", Utc::now()),
        );
        let outcome = engine.on_position_update("AAPL", Decimal::ZERO).await;
        assert!(outcome.changed() || matches!(outcome, LifecycleOutcome::Modified { .. }));
        assert!(engine.core.stop_limit_repository.read().await.get("AAPL").is_none());
    }

    #[tokio::test]
    async fn on_position_closed_with_no_entry_is_noop() {
        let engine = test_engine().await;
        let outcome = engine.on_position_closed("AAPL").await;
        assert!(matches!(outcome, LifecycleOutcome::NoOp(_)));
    }
}
