//! Trailing-stop tracker: watches unrealized P&L per symbol and ratchets
//! the protective stop price upward as it improves.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, Mutex};

use crate::execution::core_state::CoreState;
use crate::execution::lifecycle::StopLimitLifecycleEngine;
use crate::execution::persistence::Store;
use crate::models::{TrackerConfig, TrackerProgress};

/// Debounce window applied per symbol to the quote stream: within this
/// window, only the last-seen quote for a symbol is processed.
const QUOTE_DEBOUNCE: Duration = Duration::from_millis(200);

/// One raw quote observation.
#[derive(Debug, Clone, Copy)]
pub struct Quote {
    /// Last traded price.
    pub last: Decimal,
}

/// Drives `spec.md` §4.4: consumes the quote stream, maintains per-symbol
/// ratchet progress, and calls into the lifecycle engine when a step
/// advances.
pub struct TrailingStopTracker {
    core: Arc<CoreState>,
    store: Arc<Store>,
    engine: Arc<StopLimitLifecycleEngine>,
    config: std::sync::RwLock<Arc<TrackerConfig>>,
}

impl TrailingStopTracker {
    /// Builds the tracker over its shared collaborators.
    #[must_use]
    pub fn new(
        core: Arc<CoreState>,
        store: Arc<Store>,
        engine: Arc<StopLimitLifecycleEngine>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            core,
            store,
            engine,
            config: std::sync::RwLock::new(Arc::new(config)),
        }
    }

    /// Hot-swaps the tracker configuration.
    #[allow(clippy::unwrap_used)]
    pub fn update_config(&self, config: TrackerConfig) {
        *self.config.write().unwrap() = Arc::new(config);
    }

    #[allow(clippy::unwrap_used)]
    fn current_config(&self) -> Arc<TrackerConfig> {
        Arc::clone(&self.config.read().unwrap())
    }

    /// Processes one quote for `symbol`: updates unrealized P&L, advances
    /// the ratchet if a new step threshold has been crossed, and calls the
    /// lifecycle engine to push the new stop price to the broker.
    pub async fn on_quote(&self, symbol: &str, quote: Quote) {
        let Some(position) = self.core.positions.read().await.get(symbol).cloned() else {
            return;
        };
        if position.quantity.is_zero() {
            return;
        }

        let config = self.current_config();
        let Some(group) = config.matching_group(position.average_price) else {
            return;
        };

        let pnl = (quote.last - position.average_price) * position.quantity;

        let mut progress_map = self.core.tracker_progress.write().await;
        let progress = progress_map
            .entry(symbol.to_string())
            .or_insert_with(|| TrackerProgress::fresh(symbol, group.group_id.clone(), Utc::now()));
        progress.last_pnl = pnl;
        progress.last_update = Utc::now();

        // Advance as many steps as the P&L now justifies, but never more
        // than one ratchet step per quote: the lifecycle engine will catch
        // up on the next tick if multiple thresholds were crossed at once.
        let next_index = usize::try_from(progress.current_step_index + 1).unwrap_or(0);
        let Some(step) = group.steps.get(next_index) else {
            drop(progress_map);
            return;
        };
        if pnl < step.pnl {
            drop(progress_map);
            return;
        }

        progress.current_step_index = i32::try_from(next_index).unwrap_or(progress.current_step_index);
        let new_stop = position.average_price + step.stop;
        let progress_snapshot = progress.clone();
        drop(progress_map);

        if let Err(error) = self.store.upsert_tracker_progress(&progress_snapshot).await {
            tracing::error!(symbol, %error, "failed to persist tracker progress");
        }

        let outcome = self.engine.on_tracker_step_advance(symbol, new_stop).await;
        tracing::debug!(symbol, ?outcome, new_stop = %new_stop, "tracker step advance applied");
    }

    /// Resets ratchet progress to its pre-position state. Called when the
    /// reconciler reports the position closed.
    pub async fn on_position_closed(&self, symbol: &str) {
        self.core.tracker_progress.write().await.remove(symbol);
        if let Err(error) = self.store.delete_tracker_progress_immediate(symbol).await {
            tracing::error!(symbol, %error, "failed to delete tracker progress on position close");
        }
    }
}

/// Runs the quote-debounce loop: consumes raw `(symbol, Quote)` pairs from
/// `rx` and forwards only the last-seen quote per symbol once
/// [`QUOTE_DEBOUNCE`] has elapsed since that symbol's last forward.
pub async fn run_quote_debounce(
    tracker: Arc<TrailingStopTracker>,
    mut rx: mpsc::Receiver<(String, Quote)>,
    shutdown: tokio_util::sync::CancellationToken,
) {
    let pending: Arc<Mutex<HashMap<String, Quote>>> = Arc::new(Mutex::new(HashMap::new()));
    let mut ticker = tokio::time::interval(QUOTE_DEBOUNCE);

    loop {
        tokio::select! {
            maybe_quote = rx.recv() => {
                match maybe_quote {
                    Some((symbol, quote)) => {
                        pending.lock().await.insert(symbol, quote);
                    }
                    None => break,
                }
            }
            _ = ticker.tick() => {
                let batch = {
                    let mut guard = pending.lock().await;
                    std::mem::take(&mut *guard)
                };
                for (symbol, quote) in batch {
                    tracker.on_quote(&symbol, quote).await;
                }
            }
            () = shutdown.cancelled() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::core_state::CoreState;
    use crate::execution::reconciler::StateReconciler;
    use crate::execution::serializer::PerSymbolSerializer;
    use crate::infrastructure::broker::{BrokerClient, BrokerConfig};
    use crate::models::{Position, TrackerGroup, TrackerStep};
    use rust_decimal_macros::dec;

    fn sample_config() -> TrackerConfig {
        TrackerConfig {
            version: 1,
            groups: vec![TrackerGroup {
                group_id: "core".into(),
                min_price: dec!(0),
                max_price: dec!(1000),
                enabled: true,
                initial_stop_price_offset: dec!(-0.20),
                steps: vec![
                    TrackerStep { pnl: dec!(500), stop: dec!(0.00) },
                    TrackerStep { pnl: dec!(1000), stop: dec!(1.00) },
                ],
            }],
        }
    }

    async fn test_tracker() -> (Arc<CoreState>, TrailingStopTracker) {
        let core = CoreState::new();
        let store = Arc::new(Store::open_in_memory(Duration::ZERO).await.unwrap());
        let broker = Arc::new(BrokerClient::new(BrokerConfig::new("http://127.0.0.1:0", "key")).unwrap());
        let serializer = PerSymbolSerializer::new();
        let reconciler = Arc::new(StateReconciler::new(Arc::clone(&core), Arc::clone(&store), Arc::clone(&broker)));
        let engine = Arc::new(StopLimitLifecycleEngine::new(
            Arc::clone(&core),
            Arc::clone(&store),
            broker,
            serializer,
            reconciler,
            sample_config(),
        ));
        let tracker = TrailingStopTracker::new(Arc::clone(&core), store, engine, sample_config());
        (core, tracker)
    }

    #[tokio::test]
    async fn ratchet_index_advances_once_pnl_crosses_first_step() {
        let (core, tracker) = test_tracker().await;
        core.positions.write().await.insert(
            "AAPL".into(),
            Position {
                symbol: "AAPL".into(),
                quantity: dec!(500),
                average_price: dec!(225.50),
                last_updated: Utc::now(),
            },
        );

        tracker.on_quote("AAPL", Quote { last: dec!(226.50) }).await;

        let progress = core.tracker_progress.read().await;
        assert_eq!(progress.get("AAPL").unwrap().current_step_index, 0);
    }

    #[tokio::test]
    async fn no_position_means_quote_is_ignored() {
        let (core, tracker) = test_tracker().await;
        tracker.on_quote("AAPL", Quote { last: dec!(300) }).await;
        assert!(core.tracker_progress.read().await.get("AAPL").is_none());
    }

    #[tokio::test]
    async fn position_close_resets_and_removes_progress() {
        let (core, tracker) = test_tracker().await;
        core.tracker_progress.write().await.insert(
            "AAPL".into(),
            TrackerProgress {
                symbol: "AAPL".into(),
                group_id: "core".into(),
                current_step_index: 1,
                last_pnl: dec!(900),
                last_update: Utc::now(),
            },
        );
        tracker.on_position_closed("AAPL").await;
        assert!(core.tracker_progress.read().await.get("AAPL").is_none());
    }

    proptest::proptest! {
        // Ratchet invariant (spec.md §4.4): whatever order the quote
        // stream delivers prices in, current_step_index never decreases.
        #[test]
        fn ratchet_index_is_monotonic_across_arbitrary_quote_sequences(
            raw_prices in proptest::collection::vec(180i64..260i64, 1..30)
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let (core, tracker) = test_tracker().await;
                core.positions.write().await.insert(
                    "AAPL".into(),
                    Position {
                        symbol: "AAPL".into(),
                        quantity: dec!(500),
                        average_price: dec!(200.00),
                        last_updated: Utc::now(),
                    },
                );

                let mut last_index = -1;
                for raw in raw_prices {
                    let price = rust_decimal::Decimal::new(raw, 0);
                    tracker.on_quote("AAPL", Quote { last: price }).await;
                    let current = core
                        .tracker_progress
                        .read()
                        .await
                        .get("AAPL")
                        .map_or(-1, |p| p.current_step_index);
                    proptest::prop_assert!(current >= last_index);
                    last_index = current;
                }
                Ok(())
            })?;
        }
    }
}
