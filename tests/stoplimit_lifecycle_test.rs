//! End-to-end tests driving the lifecycle engine and state reconciler
//! against a mocked broker REST surface, covering the scenarios and
//! boundary behaviors named in `spec.md` §8.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal_macros::dec;
use serde_json::json;
use stoplimit_coordinator::execution::{CoreState, PerSymbolSerializer, StateReconciler, Store, StopLimitLifecycleEngine};
use stoplimit_coordinator::infrastructure::broker::{BrokerClient, BrokerConfig};
use stoplimit_coordinator::models::{TrackerConfig, TrackerGroup, TrackerStep};
use stoplimit_coordinator::{FillOrigin, LifecycleOutcome, OutcomeReason};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn tracker_config() -> TrackerConfig {
    TrackerConfig {
        version: 1,
        groups: vec![TrackerGroup {
            group_id: "core".into(),
            min_price: dec!(0),
            max_price: dec!(1_000_000),
            enabled: true,
            initial_stop_price_offset: dec!(-0.20),
            steps: vec![
                TrackerStep { pnl: dec!(1.00), stop: dec!(0.00) },
                TrackerStep { pnl: dec!(2.00), stop: dec!(1.00) },
            ],
        }],
    }
}

struct Harness {
    core: Arc<CoreState>,
    store: Arc<Store>,
    engine: Arc<StopLimitLifecycleEngine>,
    reconciler: Arc<StateReconciler>,
    #[allow(dead_code)]
    server: MockServer,
}

async fn harness(server: MockServer) -> Harness {
    let core = CoreState::new();
    let store = Arc::new(Store::open_in_memory(Duration::ZERO).await.unwrap());
    let broker = Arc::new(BrokerClient::new(BrokerConfig::new(server.uri(), "test-key")).unwrap());
    let serializer = PerSymbolSerializer::new();
    let reconciler = Arc::new(StateReconciler::new(Arc::clone(&core), Arc::clone(&store), Arc::clone(&broker)));
    let engine = Arc::new(StopLimitLifecycleEngine::new(
        Arc::clone(&core),
        Arc::clone(&store),
        Arc::clone(&broker),
        serializer,
        Arc::clone(&reconciler),
        tracker_config(),
    ));
    Harness { core, store, engine, reconciler, server }
}

fn active_entry(symbol: &str, order_id: &str) -> stoplimit_coordinator::models::StopLimitRepositoryEntry {
    let mut entry = stoplimit_coordinator::models::StopLimitRepositoryEntry::creating(symbol, order_id, Utc::now());
    entry.status = stoplimit_coordinator::models::EntryState::Active;
    entry
}

async fn set_position(core: &CoreState, symbol: &str, qty: rust_decimal::Decimal, avg_price: rust_decimal::Decimal) {
    core.positions.write().await.insert(
        symbol.to_string(),
        stoplimit_coordinator::models::Position {
            symbol: symbol.to_string(),
            quantity: qty,
            average_price: avg_price,
            last_updated: Utc::now(),
        },
    );
}

// S1: a fresh buy fill with no existing protective order places a new
// stop-limit sell at fill_price + the matching group's initial offset.
#[tokio::test]
async fn fresh_buy_fill_places_stop_limit_at_initial_offset() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/place_order"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "order_id": "sell-1",
            "status": "new",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let harness = harness(server).await;
    set_position(&harness.core, "AAPL", dec!(500), dec!(225.50)).await;

    let outcome = harness
        .engine
        .on_buy_filled("buy-1", "AAPL", dec!(225.50), dec!(500), FillOrigin::Tracked)
        .await;

    assert_eq!(outcome, LifecycleOutcome::Created { order_id: "sell-1".into() });
    let repo = harness.core.stop_limit_repository.read().await;
    assert_eq!(repo.get("AAPL").unwrap().order_id, "sell-1");
}

// S2: a rebuy (existing active sell already present) updates the order's
// quantity to the current position quantity via modify_order_quantity,
// never by summing the prior and new fill quantities.
#[tokio::test]
async fn rebuy_modifies_quantity_to_current_position_not_a_sum() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/modify_order_quantity"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    let harness = harness(server).await;
    harness.core.stop_limit_repository.write().await.insert("AAPL".into(), active_entry("AAPL", "sell-existing"));
    // Position already reflects the post-rebuy total, as the broker would
    // report it; the engine must send that total, not derive one itself.
    set_position(&harness.core, "AAPL", dec!(550), dec!(225.50)).await;

    let outcome = harness
        .engine
        .on_buy_filled("buy-2", "AAPL", dec!(225.50), dec!(50), FillOrigin::Tracked)
        .await;

    assert_eq!(outcome, LifecycleOutcome::Modified { order_id: "sell-existing".into() });
}

// S3: a fallback fill discovered only via the orders stream, arriving
// inside the reconnect window with no position ever appearing, is treated
// as a historical replay and skipped rather than acted on.
#[tokio::test]
async fn fallback_fill_with_no_position_inside_reconnect_window_is_treated_as_replay() {
    let server = MockServer::start().await;
    let harness = harness(server).await;
    harness.core.raise_reconnect_barrier(Utc::now(), chrono::Duration::seconds(30)).await;

    let outcome = harness
        .engine
        .on_buy_filled("buy-3", "PLTR", dec!(20.00), dec!(100), FillOrigin::Fallback)
        .await;

    assert_eq!(outcome, LifecycleOutcome::Skipped(OutcomeReason::ReplayDuringReconnect));
}

// S4: two concurrent buy-fill notifications for the same symbol are
// serialized by the per-symbol lock, so only one place_order call happens
// even when both observe "no existing sell" at the same instant.
#[tokio::test]
async fn concurrent_fills_for_the_same_symbol_place_exactly_one_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/place_order"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "order_id": "sell-dup",
            "status": "new",
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/modify_order_quantity"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .mount(&server)
        .await;

    let harness = harness(server).await;
    set_position(&harness.core, "TSLA", dec!(300), dec!(400.00)).await;

    let engine_a = Arc::clone(&harness.engine);
    let engine_b = Arc::clone(&harness.engine);
    let (a, b) = tokio::join!(
        engine_a.on_buy_filled("buy-a", "TSLA", dec!(400.00), dec!(300), FillOrigin::Tracked),
        engine_b.on_buy_filled("buy-b", "TSLA", dec!(400.00), dec!(300), FillOrigin::Tracked),
    );

    // Exactly one of the two creates; the other observes the freshly
    // created entry and modifies it to the same quantity instead.
    let created = [&a, &b].iter().filter(|o| matches!(o, LifecycleOutcome::Created { .. })).count();
    assert_eq!(created, 1, "expected exactly one Created outcome, got a={a:?} b={b:?}");
}

// S5: a tracker step advance modifies the active stop-limit's stop (and
// limit) price via modify_order_stop_price.
#[tokio::test]
async fn tracker_step_advance_modifies_stop_price() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/modify_order_stop_price"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    let harness = harness(server).await;
    harness.core.stop_limit_repository.write().await.insert("AAPL".into(), active_entry("AAPL", "sell-1"));

    let outcome = harness.engine.on_tracker_step_advance("AAPL", dec!(225.50)).await;

    assert_eq!(outcome, LifecycleOutcome::Modified { order_id: "sell-1".into() });
}

// S6: a position dropping to zero quantity closes out the repository entry
// and best-effort cancels the outstanding protective order.
#[tokio::test]
async fn position_closed_cancels_protective_order_and_clears_repository() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/cancel_order"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    let harness = harness(server).await;
    harness.core.stop_limit_repository.write().await.insert(
        "TRX".into(),
        stoplimit_coordinator::models::StopLimitRepositoryEntry::creating("TRX", "sell-trx", Utc::now()),
    );

    let outcome = harness.engine.on_position_closed("TRX").await;

    assert_eq!(outcome, LifecycleOutcome::Modified { order_id: "sell-trx".into() });
    assert!(harness.core.stop_limit_repository.read().await.get("TRX").is_none());
}

// B1: the position-wait loop gives up once its deadline passes, even
// outside the reconnect window, rather than waiting forever.
#[tokio::test]
async fn position_wait_expiry_outside_reconnect_window_is_skipped() {
    let server = MockServer::start().await;
    let harness = harness(server).await;

    let outcome = harness
        .engine
        .on_buy_filled("buy-4", "NVDA", dec!(900.00), dec!(10), FillOrigin::Tracked)
        .await;

    assert_eq!(outcome, LifecycleOutcome::Skipped(OutcomeReason::PositionMissing));
}

// B3: a fill price outside every configured tracker group's price band is
// a no-op rather than a guess at a default offset.
#[tokio::test]
async fn fill_price_outside_every_tracker_group_band_is_noop() {
    let server = MockServer::start().await;
    let harness = harness(server).await;
    set_position(&harness.core, "BRKA", dec!(1), dec!(2_000_000)).await;

    let outcome = harness
        .engine
        .on_buy_filled("buy-5", "BRKA", dec!(2_000_000), dec!(1), FillOrigin::Tracked)
        .await;

    assert_eq!(outcome, LifecycleOutcome::NoOp(OutcomeReason::NoMatchingTrackerGroup));
}

// R1: replaying the same FIL notification N times (already-tracked order,
// stable position) produces no more broker calls than a single modify per
// replay that observes the same existing entry - it never re-creates.
#[tokio::test]
async fn replayed_fill_notifications_never_re_create_an_existing_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/modify_order_quantity"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/place_order"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "order_id": "should-not-be-called",
            "status": "new",
        })))
        .expect(0)
        .mount(&server)
        .await;

    let harness = harness(server).await;
    harness.core.stop_limit_repository.write().await.insert("FIL".into(), active_entry("FIL", "sell-fil"));
    set_position(&harness.core, "FIL", dec!(200), dec!(5.00)).await;

    for _ in 0..3 {
        let outcome = harness
            .engine
            .on_buy_filled("buy-fil", "FIL", dec!(5.00), dec!(200), FillOrigin::Tracked)
            .await;
        assert_eq!(outcome, LifecycleOutcome::Modified { order_id: "sell-fil".into() });
    }
}

// R2: repeated identical upsertOrder calls for the same order view settle
// into one cache entry and one active-index slot, not a growing history.
#[tokio::test]
async fn repeated_identical_upsert_order_is_idempotent() {
    let server = MockServer::start().await;
    let harness = harness(server).await;

    let order = stoplimit_coordinator::execution::order_from_parts(
        "ord-rep".into(),
        "MSFT".into(),
        stoplimit_coordinator::models::OrderSide::Sell,
        "stop_limit".into(),
        "ACK".into(),
        Some(dec!(300.00)),
        Some(dec!(300.00)),
        dec!(10),
        dec!(10),
        Utc::now(),
        stoplimit_coordinator::models::OrderSource::Stream,
        json!({}),
    );

    for _ in 0..5 {
        harness.reconciler.upsert_order(order.clone()).await.unwrap();
    }

    assert_eq!(harness.core.orders.read().await.len(), 1);
    let index = harness.core.active_orders_by_symbol_side.read().await;
    assert_eq!(
        index.get(&("MSFT".to_string(), stoplimit_coordinator::models::OrderSide::Sell)),
        Some(&"ord-rep".to_string())
    );
}

// Reconciliation against the broker's order snapshot endpoint tolerates a
// 404 (some brokers don't expose it) without losing the durably-recorded
// order that rehydration already loaded into the cache.
#[tokio::test]
async fn rehydration_tolerates_missing_orders_snapshot_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let harness = harness(server).await;
    let durable_order = stoplimit_coordinator::execution::order_from_parts(
        "ord-amzn".into(),
        "AMZN".into(),
        stoplimit_coordinator::models::OrderSide::Sell,
        "stop_limit".into(),
        "ACK".into(),
        Some(dec!(180.00)),
        Some(dec!(180.00)),
        dec!(25),
        dec!(25),
        Utc::now(),
        stoplimit_coordinator::models::OrderSource::RestSnapshot,
        json!({}),
    );
    harness.store.upsert_order_state(&durable_order).await.unwrap();

    let result = harness.reconciler.rehydrate_active_orders().await;

    assert!(result.is_ok(), "rehydration should tolerate a missing orders snapshot: {result:?}");
    assert_eq!(
        harness.core.orders.read().await.get("ord-amzn").map(|o| o.qty),
        Some(dec!(25))
    );
}

// A permanent (non-retryable) broker rejection on modify_order_quantity
// means the existing order is terminal: the repository entry is torn down
// and the engine falls through to placing a fresh stop-limit, per spec.md
// §4.3 step 4/§7 PermanentUpstream — leaving the symbol with no protective
// order at all would violate P1.
#[tokio::test]
async fn permanent_modify_rejection_clears_repository_entry_and_creates_replacement() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/modify_order_quantity"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "error": "order already filled"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/place_order"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "order_id": "sell-gme-2",
            "status": "new",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let harness = harness(server).await;
    harness.core.stop_limit_repository.write().await.insert("GME".into(), active_entry("GME", "sell-gme"));
    set_position(&harness.core, "GME", dec!(75), dec!(20.00)).await;

    let outcome = harness
        .engine
        .on_buy_filled("buy-gme", "GME", dec!(20.00), dec!(75), FillOrigin::Tracked)
        .await;

    assert!(matches!(outcome, LifecycleOutcome::Created { ref order_id } if order_id == "sell-gme-2"));
    let repo = harness.core.stop_limit_repository.read().await;
    assert_eq!(repo.get("GME").map(|entry| entry.order_id.as_str()), Some("sell-gme-2"));
}
