//! Stop-limit lifecycle coordinator binary.
//!
//! Wires the broker REST client, the three event streams (orders,
//! positions, quotes), the in-memory core state, the state reconciler, the
//! stop-limit lifecycle engine, the trailing-stop tracker, the durable
//! store, and the operator control/status HTTP surface into one running
//! process.
//!
//! # Environment Variables
//!
//! See [`stoplimit_coordinator::config`] for the full list; the required
//! ones are `BROKER_API_BASE_URL` and `BROKER_API_KEY`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use stoplimit_coordinator::config::{self, Config};
use stoplimit_coordinator::execution::{
    CoreState, FillOrigin, PerSymbolSerializer, StateReconciler, Store, StopLimitLifecycleEngine,
    TrailingStopTracker,
};
use stoplimit_coordinator::infrastructure::broker::BrokerClient;
use stoplimit_coordinator::infrastructure::websocket::{
    parse_order_event, parse_position_event, parse_quote_event, spawn_stream, OrderEvent,
    StreamConfig,
};
use stoplimit_coordinator::models::{is_fallback_eligible_type, OrderSide};
use stoplimit_coordinator::resilience::{CircuitBreakerConfig, ServiceCircuitBreakers};
use stoplimit_coordinator::server::{create_router, ControlServer};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
#[allow(clippy::too_many_lines)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    config::load_dotenv_from_ancestors();

    #[allow(clippy::unwrap_used)]
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stoplimit_coordinator=info".parse().unwrap()),
        )
        .init();

    tracing::info!("starting stop-limit lifecycle coordinator");

    let config = Config::load_from_env().map_err(|error| {
        tracing::error!(%error, "configuration error");
        error
    })?;

    let shutdown = CancellationToken::new();

    let core = CoreState::new();

    let store = match &config.persistence.db_uri {
        Some(uri) => Store::open_local(uri, config.persistence.debounce_interval).await,
        None => {
            tracing::warn!("DB_URI not set, falling back to a volatile in-memory store");
            Store::open_in_memory(config.persistence.debounce_interval).await
        }
    };
    let store = Arc::new(store.map_err(|error| {
        tracing::error!(%error, "failed to open durable store");
        error
    })?);
    store.spawn_flush_loop(config.persistence.flush_interval, shutdown.clone());

    let circuit_breakers = ServiceCircuitBreakers::with_defaults();
    let broker_circuit = Arc::new(
        circuit_breakers
            .broker
            .unwrap_or_else(|| stoplimit_coordinator::resilience::CircuitBreaker::new(
                "broker",
                CircuitBreakerConfig::broker(),
            )),
    );
    let broker = Arc::new(
        BrokerClient::new(config.broker.to_client_config())
            .map_err(|error| {
                tracing::error!(%error, "failed to build broker client");
                error
            })?
            .with_circuit_breaker(Arc::clone(&broker_circuit)),
    );

    let reconciler = Arc::new(StateReconciler::with_timing(
        Arc::clone(&core),
        Arc::clone(&store),
        Arc::clone(&broker),
        config.reconciliation.reconnect_window,
        config.reconciliation.reconcile_cooldown,
    ));

    let serializer = PerSymbolSerializer::new();

    let tracker_config_path = std::env::var("TRACKER_CONFIG_PATH").ok();
    let tracker_config = config::load_tracker_config(tracker_config_path.as_deref())
        .map_err(|error| {
            tracing::error!(%error, "failed to load tracker config");
            error
        })?;

    let engine = Arc::new(StopLimitLifecycleEngine::with_timing(
        Arc::clone(&core),
        Arc::clone(&store),
        Arc::clone(&broker),
        Arc::clone(&serializer),
        Arc::clone(&reconciler),
        tracker_config.clone(),
        config.tracker_runtime.position_wait,
        config.tracker_runtime.post_create_check,
    ));

    let tracker = Arc::new(TrailingStopTracker::new(
        Arc::clone(&core),
        Arc::clone(&store),
        Arc::clone(&engine),
        tracker_config,
    ));

    tracing::info!("rehydrating active orders before accepting live events");
    if let Err(error) = reconciler.rehydrate_active_orders().await {
        tracing::error!(%error, "rehydration failed, continuing with an empty cache");
    }
    let rehydration_complete = Arc::new(AtomicBool::new(true));

    let stream_enabled = Arc::new(AtomicBool::new(true));

    let orders_handle = spawn_stream(
        StreamConfig::new(config.broker.orders_stream_url.clone()),
        shutdown.clone(),
    );
    let positions_handle = spawn_stream(
        StreamConfig::new(config.broker.positions_stream_url.clone()),
        shutdown.clone(),
    );
    let quotes_handle = spawn_stream(
        StreamConfig::new(config.broker.quotes_stream_url.clone()),
        shutdown.clone(),
    );

    spawn_reconnect_barrier_watcher(
        Arc::clone(&reconciler),
        Arc::clone(&orders_handle.connected),
        shutdown.clone(),
    );

    spawn_order_stream_consumer(
        orders_handle.messages,
        Arc::clone(&core),
        Arc::clone(&reconciler),
        Arc::clone(&engine),
        Arc::clone(&stream_enabled),
    );
    spawn_position_stream_consumer(
        positions_handle.messages,
        Arc::clone(&reconciler),
        Arc::clone(&engine),
        Arc::clone(&stream_enabled),
    );

    let (quote_tx, quote_rx) = mpsc::channel(1024);
    tokio::spawn(stoplimit_coordinator::execution::run_quote_debounce(
        Arc::clone(&tracker),
        quote_rx,
        shutdown.clone(),
    ));
    spawn_quote_stream_consumer(quotes_handle.messages, quote_tx);

    let control_server = ControlServer::new(
        Arc::clone(&core),
        Arc::clone(&orders_handle.state),
        Arc::clone(&orders_handle.last_connected),
        Arc::clone(&stream_enabled),
        rehydration_complete,
    );
    let app = create_router(control_server);
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    tracing::info!(bind_addr = %config.server.bind_addr, "control surface listening");

    let server_shutdown = shutdown.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        server_shutdown.cancelled().await;
    });
    let server_handle = tokio::spawn(async move {
        if let Err(error) = server.await {
            tracing::error!(%error, "control server error");
        }
    });

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received");
    shutdown.cancel();
    let _ = server_handle.await;
    store.flush().await.ok();

    tracing::info!("stop-limit lifecycle coordinator stopped");
    Ok(())
}

/// Raises the reconnect barrier every time the orders stream reconnects,
/// per `spec.md` §4.1.
fn spawn_reconnect_barrier_watcher(
    reconciler: Arc<StateReconciler>,
    connected: Arc<tokio::sync::Notify>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = connected.notified() => {
                    reconciler.reconnect_barrier(chrono::Utc::now()).await;
                    tracing::info!("reconnect barrier raised");
                }
                () = shutdown.cancelled() => break,
            }
        }
    });
}

fn spawn_order_stream_consumer(
    mut messages: mpsc::Receiver<String>,
    core: Arc<CoreState>,
    reconciler: Arc<StateReconciler>,
    engine: Arc<StopLimitLifecycleEngine>,
    stream_enabled: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        while let Some(text) = messages.recv().await {
            let event = match parse_order_event(&text) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(error) => {
                    tracing::warn!(%error, "failed to parse order event");
                    continue;
                }
            };
            if !stream_enabled.load(Ordering::Relaxed) {
                continue;
            }
            handle_order_event(event, &core, &reconciler, &engine).await;
        }
    });
}

async fn handle_order_event(
    event: OrderEvent,
    core: &Arc<CoreState>,
    reconciler: &Arc<StateReconciler>,
    engine: &Arc<StopLimitLifecycleEngine>,
) {
    let side = parse_side(&event.side);
    let order = stoplimit_coordinator::execution::order_from_parts(
        event.broker_order_id.clone(),
        event.symbol.clone(),
        side,
        event.type_raw.clone(),
        event.status_raw.clone(),
        event.limit_price,
        event.stop_price,
        event.qty,
        event.remaining_qty,
        event.opened_at,
        stoplimit_coordinator::models::OrderSource::Stream,
        event.raw.clone(),
    );
    if let Err(error) = reconciler.upsert_order(order.clone()).await {
        tracing::warn!(%error, "failed to upsert streamed order");
    }

    let is_fill = event.event_type.eq_ignore_ascii_case("fill")
        || event.event_type.eq_ignore_ascii_case("fll");
    let tracked = is_fill && side == OrderSide::Buy && core.take_pending_manual_buy(&event.broker_order_id).await;
    // FALLBACK (spec.md §4.3/GLOSSARY) only admits an untracked buy fill
    // whose typeRaw is limit/empty/unknown; a stop_limit or market buy the
    // broker itself reports is a recognized type, not a historical replay
    // of an order this system forgot about.
    let fallback_eligible = is_fill && side == OrderSide::Buy && is_fallback_eligible_type(&event.type_raw);
    if tracked || fallback_eligible {
        let origin = if tracked { FillOrigin::Tracked } else { FillOrigin::Fallback };
        // A fill price is required to pick the tracker group and compute
        // the initial stop offset; the order's limit price is the next
        // best evidence of where it filled when the event omits it
        // outright. Quantity is never a stand-in for price.
        let Some(fill_price) = event.fill_price.or(event.limit_price) else {
            tracing::warn!(symbol = %event.symbol, broker_order_id = %event.broker_order_id, "buy fill missing both fill price and limit price, skipping onBuyFilled");
            return;
        };
        let filled_qty = event.filled_qty.unwrap_or(event.qty);
        let outcome = engine
            .on_buy_filled(&event.broker_order_id, &event.symbol, fill_price, filled_qty, origin)
            .await;
        tracing::info!(symbol = %event.symbol, ?outcome, "onBuyFilled handled");
    } else {
        let outcome = engine.on_order_status_change(order).await;
        tracing::debug!(symbol = %event.symbol, ?outcome, "onOrderStatusChange handled");
    }
}

fn spawn_position_stream_consumer(
    mut messages: mpsc::Receiver<String>,
    reconciler: Arc<StateReconciler>,
    engine: Arc<StopLimitLifecycleEngine>,
    stream_enabled: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        while let Some(text) = messages.recv().await {
            let event = match parse_position_event(&text) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(error) => {
                    tracing::warn!(%error, "failed to parse position event");
                    continue;
                }
            };
            if !stream_enabled.load(Ordering::Relaxed) {
                continue;
            }
            match reconciler
                .upsert_position(&event.symbol, event.quantity, event.average_price)
                .await
            {
                Ok(_closed) => {
                    let outcome = engine.on_position_update(&event.symbol, event.quantity).await;
                    tracing::debug!(symbol = %event.symbol, ?outcome, "onPositionUpdate handled");
                }
                Err(error) => tracing::warn!(%error, "failed to upsert streamed position"),
            }
        }
    });
}

fn spawn_quote_stream_consumer(
    mut messages: mpsc::Receiver<String>,
    quote_tx: mpsc::Sender<(String, stoplimit_coordinator::execution::Quote)>,
) {
    tokio::spawn(async move {
        while let Some(text) = messages.recv().await {
            match parse_quote_event(&text) {
                Ok(Some((symbol, event))) => {
                    let quote = stoplimit_coordinator::execution::Quote { last: event.last };
                    if quote_tx.send((symbol, quote)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(error) => tracing::warn!(%error, "failed to parse quote event"),
            }
        }
    });
}

fn parse_side(raw: &str) -> OrderSide {
    if raw.eq_ignore_ascii_case("sell") {
        OrderSide::Sell
    } else {
        OrderSide::Buy
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        #[allow(clippy::expect_used)]
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[allow(clippy::expect_used)]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}
