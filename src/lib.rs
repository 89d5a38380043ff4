// Allow unwrap/expect in tests - tests should panic on unexpected errors
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Stop-limit lifecycle coordinator.
//!
//! Watches buy fills on a brokerage stream and maintains exactly one
//! protective stop-limit sell per symbol, ratcheting its stop price as a
//! position's unrealized P&L advances through configured steps. Recovers
//! its view of the world from the broker and a durable store after any
//! disconnect, rather than trusting the stream alone.
//!
//! # Modules
//!
//! - [`models`]: orders, positions, the stop-limit repository entry, and
//!   the trailing-stop tracker's progress/config types.
//! - [`execution`]: the in-memory core state cache, the lifecycle engine,
//!   the state reconciler, the per-symbol serializer, the durable store,
//!   and the trailing-stop tracker.
//! - [`infrastructure`]: the broker REST client and WebSocket stream
//!   manager.
//! - [`resilience`]: the circuit breaker guarding broker calls.
//! - [`config`]: environment-driven configuration.
//! - [`observability`]: metrics.
//! - [`server`]: the operator control/status HTTP surface.
//! - [`error`]: the shared error and lifecycle-outcome types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod execution;
pub mod infrastructure;
pub mod models;
pub mod observability;
pub mod resilience;
pub mod server;

pub use error::{EngineError, LifecycleOutcome, OutcomeReason};
pub use execution::{CoreState, FillOrigin, PerSymbolSerializer, StateReconciler, Store, StopLimitLifecycleEngine, TrailingStopTracker};
pub use models::{
    EntryState, Order, OrderSide, OrderSource, OrderStatus, Position, StopLimitRepositoryEntry,
    TrackerConfig, TrackerGroup, TrackerProgress, TrackerStep,
};
