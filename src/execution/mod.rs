//! Order execution: the in-memory state cache, the lifecycle engine that
//! turns buy fills into stop-limit orders, the reconciler that keeps the
//! cache aligned with the broker's view of the world, the per-symbol
//! serializer that orders concurrent mutations, the durable store, and the
//! trailing-stop tracker.

mod core_state;
mod lifecycle;
mod persistence;
mod reconciler;
mod serializer;
mod tracker;

pub use core_state::CoreState;
pub use lifecycle::{FillOrigin, StopLimitLifecycleEngine};
pub use persistence::{order_from_parts, PersistenceError, Store};
pub use reconciler::StateReconciler;
pub use serializer::{PerSymbolSerializer, SymbolGuard};
pub use tracker::{run_quote_debounce, Quote, TrailingStopTracker};
