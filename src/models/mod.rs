//! Core data model for the stop-limit lifecycle coordinator.
//!
//! Every type here is identified by a natural key (`symbol`, or
//! `broker_order_id` for orders) rather than a synthetic id, matching the
//! way the broker and durable store both key their own records.

mod order;
mod position;
mod stop_limit;
mod tracker;

pub use order::{is_fallback_eligible_type, Order, OrderSide, OrderSource, OrderStatus};
pub use position::Position;
pub use stop_limit::{echo_payload, EntryState, StopLimitRepositoryEntry};
pub use tracker::{TrackerConfig, TrackerGroup, TrackerProgress, TrackerStep};
