//! Metrics instrumentation for the stop-limit lifecycle coordinator.

mod metrics;

pub use metrics::{
    circuit_breaker_state, record_circuit_breaker_rejected, record_circuit_breaker_state,
    record_duplicate_detected, record_persistence_failure, record_reconcile_call,
    record_tracker_step_advance, set_active_stop_limits,
};
