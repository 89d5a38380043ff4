//! Metrics for the stop-limit lifecycle coordinator, recorded through the
//! bare `metrics` facade. No exporter is wired by default — whatever the
//! process installs as the global recorder (or none, in which case these
//! calls are harmless no-ops) receives them.

use metrics::{counter, gauge};

/// Updates the active stop-limit repository entry count gauge.
pub fn set_active_stop_limits(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("stoplimit_active_count").set(count as f64);
}

/// Increments the count of `reconcileSymbolOrders` invocations for `symbol`.
pub fn record_reconcile_call(symbol: &str) {
    counter!("stoplimit_reconcile_calls_total", "symbol" => symbol.to_string()).increment(1);
}

/// Increments the count of durable-store write failures for `operation`.
pub fn record_persistence_failure(operation: &str) {
    counter!("stoplimit_persistence_failures_total", "operation" => operation.to_string())
        .increment(1);
}

/// Increments the count of detected duplicate-order races (`StateConflict`)
/// for `symbol`.
pub fn record_duplicate_detected(symbol: &str) {
    counter!("stoplimit_duplicate_detected_total", "symbol" => symbol.to_string()).increment(1);
}

/// Increments the count of trailing-stop ratchet step advances for `symbol`.
pub fn record_tracker_step_advance(symbol: &str) {
    counter!("stoplimit_tracker_step_advance_total", "symbol" => symbol.to_string()).increment(1);
}

/// Circuit breaker state values for the gauge.
pub mod circuit_breaker_state {
    /// Circuit is closed (healthy).
    pub const CLOSED: f64 = 0.0;
    /// Circuit is open (failing).
    pub const OPEN: f64 = 1.0;
    /// Circuit is half-open (testing).
    pub const HALF_OPEN: f64 = 2.0;
}

/// Updates the circuit breaker state gauge for `service`.
pub fn record_circuit_breaker_state(service: &str, state: f64) {
    gauge!("circuit_breaker_state", "service" => service.to_string()).set(state);
}

/// Records a circuit breaker rejection (call rejected due to an open
/// circuit) for `service`.
pub fn record_circuit_breaker_rejected(service: &str) {
    counter!("circuit_breaker_rejected_total", "service" => service.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_an_installed_recorder_does_not_panic() {
        set_active_stop_limits(3);
        record_reconcile_call("AAPL");
        record_persistence_failure("upsert_order");
        record_duplicate_detected("AAPL");
        record_tracker_step_advance("AAPL");
        record_circuit_breaker_state("broker", circuit_breaker_state::CLOSED);
        record_circuit_breaker_rejected("broker");
    }
}
