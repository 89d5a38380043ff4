//! Order state as observed through broker streams and REST snapshots.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Side of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

/// Origin of the most recent view of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSource {
    /// Observed through the live order-status stream.
    Stream,
    /// Observed through a REST snapshot (reconciliation fetch).
    RestSnapshot,
}

/// Coordinator-normalized order status.
///
/// Broker status strings map onto exactly one of these two buckets via
/// [`OrderStatus::normalize`]. Anything not recognized normalizes to
/// `Inactive` with a warning logged by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// The order can still receive fills or be acted upon.
    Active,
    /// The order is in a terminal state.
    Inactive,
}

impl OrderStatus {
    const ACTIVE_RAW: &'static [&'static str] = &[
        "DON", "QUE", "QUEUED", "ACK", "REC", "RECEIVED", "NEW", "OPEN", "PENDING", "PND",
        "PARTIALLY_FILLED", "PARTIAL", "WORKING", "ACTIVE",
    ];

    const INACTIVE_RAW: &'static [&'static str] = &[
        "FILLED", "FIL", "FLL", "CANCELED", "CAN", "CANCELLED", "EXPIRED", "EXP", "REJECTED",
        "REJ", "OUT", "CLOSED",
    ];

    /// Normalizes a raw broker status string per the status normalization
    /// table. Returns `None` when the raw string is not recognized at all
    /// (the caller normalizes unknown values to `Inactive` and logs a
    /// warning, since this function cannot log on its own).
    #[must_use]
    pub fn normalize(raw: &str) -> Option<Self> {
        let upper = raw.to_ascii_uppercase();
        if Self::ACTIVE_RAW.contains(&upper.as_str()) {
            Some(Self::Active)
        } else if Self::INACTIVE_RAW.contains(&upper.as_str()) {
            Some(Self::Inactive)
        } else {
            None
        }
    }

    /// True for the statuses that remove a repository entry outright:
    /// filled, canceled, expired, rejected, and broker-side "out".
    #[must_use]
    pub fn is_terminal_raw(raw: &str) -> bool {
        matches!(
            raw.to_ascii_uppercase().as_str(),
            "FIL" | "FLL" | "FILLED" | "CAN" | "CANCELED" | "CANCELLED" | "EXP" | "EXPIRED"
                | "REJ" | "REJECTED" | "OUT"
        )
    }
}

/// An order as last observed, identified by its broker order id.
///
/// Only one `(symbol, side, Active)` tuple may exist for the protective
/// sell side at any time; this invariant is enforced by the lifecycle
/// engine and serializer, not by this type itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Broker-assigned order identifier. Identity key for this record.
    pub broker_order_id: String,
    /// Underlying symbol.
    pub symbol: String,
    /// Buy or sell.
    pub side: OrderSide,
    /// Raw broker order type string (e.g. `"stop_limit"`, `"limit"`).
    pub type_raw: String,
    /// Raw broker status string, as received.
    pub status_raw: String,
    /// Normalized status derived from `status_raw`.
    pub status_norm: OrderStatus,
    /// Limit price, if the order type carries one.
    pub limit_price: Option<Decimal>,
    /// Stop price, if the order type carries one.
    pub stop_price: Option<Decimal>,
    /// Order quantity. Always greater than zero.
    pub qty: Decimal,
    /// Quantity not yet filled.
    pub remaining_qty: Decimal,
    /// When the order was opened, per the broker.
    pub opened_at: DateTime<Utc>,
    /// When this record was last updated locally.
    pub updated_at: DateTime<Utc>,
    /// Whether this view came from the stream or a REST snapshot.
    pub source: OrderSource,
    /// Opaque broker payload, preserved for debugging and audit.
    pub full_order_data: Value,
}

impl Order {
    /// True if the order type is a protective stop-limit sell. Matches
    /// `stop_limit`/`stoplimit` case- and underscore-insensitively, per
    /// `spec.md` §4.3 step 3c.
    #[must_use]
    pub fn is_stop_limit_sell(&self) -> bool {
        self.side == OrderSide::Sell
            && self.type_raw.to_ascii_lowercase().replace('_', "") == "stoplimit"
    }

    /// True if the order is still in an active (non-terminal) state.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.status_norm, OrderStatus::Active)
    }
}

/// True if `type_raw` is one of the order types the FALLBACK path (an
/// untracked buy fill, `spec.md` §4.3/GLOSSARY) is willing to treat as a
/// real buy: `limit`, empty, or literally `unknown`. A `stop_limit`/
/// `market` buy the broker itself reports is never routed through
/// FALLBACK: those are named, recognized types the gate explicitly
/// excludes, not historical replays.
#[must_use]
pub fn is_fallback_eligible_type(type_raw: &str) -> bool {
    let normalized = type_raw.to_ascii_lowercase().replace('_', "");
    normalized.is_empty() || normalized == "limit" || normalized == "unknown"
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use test_case::test_case;

    fn sample_order(type_raw: &str, side: OrderSide) -> Order {
        Order {
            broker_order_id: "ord-1".into(),
            symbol: "AAPL".into(),
            side,
            type_raw: type_raw.into(),
            status_raw: "ACK".into(),
            status_norm: OrderStatus::Active,
            limit_price: None,
            stop_price: None,
            qty: Decimal::new(500, 0),
            remaining_qty: Decimal::new(500, 0),
            opened_at: Utc::now(),
            updated_at: Utc::now(),
            source: OrderSource::Stream,
            full_order_data: Value::Null,
        }
    }

    #[test]
    fn is_stop_limit_sell_matches_case_and_underscore_insensitively() {
        for type_raw in ["stop_limit", "STOP_LIMIT", "stoplimit", "StopLimit"] {
            assert!(sample_order(type_raw, OrderSide::Sell).is_stop_limit_sell(), "{type_raw}");
        }
    }

    #[test]
    fn is_stop_limit_sell_rejects_wrong_side_or_type() {
        assert!(!sample_order("stop_limit", OrderSide::Buy).is_stop_limit_sell());
        assert!(!sample_order("limit", OrderSide::Sell).is_stop_limit_sell());
    }

    #[test_case("limit", true; "limit")]
    #[test_case("", true; "empty")]
    #[test_case("unknown", true; "literal_unknown")]
    #[test_case("LIMIT", true; "limit_uppercase")]
    #[test_case("stop_limit", false; "stop_limit")]
    #[test_case("market", false; "market")]
    fn is_fallback_eligible_type_matches_spec_gate(type_raw: &str, expected: bool) {
        assert_eq!(is_fallback_eligible_type(type_raw), expected);
    }

    #[test]
    fn normalizes_known_active_statuses() {
        for raw in ["NEW", "working", "PartiallyFilled".to_uppercase().as_str()] {
            assert_eq!(OrderStatus::normalize(raw), Some(OrderStatus::Active));
        }
    }

    #[test]
    fn normalizes_known_inactive_statuses() {
        for raw in ["FIL", "canceled", "EXPIRED", "rej"] {
            assert_eq!(OrderStatus::normalize(raw), Some(OrderStatus::Inactive));
        }
    }

    #[test]
    fn unknown_status_normalizes_to_none() {
        assert_eq!(OrderStatus::normalize("SOMETHING_WEIRD"), None);
    }

    #[test_case("DON", OrderStatus::Active; "don")]
    #[test_case("QUEUED", OrderStatus::Active; "queued")]
    #[test_case("ACK", OrderStatus::Active; "ack")]
    #[test_case("REC", OrderStatus::Active; "rec")]
    #[test_case("OPEN", OrderStatus::Active; "open")]
    #[test_case("PND", OrderStatus::Active; "pnd")]
    #[test_case("PARTIAL", OrderStatus::Active; "partial")]
    #[test_case("FLL", OrderStatus::Inactive; "fll")]
    #[test_case("CAN", OrderStatus::Inactive; "can")]
    #[test_case("CANCELLED", OrderStatus::Inactive; "cancelled_double_l")]
    #[test_case("EXP", OrderStatus::Inactive; "exp")]
    #[test_case("OUT", OrderStatus::Inactive; "out")]
    #[test_case("CLOSED", OrderStatus::Inactive; "closed")]
    fn status_normalization_table_matches_spec(raw: &str, expected: OrderStatus) {
        assert_eq!(OrderStatus::normalize(raw), Some(expected));
    }

    #[test]
    fn terminal_raw_matches_spec_table() {
        assert!(OrderStatus::is_terminal_raw("FLL"));
        assert!(OrderStatus::is_terminal_raw("OUT"));
        assert!(!OrderStatus::is_terminal_raw("NEW"));
    }
}
