//! Message parsing for the three event streams.
//!
//! Every message is expected to carry at least `{type, data: {...}}`. The
//! symbol is resolved by checking the root object first, then the first
//! element of `data` when `data` is an array (some broker shapes wrap a
//! single logical event in a one-element "legs" array).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::error::EngineError;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    msg_type: String,
    data: Value,
}

/// A parsed order-stream event, still in raw/string form — the caller maps
/// this onto [`crate::models::Order`] after normalizing the status.
#[derive(Debug, Clone)]
pub struct OrderEvent {
    /// Broker event type (e.g. `"fill"`, `"new"`, `"canceled"`).
    pub event_type: String,
    /// Underlying symbol.
    pub symbol: String,
    /// Broker order id.
    pub broker_order_id: String,
    /// Raw side string.
    pub side: String,
    /// Raw order type string.
    pub type_raw: String,
    /// Raw status string.
    pub status_raw: String,
    /// Limit price, if present.
    pub limit_price: Option<Decimal>,
    /// Stop price, if present.
    pub stop_price: Option<Decimal>,
    /// Order quantity.
    pub qty: Decimal,
    /// Remaining quantity, defaulting to `qty` when absent.
    pub remaining_qty: Decimal,
    /// Fill price, present on fill events.
    pub fill_price: Option<Decimal>,
    /// Filled quantity, present on fill events.
    pub filled_qty: Option<Decimal>,
    /// Opened timestamp.
    pub opened_at: DateTime<Utc>,
    /// Full raw payload for audit/debugging.
    pub raw: Value,
}

/// A parsed position-stream event.
#[derive(Debug, Clone)]
pub struct PositionEvent {
    /// Underlying symbol.
    pub symbol: String,
    /// Current quantity.
    pub quantity: Decimal,
    /// Average entry price.
    pub average_price: Decimal,
}

/// A parsed quote-stream event.
#[derive(Debug, Clone, Copy)]
pub struct QuoteEvent {
    /// Underlying symbol.
    pub last: Decimal,
}

fn resolve_symbol(root: &Value, data: &Value) -> Option<String> {
    root.get("symbol")
        .and_then(Value::as_str)
        .or_else(|| data.get("symbol").and_then(Value::as_str))
        .or_else(|| {
            data.as_array()
                .and_then(|legs| legs.first())
                .and_then(|leg| leg.get("symbol"))
                .and_then(Value::as_str)
        })
        .map(str::to_string)
}

fn decimal_field(value: &Value, field: &str) -> Option<Decimal> {
    value
        .get(field)
        .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_f64().map(|f| f.to_string())))
        .and_then(|s| s.parse::<Decimal>().ok())
}

fn parse_timestamp(value: &Value, field: &str) -> DateTime<Utc> {
    value
        .get(field)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

/// Parses one order-stream text frame. Returns `Ok(None)` for messages that
/// are valid JSON but not an order event (e.g. control/heartbeat frames).
pub fn parse_order_event(text: &str) -> Result<Option<OrderEvent>, EngineError> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| EngineError::protocol_violation(e))?;

    // Some broker shapes wrap a single logical event in a one-element
    // "legs" array rather than putting it at the root of `data`; resolve
    // that leg first so every subsequent field lookup sees the same object
    // `resolve_symbol` does.
    let leg = envelope
        .data
        .as_array()
        .and_then(|legs| legs.first())
        .cloned()
        .unwrap_or_else(|| envelope.data.clone());
    let order = leg.get("order").cloned().unwrap_or_else(|| leg.clone());

    let symbol = resolve_symbol(&envelope.data, &leg)
        .ok_or_else(|| EngineError::protocol_violation("order event missing symbol"))?;
    let broker_order_id = order
        .get("order_id")
        .or_else(|| order.get("id"))
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::protocol_violation("order event missing order id"))?
        .to_string();
    let side = order
        .get("side")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let type_raw = order
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let status_raw = leg
        .get("status")
        .or_else(|| order.get("status"))
        .and_then(Value::as_str)
        .or(Some(envelope.msg_type.as_str()))
        .unwrap_or_default()
        .to_string();
    let qty = decimal_field(&order, "qty").unwrap_or(Decimal::ZERO);
    let remaining_qty = decimal_field(&order, "remaining_qty").unwrap_or(qty);

    Ok(Some(OrderEvent {
        event_type: envelope.msg_type,
        symbol,
        broker_order_id,
        side,
        type_raw,
        status_raw,
        limit_price: decimal_field(&order, "limit_price"),
        stop_price: decimal_field(&order, "stop_price"),
        qty,
        remaining_qty,
        fill_price: decimal_field(&leg, "price"),
        filled_qty: decimal_field(&leg, "qty"),
        opened_at: parse_timestamp(&order, "opened_at"),
        raw: envelope.data,
    }))
}

/// Parses one position-stream text frame.
pub fn parse_position_event(text: &str) -> Result<Option<PositionEvent>, EngineError> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| EngineError::protocol_violation(e))?;

    let symbol = resolve_symbol(&envelope.data, &envelope.data)
        .ok_or_else(|| EngineError::protocol_violation("position event missing symbol"))?;
    let quantity = decimal_field(&envelope.data, "qty")
        .ok_or_else(|| EngineError::protocol_violation("position event missing qty"))?;
    let average_price = decimal_field(&envelope.data, "average_price").unwrap_or(Decimal::ZERO);

    Ok(Some(PositionEvent {
        symbol,
        quantity,
        average_price,
    }))
}

/// Parses one quote-stream text frame: `{symbol, last, ts}`.
pub fn parse_quote_event(text: &str) -> Result<Option<(String, QuoteEvent)>, EngineError> {
    let value: Value = serde_json::from_str(text).map_err(|e| EngineError::protocol_violation(e))?;
    let Some(symbol) = value.get("symbol").and_then(Value::as_str) else {
        return Ok(None);
    };
    let Some(last) = decimal_field(&value, "last") else {
        return Ok(None);
    };
    Ok(Some((symbol.to_string(), QuoteEvent { last })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_order_event_with_root_symbol() {
        let text = r#"{
            "type": "fill",
            "data": {
                "symbol": "AAPL",
                "price": "225.50",
                "qty": "500",
                "order": {
                    "order_id": "ord-1",
                    "side": "buy",
                    "type": "limit",
                    "status": "FIL",
                    "qty": "500"
                }
            }
        }"#;
        let event = parse_order_event(text).unwrap().unwrap();
        assert_eq!(event.symbol, "AAPL");
        assert_eq!(event.broker_order_id, "ord-1");
        assert_eq!(event.fill_price, Some(Decimal::new(22550, 2)));
    }

    #[test]
    fn parses_order_event_with_symbol_on_leg() {
        let text = r#"{
            "type": "new",
            "data": [
                {
                    "symbol": "PLTR",
                    "order": { "order_id": "ord-2", "side": "sell", "type": "stop_limit", "status": "ACK", "qty": "100" }
                }
            ]
        }"#;
        let event = parse_order_event(text).unwrap().unwrap();
        assert_eq!(event.symbol, "PLTR");
    }

    #[test]
    fn rejects_order_event_missing_symbol() {
        let text = r#"{"type":"new","data":{"order":{"order_id":"x","qty":"1"}}}"#;
        assert!(parse_order_event(text).is_err());
    }

    #[test]
    fn parses_quote_event() {
        let (symbol, quote) = parse_quote_event(r#"{"symbol":"AAPL","last":225.75,"ts":1}"#)
            .unwrap()
            .unwrap();
        assert_eq!(symbol, "AAPL");
        assert_eq!(quote.last, Decimal::new(22575, 2));
    }

    #[test]
    fn parses_position_event() {
        let text = r#"{"type":"position","data":{"symbol":"AAPL","qty":"500","average_price":"225.50"}}"#;
        let event = parse_position_event(text).unwrap().unwrap();
        assert_eq!(event.quantity, Decimal::new(50000, 2));
    }
}
