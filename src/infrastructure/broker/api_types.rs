//! Wire types for the broker REST surface.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Order type accepted by `place_order`.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceOrderType {
    /// Limit order.
    Limit,
    /// Stop-limit order.
    StopLimit,
    /// Market order.
    Market,
}

/// Side accepted by `place_order`.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceOrderSide {
    /// Buy.
    Buy,
    /// Sell.
    Sell,
}

/// `POST place_order` request body.
#[derive(Debug, Clone, Serialize)]
pub struct PlaceOrderRequest {
    /// Underlying symbol.
    pub symbol: String,
    /// Buy or sell.
    pub side: PlaceOrderSide,
    /// Order type.
    #[serde(rename = "type")]
    pub order_type: PlaceOrderType,
    /// Order quantity.
    pub qty: Decimal,
    /// Limit price, required for `limit` and `stop_limit`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    /// Stop price, required for `stop_limit`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Decimal>,
}

/// `POST place_order` response body.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrderResponse {
    /// Broker-assigned order id.
    pub order_id: String,
    /// Broker's initial status string for the order.
    pub status: String,
}

/// `POST modify_order_quantity` request body.
#[derive(Debug, Clone, Serialize)]
pub struct ModifyOrderQuantityRequest {
    /// Target broker order id.
    pub order_id: String,
    /// New quantity. Always the full current position quantity, never a
    /// delta.
    pub qty: Decimal,
}

/// `POST modify_order_stop_price` request body.
#[derive(Debug, Clone, Serialize)]
pub struct ModifyOrderStopPriceRequest {
    /// Target broker order id.
    pub order_id: String,
    /// New stop price.
    pub stop_price: Decimal,
    /// New limit price (stop-limit orders carry both).
    pub limit_price: Decimal,
}

/// Common response shape for `modify_order_quantity` and
/// `modify_order_stop_price`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModifyOrderResponse {
    /// Whether the modification was accepted.
    pub success: bool,
    /// Error detail, present when `success` is `false`.
    #[serde(default)]
    pub error: Option<String>,
}

/// `POST cancel_order` request body.
#[derive(Debug, Clone, Serialize)]
pub struct CancelOrderRequest {
    /// Target broker order id.
    pub order_id: String,
}

/// `POST cancel_order` response body.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelOrderResponse {
    /// Whether the cancel was accepted.
    pub success: bool,
}

/// A single order row as returned by `GET orders`.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderSnapshotRow {
    /// Broker order id.
    pub order_id: String,
    /// Underlying symbol. May be absent on some broker shapes; callers
    /// should prefer the root field when present.
    #[serde(default)]
    pub symbol: Option<String>,
    /// Raw side string.
    pub side: String,
    /// Raw order type string.
    #[serde(rename = "type")]
    pub order_type: String,
    /// Raw status string.
    pub status: String,
    /// Limit price, if applicable.
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    /// Stop price, if applicable.
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    /// Order quantity.
    pub qty: Decimal,
    /// Remaining (unfilled) quantity.
    #[serde(default)]
    pub remaining_qty: Option<Decimal>,
    /// Opened timestamp, RFC3339.
    pub opened_at: String,
    /// Full raw payload, preserved verbatim for `full_order_data`.
    #[serde(flatten)]
    pub raw: Value,
}

/// A single position row as returned by `GET positions`.
#[derive(Debug, Clone, Deserialize)]
pub struct PositionSnapshotRow {
    /// Underlying symbol.
    pub symbol: String,
    /// Current quantity.
    pub qty: Decimal,
    /// Average entry price.
    pub average_price: Decimal,
}
