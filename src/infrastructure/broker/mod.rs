//! Broker REST adapter: place/modify/cancel orders and fetch snapshots.

mod api_types;
mod client;
mod config;
mod error;

pub use api_types::{
    CancelOrderRequest, CancelOrderResponse, ModifyOrderQuantityRequest, ModifyOrderResponse,
    ModifyOrderStopPriceRequest, OrderSnapshotRow, PlaceOrderRequest, PlaceOrderResponse,
    PlaceOrderSide, PlaceOrderType, PositionSnapshotRow,
};
pub use client::BrokerClient;
pub use config::{BrokerConfig, RetryConfig};
pub use error::BrokerError;
