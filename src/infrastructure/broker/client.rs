//! HTTP client for the broker REST surface.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::Serialize;

use super::api_types::{
    CancelOrderRequest, CancelOrderResponse, ModifyOrderQuantityRequest,
    ModifyOrderResponse, ModifyOrderStopPriceRequest, OrderSnapshotRow, PlaceOrderRequest,
    PlaceOrderResponse, PositionSnapshotRow,
};
use super::config::BrokerConfig;
use super::error::BrokerError;
use crate::resilience::CircuitBreaker;

/// Tracks the exponential backoff schedule across one logical call's retry
/// attempts.
struct Backoff {
    attempt: u32,
    max_attempts: u32,
    current: Duration,
    max: Duration,
    multiplier: f64,
}

impl Backoff {
    fn new(config: &super::config::RetryConfig) -> Self {
        Self {
            attempt: 0,
            max_attempts: config.max_attempts,
            current: config.initial_backoff,
            max: config.max_backoff,
            multiplier: config.multiplier,
        }
    }

    fn next_delay(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= self.max_attempts {
            return None;
        }
        let delay = self.current;
        let scaled = delay.mul_f64(self.multiplier);
        self.current = scaled.min(self.max);
        Some(delay)
    }
}

/// Broker REST client, implementing the place/modify/cancel/snapshot
/// surface named in `spec.md` §6.
#[derive(Debug, Clone)]
pub struct BrokerClient {
    http: Client,
    config: BrokerConfig,
    circuit: Option<Arc<CircuitBreaker>>,
}

impl BrokerClient {
    /// Builds a client from `config`, configuring the connect timeout on
    /// the underlying `reqwest::Client`. No circuit breaker is attached;
    /// use [`Self::with_circuit_breaker`] to add one.
    pub fn new(config: BrokerConfig) -> Result<Self, BrokerError> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.total_timeout)
            .build()?;
        Ok(Self { http, config, circuit: None })
    }

    /// Attaches a circuit breaker that trips after sustained failure
    /// across calls, independent of this client's own per-call retry.
    #[must_use]
    pub fn with_circuit_breaker(mut self, circuit: Arc<CircuitBreaker>) -> Self {
        self.circuit = Some(circuit);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn send_with_retry<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response, BrokerError> {
        if let Some(circuit) = &self.circuit {
            if !circuit.is_call_permitted() {
                return Err(BrokerError::RetriesExhausted {
                    attempts: 0,
                });
            }
        }

        let mut backoff = Backoff::new(&self.config.retry);
        let result = self.send_with_retry_inner(method, path, body, &mut backoff).await;

        if let Some(circuit) = &self.circuit {
            match &result {
                Ok(_) => circuit.record_success(),
                Err(error) if error.is_retryable() => circuit.record_failure(),
                Err(_) => {}
            }
        }
        result
    }

    async fn send_with_retry_inner<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        backoff: &mut Backoff,
    ) -> Result<reqwest::Response, BrokerError> {
        loop {
            let mut request = self
                .http
                .request(method.clone(), self.url(path))
                .header("Authorization", format!("Bearer {}", self.config.api_key))
                .header("X-API-Key", &self.config.api_key);
            if let Some(body) = body {
                request = request.json(body);
            }

            let result = request.send().await;
            match result {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    let error = BrokerError::from_status(status.as_u16(), text);
                    if !error.is_retryable() {
                        return Err(error);
                    }
                    match backoff.next_delay() {
                        Some(delay) => {
                            tracing::warn!(path, status = %status, "broker request retrying");
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            return Err(BrokerError::RetriesExhausted {
                                attempts: self.config.retry.max_attempts,
                            });
                        }
                    }
                }
                Err(error) => {
                    if !error.is_timeout() && !error.is_connect() {
                        return Err(BrokerError::Request(error));
                    }
                    match backoff.next_delay() {
                        Some(delay) => {
                            tracing::warn!(path, %error, "broker request retrying after network error");
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            return Err(BrokerError::RetriesExhausted {
                                attempts: self.config.retry.max_attempts,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Places a new order.
    pub async fn place_order(
        &self,
        request: &PlaceOrderRequest,
    ) -> Result<PlaceOrderResponse, BrokerError> {
        let response = self
            .send_with_retry(Method::POST, "place_order", Some(request))
            .await?;
        Ok(response.json().await?)
    }

    /// Modifies an order's quantity, always to the current position
    /// quantity (never a delta).
    pub async fn modify_order_quantity(
        &self,
        order_id: &str,
        qty: rust_decimal::Decimal,
    ) -> Result<ModifyOrderResponse, BrokerError> {
        let request = ModifyOrderQuantityRequest {
            order_id: order_id.to_string(),
            qty,
        };
        let response = self
            .send_with_retry(Method::POST, "modify_order_quantity", Some(&request))
            .await?;
        Ok(response.json().await?)
    }

    /// Modifies an order's stop (and limit) price.
    pub async fn modify_order_stop_price(
        &self,
        order_id: &str,
        stop_price: rust_decimal::Decimal,
        limit_price: rust_decimal::Decimal,
    ) -> Result<ModifyOrderResponse, BrokerError> {
        let request = ModifyOrderStopPriceRequest {
            order_id: order_id.to_string(),
            stop_price,
            limit_price,
        };
        let response = self
            .send_with_retry(Method::POST, "modify_order_stop_price", Some(&request))
            .await?;
        Ok(response.json().await?)
    }

    /// Cancels an order.
    pub async fn cancel_order(&self, order_id: &str) -> Result<CancelOrderResponse, BrokerError> {
        let request = CancelOrderRequest {
            order_id: order_id.to_string(),
        };
        let response = self
            .send_with_retry(Method::POST, "cancel_order", Some(&request))
            .await?;
        Ok(response.json().await?)
    }

    /// Fetches the open-orders snapshot. A 404 is tolerated as "endpoint
    /// unavailable" and returns an empty snapshot rather than an error, per
    /// `spec.md` §4.1.
    pub async fn get_orders(&self) -> Result<Vec<OrderSnapshotRow>, BrokerError> {
        match self
            .send_with_retry::<()>(Method::GET, "orders", None)
            .await
        {
            Ok(response) => Ok(response.json().await?),
            Err(BrokerError::Permanent { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                tracing::info!("orders snapshot endpoint unavailable, relying on stream");
                Ok(Vec::new())
            }
            Err(error) => Err(error),
        }
    }

    /// Fetches the positions snapshot.
    pub async fn get_positions(&self) -> Result<Vec<PositionSnapshotRow>, BrokerError> {
        let response = self
            .send_with_retry::<()>(Method::GET, "positions", None)
            .await?;
        Ok(response.json().await?)
    }
}
