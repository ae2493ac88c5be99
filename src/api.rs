//! Order service API client.
//!
//! All REST traffic goes through here: order creation, line appends, status
//! transitions, snapshot listings, and payment session/verification calls.
//! Responses decode in one validating step; the engine never sees raw JSON.
//! The `OrderApi` trait is the seam the pipeline, payment orchestrator, and
//! kitchen sync engine depend on, so tests swap in an in-memory double.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{Order, OrderStatus, OrderType};

// ---------------------------------------------------------------------------
// Request/response shapes
// ---------------------------------------------------------------------------

/// Body of a create-order call.
#[derive(Debug, Clone, Serialize)]
pub struct NewOrder {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<i64>,
    pub order_type: OrderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
}

/// Acknowledgement of a created order.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderCreated {
    pub id: i64,
    #[serde(default)]
    pub order_number: Option<String>,
    pub status: OrderStatus,
}

/// Body of an add-order-line call. `client_ref` is a client-generated
/// idempotency key: retrying an already-acknowledged line is a server
/// no-op keyed on it.
#[derive(Debug, Clone, Serialize)]
pub struct NewOrderLine {
    pub product: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<i64>,
    pub quantity: u32,
    pub unit_price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub client_ref: String,
}

/// Acknowledgement of a persisted order line.
#[derive(Debug, Clone, Deserialize)]
pub struct LineAck {
    pub id: i64,
}

/// Acknowledgement of a status transition.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusAck {
    pub id: i64,
    pub status: OrderStatus,
}

/// A payment session minted by the gateway for one order.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentSession {
    pub session_token: String,
    pub provider_order_id: String,
}

/// Callback fields forwarded for server-side signature verification.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyPayment {
    pub provider_order_id: String,
    pub provider_payment_id: String,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
struct VerifyResult {
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderListPage {
    orders: Vec<Order>,
}

// ---------------------------------------------------------------------------
// Contract trait
// ---------------------------------------------------------------------------

/// The REST contract the engine consumes. Implemented by [`ApiClient`] in
/// production and by in-memory doubles in tests.
#[async_trait]
pub trait OrderApi: Send + Sync {
    async fn create_order(&self, order: &NewOrder) -> Result<OrderCreated>;
    async fn add_order_line(&self, order_id: i64, line: &NewOrderLine) -> Result<LineAck>;
    async fn set_order_status(&self, order_id: i64, status: OrderStatus) -> Result<StatusAck>;
    async fn list_orders(&self, statuses: &[OrderStatus]) -> Result<Vec<Order>>;
    async fn create_payment_session(&self, order_id: i64, amount: f64) -> Result<PaymentSession>;
    async fn verify_payment(&self, verify: &VerifyPayment) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(origin: &str, err: &reqwest::Error) -> Error {
    let message = if err.is_connect() {
        format!("Cannot reach order service at {origin}")
    } else if err.is_timeout() {
        format!("Connection to {origin} timed out")
    } else if err.is_builder() {
        format!("Invalid order service URL: {origin}")
    } else {
        format!("Network error communicating with {origin}: {err}")
    };
    Error::Http { message }
}

/// Convert an HTTP status code into a user-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "Session is invalid or expired".to_string(),
        403 => "Not authorized for this operation".to_string(),
        404 => "Order service endpoint not found".to_string(),
        s if s >= 500 => format!("Order service error (HTTP {s})"),
        s => format!("Unexpected response from order service (HTTP {s})"),
    }
}

/// Unwrap the `{status, message, data}` envelope some endpoints use;
/// bare payloads pass through untouched.
fn unwrap_envelope(body: Value) -> Value {
    match body {
        Value::Object(ref map) if map.contains_key("data") => {
            body.get("data").cloned().unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn decode<T: DeserializeOwned>(body: Value) -> Result<T> {
    serde_json::from_value(unwrap_envelope(body)).map_err(|e| Error::Decode {
        message: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// Production `OrderApi` backed by reqwest.
pub struct ApiClient {
    client: Client,
    origin: String,
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Http {
                message: format!("Failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            origin: config.api_origin().to_string(),
        })
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &impl Serialize) -> Result<T> {
        let url = format!("{}{path}", self.origin);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| friendly_error(&self.origin, &e))?;
        self.read_json(resp).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{path}", self.origin);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| friendly_error(&self.origin, &e))?;
        self.read_json(resp).await
    }

    async fn read_json<T: DeserializeOwned>(&self, resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            // Prefer the server's own message when the body is decodable.
            let message = serde_json::from_str::<Value>(&body_text)
                .ok()
                .and_then(|json| {
                    json.get("message")
                        .or_else(|| json.get("error"))
                        .and_then(Value::as_str)
                        .map(|s| s.to_string())
                })
                .unwrap_or_else(|| status_error(status));
            warn!(%status, %message, "order service call failed");
            return Err(Error::Http {
                message: format!("{message} (HTTP {})", status.as_u16()),
            });
        }

        let body: Value = serde_json::from_str(&body_text).map_err(|e| Error::Decode {
            message: e.to_string(),
        })?;
        decode(body)
    }
}

#[async_trait]
impl OrderApi for ApiClient {
    async fn create_order(&self, order: &NewOrder) -> Result<OrderCreated> {
        debug!(table = ?order.table, "creating order");
        self.post("/api/orders/", order).await
    }

    async fn add_order_line(&self, order_id: i64, line: &NewOrderLine) -> Result<LineAck> {
        self.post(&format!("/api/orders/{order_id}/lines/"), line)
            .await
    }

    async fn set_order_status(&self, order_id: i64, status: OrderStatus) -> Result<StatusAck> {
        let body = serde_json::json!({ "status": status.as_wire() });
        self.post(&format!("/api/orders/{order_id}/status/"), &body)
            .await
    }

    async fn list_orders(&self, statuses: &[OrderStatus]) -> Result<Vec<Order>> {
        let filter = statuses
            .iter()
            .map(|s| s.as_wire())
            .collect::<Vec<_>>()
            .join(",");
        let page: OrderListPage = self.get(&format!("/api/orders/?status={filter}")).await?;
        Ok(page.orders)
    }

    async fn create_payment_session(&self, order_id: i64, amount: f64) -> Result<PaymentSession> {
        let body = serde_json::json!({ "order": order_id, "amount": amount });
        self.post("/api/payments/sessions/", &body).await
    }

    async fn verify_payment(&self, verify: &VerifyPayment) -> Result<bool> {
        let result: VerifyResult = self.post("/api/payments/verify/", verify).await?;
        if !result.success {
            return Err(Error::PaymentVerificationFailure {
                reason: result
                    .message
                    .unwrap_or_else(|| "gateway rejected the payment".to_string()),
            });
        }
        Ok(true)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
