//! In-memory `OrderApi` double shared by the pipeline, payment, and
//! kitchen tests. Behaves like the real order service: add-line calls are
//! idempotent on `client_ref`, status transitions mutate held orders, and
//! individual endpoints can be told to fail to exercise error paths.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::api::{
    LineAck, NewOrder, NewOrderLine, OrderApi, OrderCreated, PaymentSession, StatusAck,
    VerifyPayment,
};
use crate::error::{Error, Result};
use crate::models::{Order, OrderStatus};

/// Install a subscriber once so `RUST_LOG=debug cargo test` shows engine
/// traces.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
pub struct MockState {
    next_order_id: i64,
    next_line_id: i64,
    pub created: Vec<i64>,
    pub orders: HashMap<i64, Order>,
    pub line_calls: Vec<(i64, NewOrderLine)>,
    pub status_calls: Vec<(i64, OrderStatus)>,
    pub fail_products: HashSet<i64>,
    pub fail_status: bool,
    pub fail_list: bool,
    pub sessions_created: u32,
    pub verify_success: bool,
    pub list_calls: u32,
}

pub struct MockApi {
    state: Mutex<MockState>,
}

impl MockApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_order_id: 100,
                next_line_id: 1,
                verify_success: true,
                ..Default::default()
            }),
        }
    }

    pub fn with_orders(orders: Vec<Order>) -> Self {
        let mock = Self::new();
        {
            let mut state = mock.state();
            for order in orders {
                state.orders.insert(order.id, order);
            }
        }
        mock
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl OrderApi for MockApi {
    async fn create_order(&self, order: &NewOrder) -> Result<OrderCreated> {
        let mut state = self.state();
        state.next_order_id += 1;
        let id = state.next_order_id;
        state.created.push(id);
        state.orders.insert(
            id,
            Order {
                id,
                order_number: Some(format!("ORD-20250601-{id:04}")),
                status: OrderStatus::Draft,
                order_type: order.order_type,
                table: order.table,
                table_number: order.table.map(|t| format!("T-{t}")),
                customer_name: order.customer_name.clone(),
                customer_phone: order.customer_phone.clone(),
                lines: vec![],
                subtotal: 0.0,
                tax_amount: 0.0,
                total_amount: 0.0,
                created_at: Some(Utc::now()),
                updated_at: Some(Utc::now()),
            },
        );
        Ok(OrderCreated {
            id,
            order_number: Some(format!("ORD-20250601-{id:04}")),
            status: OrderStatus::Draft,
        })
    }

    async fn add_order_line(&self, order_id: i64, line: &NewOrderLine) -> Result<LineAck> {
        let mut state = self.state();
        if state.fail_products.contains(&line.product) {
            return Err(Error::Http {
                message: format!("line for product {} failed", line.product),
            });
        }
        // Idempotent on client_ref, like the real service.
        let duplicate = state
            .line_calls
            .iter()
            .any(|(oid, l)| *oid == order_id && l.client_ref == line.client_ref);
        state.line_calls.push((order_id, line.clone()));
        if duplicate {
            return Ok(LineAck { id: 0 });
        }
        state.next_line_id += 1;
        let id = state.next_line_id;
        Ok(LineAck { id })
    }

    async fn set_order_status(&self, order_id: i64, status: OrderStatus) -> Result<StatusAck> {
        let mut state = self.state();
        if state.fail_status {
            return Err(Error::Http {
                message: "status update failed".into(),
            });
        }
        state.status_calls.push((order_id, status));
        if let Some(order) = state.orders.get_mut(&order_id) {
            order.status = status;
            order.updated_at = Some(Utc::now());
        }
        Ok(StatusAck {
            id: order_id,
            status,
        })
    }

    async fn list_orders(&self, statuses: &[OrderStatus]) -> Result<Vec<Order>> {
        let mut state = self.state();
        state.list_calls += 1;
        if state.fail_list {
            return Err(Error::Http {
                message: "snapshot fetch failed".into(),
            });
        }
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| statuses.contains(&o.status))
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.id);
        Ok(orders)
    }

    async fn create_payment_session(&self, _order_id: i64, _amount: f64) -> Result<PaymentSession> {
        let mut state = self.state();
        state.sessions_created += 1;
        let n = state.sessions_created;
        Ok(PaymentSession {
            session_token: format!("sess_{n}"),
            provider_order_id: format!("prov_order_{n}"),
        })
    }

    async fn verify_payment(&self, _verify: &VerifyPayment) -> Result<bool> {
        let state = self.state();
        if state.verify_success {
            Ok(true)
        } else {
            Err(Error::PaymentVerificationFailure {
                reason: "signature mismatch".into(),
            })
        }
    }
}
