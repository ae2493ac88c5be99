//! Order submission pipeline.
//!
//! Turns a cart into a persisted order plus order lines against the order
//! service, one state machine per cart session:
//! `NO_ORDER -> ORDER_CREATED -> LINES_SYNCED -> DISPATCHED`.
//! Creation is idempotent while an order id is held, line syncs send only
//! the unacknowledged delta, and dispatch fails closed while any line is
//! outstanding. The held order id is mutated only here; the payment
//! orchestrator reads it through this type, never directly.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::{NewOrder, NewOrderLine, OrderApi, StatusAck};
use crate::cart::Cart;
use crate::error::{Error, Result};
use crate::models::{OrderStatus, OrderType};

/// Submission progress for a single cart session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    NoOrder,
    OrderCreated,
    LinesSynced,
    Dispatched,
}

/// Per-cart-session submission pipeline. Owns the single "current order
/// id"; a fresh cycle starts after dispatch or cancellation.
pub struct SubmissionPipeline {
    api: Arc<dyn OrderApi>,
    state: PipelineState,
    order_id: Option<i64>,
    order_number: Option<String>,
    order_type: OrderType,
    /// Cart line indices acknowledged by the server. Only the complement
    /// is ever (re)sent.
    synced: HashSet<usize>,
    /// Stable idempotency key per cart line index, generated once and
    /// reused on retries so the server deduplicates.
    line_refs: HashMap<usize, String>,
}

impl SubmissionPipeline {
    pub fn new(api: Arc<dyn OrderApi>) -> Self {
        Self::with_order_type(api, OrderType::DineIn)
    }

    pub fn with_order_type(api: Arc<dyn OrderApi>, order_type: OrderType) -> Self {
        Self {
            api,
            state: PipelineState::NoOrder,
            order_id: None,
            order_number: None,
            order_type,
            synced: HashSet::new(),
            line_refs: HashMap::new(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// The held order id, if a cycle is in flight.
    pub fn current_order_id(&self) -> Option<i64> {
        self.order_id
    }

    pub fn current_order_number(&self) -> Option<&str> {
        self.order_number.as_deref()
    }

    /// Create the remote order if none is held. Idempotent: while an id is
    /// held, repeated calls return it without another create - a retried
    /// double-submission never produces a duplicate order.
    pub async fn ensure_order(&mut self, table: Option<i64>) -> Result<i64> {
        if let Some(id) = self.order_id {
            return Ok(id);
        }
        if table.is_none() && self.order_type == OrderType::DineIn {
            return Err(Error::NoTable);
        }

        let created = self
            .api
            .create_order(&NewOrder {
                table,
                order_type: self.order_type,
                customer_name: None,
                customer_phone: None,
            })
            .await?;
        info!(
            order_id = created.id,
            order_number = created.order_number.as_deref().unwrap_or(""),
            "order created"
        );
        self.order_id = Some(created.id);
        self.order_number = created.order_number;
        self.state = PipelineState::OrderCreated;
        self.synced.clear();
        self.line_refs.clear();
        Ok(created.id)
    }

    /// Push the unsynced delta of cart lines to the held order.
    ///
    /// Calls are issued concurrently; each is individually idempotent via
    /// its `client_ref`, so ordering between them does not matter. Failure
    /// of one line never aborts the others - the result is either `Ok` or
    /// `PartialSyncFailure` listing exactly the indices still unsynced.
    pub async fn sync_lines(&mut self, cart: &Cart) -> Result<()> {
        let order_id = self.order_id.ok_or(Error::NoActiveOrder)?;

        let pending: Vec<usize> = (0..cart.lines().len())
            .filter(|i| !self.synced.contains(i))
            .collect();
        if pending.is_empty() {
            self.state = PipelineState::LinesSynced;
            return Ok(());
        }

        let mut calls = Vec::with_capacity(pending.len());
        for &index in &pending {
            let line = &cart.lines()[index];
            let client_ref = self
                .line_refs
                .entry(index)
                .or_insert_with(|| Uuid::new_v4().to_string())
                .clone();
            let body = NewOrderLine {
                product: line.product_id,
                variant: line.variant_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
                notes: line.note.clone(),
                client_ref,
            };
            let api = Arc::clone(&self.api);
            calls.push(async move { (index, api.add_order_line(order_id, &body).await) });
        }

        let mut failed = Vec::new();
        for (index, result) in join_all(calls).await {
            match result {
                Ok(_) => {
                    self.synced.insert(index);
                }
                Err(e) => {
                    warn!(order_id, index, error = %e, "order line sync failed");
                    failed.push(index);
                }
            }
        }

        if failed.is_empty() {
            self.state = PipelineState::LinesSynced;
            Ok(())
        } else {
            failed.sort_unstable();
            Err(Error::PartialSyncFailure { failed })
        }
    }

    /// Indices of cart lines not yet acknowledged by the server.
    pub fn unsynced_lines(&self, cart: &Cart) -> Vec<usize> {
        (0..cart.lines().len())
            .filter(|i| !self.synced.contains(i))
            .collect()
    }

    /// Transition the held order to `sent_to_kitchen`.
    ///
    /// Fails closed: refused with `IncompleteOrder` while any cart line is
    /// unsynced - a partial order is never silently dispatched. On success
    /// the cart is cleared and the order id released, starting a fresh
    /// `NO_ORDER` cycle.
    pub async fn dispatch(&mut self, cart: &mut Cart) -> Result<StatusAck> {
        let order_id = self.order_id.ok_or(Error::NoActiveOrder)?;
        if cart.is_empty() && self.synced.is_empty() {
            return Err(Error::EmptyCart);
        }
        let unsynced = self.unsynced_lines(cart);
        if !unsynced.is_empty() {
            return Err(Error::IncompleteOrder { unsynced });
        }

        let ack = self
            .api
            .set_order_status(order_id, OrderStatus::SentToKitchen)
            .await?;
        info!(order_id, "order dispatched to kitchen");

        cart.clear_after_submission();
        self.release();
        self.state = PipelineState::Dispatched;
        Ok(ack)
    }

    /// Cancel the held order. The cart is left intact so the operator can
    /// resubmit the same items against a new order.
    pub async fn cancel(&mut self) -> Result<StatusAck> {
        let order_id = self.order_id.ok_or(Error::NoActiveOrder)?;
        let ack = self
            .api
            .set_order_status(order_id, OrderStatus::Cancelled)
            .await?;
        info!(order_id, "order cancelled");
        self.release();
        self.state = PipelineState::NoOrder;
        Ok(ack)
    }

    fn release(&mut self) {
        self.order_id = None;
        self.order_number = None;
        self.synced.clear();
        self.line_refs.clear();
    }
}

// ===========================================================================
// Tests
// ===========================================================================
