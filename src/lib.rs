//! Cafe POS - order lifecycle synchronization engine.
//!
//! The shared core behind the cashier terminal, the kitchen display, and
//! the customer-facing payment flow: cart building with pricing/tax math,
//! idempotent order submission, payment orchestration against an external
//! checkout widget, and a kitchen board kept live over an unreliable push
//! channel with REST snapshots as ground truth.
//!
//! The host UI owns the event loop; this crate owns the state machines.
//! A typical wiring:
//!
//! - one [`cart::Cart`] + [`pipeline::SubmissionPipeline`] +
//!   [`payment::PaymentOrchestrator`] per cashier session,
//! - one [`kitchen::KitchenSync`] per kitchen display, fed by
//!   [`kitchen::run_feed`] on a background task.

pub mod api;
pub mod cart;
pub mod config;
pub mod error;
pub mod kitchen;
pub mod models;
pub mod payment;
pub mod pipeline;
pub mod projector;

#[cfg(test)]
mod testutil;

pub use api::{
    ApiClient, LineAck, NewOrder, NewOrderLine, OrderApi, OrderCreated, PaymentSession, StatusAck,
    VerifyPayment,
};
pub use cart::{Cart, CartLine, Product, Totals, Variant};
pub use config::Config;
pub use error::{Error, Result};
pub use kitchen::{run_feed, Backoff, KitchenEvent, KitchenSync, TicketBoard};
pub use models::{
    round_cents, BoardColumn, ConnectionPhase, ConnectionState, KitchenTicket, LineStatus, Order,
    OrderLine, OrderStatus, OrderType, TicketItem,
};
pub use payment::{PaymentOrchestrator, PaymentPhase, WidgetOutcome, WidgetRequest};
pub use pipeline::{PipelineState, SubmissionPipeline};
pub use projector::{
    column_for_status, completion_for_column, status_for_column, status_for_completion,
    ticket_from_order,
};
