//! Wire and projection types for the order lifecycle.
//!
//! Everything crossing the network boundary decodes into these types in a
//! single validating step; engine logic never touches raw JSON. The server
//! is the source of truth for `Order`; `KitchenTicket` is a read-mostly
//! projection rebuildable at any time from a full order snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Order status vocabulary
// ---------------------------------------------------------------------------

/// Server-side order status.
///
/// The wire vocabulary is `draft`, `sent_to_kitchen`, `prepared`,
/// `completed`, `cancelled`. Legacy feeds also emit `preparing` and
/// `ready`, accepted as aliases. Anything else decodes to `Unknown`,
/// which the projector sends to the `to_cook` column so an odd order
/// lands where staff will look at it rather than where it gets ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Draft,
    SentToKitchen,
    Prepared,
    Completed,
    Cancelled,
    Unknown,
}

impl OrderStatus {
    /// Decode a wire value. Total: every input maps to a status.
    pub fn from_wire(value: &str) -> Self {
        match value {
            "draft" => OrderStatus::Draft,
            "sent_to_kitchen" => OrderStatus::SentToKitchen,
            "prepared" | "preparing" => OrderStatus::Prepared,
            "completed" | "ready" => OrderStatus::Completed,
            "cancelled" => OrderStatus::Cancelled,
            _ => OrderStatus::Unknown,
        }
    }

    /// The string sent on `set-order-status` calls. `Unknown` is never
    /// sent; it only exists on the decode side.
    pub fn as_wire(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::SentToKitchen => "sent_to_kitchen",
            OrderStatus::Prepared => "prepared",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Unknown => "unknown",
        }
    }

    /// Statuses the kitchen board tracks.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            OrderStatus::SentToKitchen | OrderStatus::Prepared | OrderStatus::Completed
        )
    }
}

impl Serialize for OrderStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_wire())
    }
}

impl<'de> Deserialize<'de> for OrderStatus {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(OrderStatus::from_wire(&value))
    }
}

/// Per-line preparation status. Lines are either still pending or ready;
/// anything else on the wire (the legacy `preparing`, or a value from a
/// newer server) counts as not yet ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineStatus {
    #[default]
    Pending,
    Ready,
}

impl Serialize for LineStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(match self {
            LineStatus::Pending => "pending",
            LineStatus::Ready => "ready",
        })
    }
}

impl<'de> Deserialize<'de> for LineStatus {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(match value.as_str() {
            "ready" => LineStatus::Ready,
            _ => LineStatus::Pending,
        })
    }
}

/// Order channel, carried through from the cashier session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    #[default]
    DineIn,
    Takeaway,
}

// ---------------------------------------------------------------------------
// Server-confirmed records
// ---------------------------------------------------------------------------

/// A server-confirmed order line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: i64,
    pub product: i64,
    #[serde(default)]
    pub variant: Option<i64>,
    pub quantity: u32,
    pub unit_price: f64,
    #[serde(default)]
    pub tax_rate: f64,
    #[serde(default)]
    pub tax_amount: f64,
    #[serde(default)]
    pub total_price: f64,
    #[serde(default)]
    pub status: LineStatus,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// The server-authoritative order record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    #[serde(default)]
    pub order_number: Option<String>,
    pub status: OrderStatus,
    #[serde(default)]
    pub order_type: OrderType,
    #[serde(default)]
    pub table: Option<i64>,
    #[serde(default)]
    pub table_number: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub lines: Vec<OrderLine>,
    #[serde(default)]
    pub subtotal: f64,
    #[serde(default)]
    pub tax_amount: f64,
    #[serde(default)]
    pub total_amount: f64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Count of lines marked ready.
    pub fn completed_lines(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| l.status == LineStatus::Ready)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Kitchen board projection
// ---------------------------------------------------------------------------

/// One of the three kitchen-board lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardColumn {
    ToCook,
    Preparing,
    Ready,
}

/// A single item row on a kitchen ticket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TicketItem {
    pub name: String,
    pub qty: u32,
    pub completed: bool,
}

/// Client-side projection of an order for kitchen-board display.
/// Never the source of truth; rebuilt from snapshots at any time.
#[derive(Debug, Clone, Serialize)]
pub struct KitchenTicket {
    pub order_id: i64,
    pub display_id: String,
    pub table_label: String,
    pub items: Vec<TicketItem>,
    pub column: BoardColumn,
    pub received_at: DateTime<Utc>,
    /// Server snapshot timestamp used for last-write-wins reconciliation.
    pub updated_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// Lifecycle phase of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Push-channel connection state, owned by the kitchen sync engine.
/// Reset only on an explicit, successful connect.
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

// ---------------------------------------------------------------------------
// Display helpers
// ---------------------------------------------------------------------------

/// Round to cents for display. Intermediate math stays unrounded; this is
/// applied only at the presentation edge.
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

// ===========================================================================
// Tests
// ===========================================================================
