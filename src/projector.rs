//! Status projection between the server vocabulary and the kitchen board.
//!
//! Pure functions only - no I/O, no side effects. The same mapping runs in
//! both directions so client-predicted state and server-confirmed state can
//! be diffed during reconciliation, and a drag-and-drop column move yields
//! exactly the state a matching set of item taps would.

use chrono::Utc;

use crate::models::{BoardColumn, KitchenTicket, Order, OrderStatus, TicketItem};

// ---------------------------------------------------------------------------
// Status <-> column
// ---------------------------------------------------------------------------

/// Map an order status to its board column. Unrecognized statuses land in
/// `to_cook` - fail-safe toward "needs attention" rather than "done".
pub fn column_for_status(status: OrderStatus) -> BoardColumn {
    match status {
        OrderStatus::Prepared => BoardColumn::Preparing,
        OrderStatus::Completed => BoardColumn::Ready,
        OrderStatus::SentToKitchen
        | OrderStatus::Draft
        | OrderStatus::Cancelled
        | OrderStatus::Unknown => BoardColumn::ToCook,
    }
}

/// Aggregate order status from per-line completion counts.
///
/// Let `n` be total lines and `k` completed lines:
/// k == 0 -> sent_to_kitchen; 0 < k < n -> prepared; k == n (n > 0) ->
/// completed. An empty ticket (n == 0) is defined as sent_to_kitchen.
pub fn status_for_completion(completed: usize, total: usize) -> OrderStatus {
    if total == 0 || completed == 0 {
        OrderStatus::SentToKitchen
    } else if completed < total {
        OrderStatus::Prepared
    } else {
        OrderStatus::Completed
    }
}

/// Per-line completion implied by a column move.
///
/// `to_cook` un-completes every item, `ready` completes every item,
/// `preparing` leaves per-line state untouched (`None`) - the aggregate
/// alone becomes `prepared`.
pub fn completion_for_column(column: BoardColumn) -> Option<bool> {
    match column {
        BoardColumn::ToCook => Some(false),
        BoardColumn::Ready => Some(true),
        BoardColumn::Preparing => None,
    }
}

/// Aggregate status a column move targets, applied identically to the
/// per-line recomputation path.
pub fn status_for_column(column: BoardColumn, total_lines: usize) -> OrderStatus {
    match completion_for_column(column) {
        Some(true) => status_for_completion(total_lines, total_lines),
        Some(false) => status_for_completion(0, total_lines),
        None => OrderStatus::Prepared,
    }
}

// ---------------------------------------------------------------------------
// Ticket projection
// ---------------------------------------------------------------------------

/// Build a kitchen ticket from a full order snapshot.
pub fn ticket_from_order(order: &Order) -> KitchenTicket {
    let items = order
        .lines
        .iter()
        .map(|line| TicketItem {
            name: line
                .product_name
                .clone()
                .unwrap_or_else(|| format!("Item #{}", line.product)),
            qty: line.quantity,
            completed: line.status == crate::models::LineStatus::Ready,
        })
        .collect();

    let table_label = order
        .table_number
        .clone()
        .or_else(|| order.table.map(|t| format!("T-{t}")))
        .unwrap_or_else(|| "Takeaway".to_string());

    KitchenTicket {
        order_id: order.id,
        display_id: order
            .order_number
            .clone()
            .unwrap_or_else(|| format!("#{}", order.id)),
        table_label,
        items,
        column: column_for_status(order.status),
        received_at: order.created_at.unwrap_or_else(Utc::now),
        updated_at: order.updated_at,
    }
}

/// Board ordering: oldest ticket first within a column.
pub fn sort_board(tickets: &mut [KitchenTicket]) {
    tickets.sort_by_key(|t| t.received_at);
}

// ===========================================================================
// Tests
// ===========================================================================
