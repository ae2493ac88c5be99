//! Kitchen board sync engine.
//!
//! Maintains a live mirror of in-flight orders for the kitchen display.
//! A WebSocket feed delivers pushes; a REST snapshot seeds the board on
//! every connect and re-seeds it whenever the feed turns out to be
//! untrustworthy. The channel is advisory - REST is ground truth of last
//! resort, so a malformed frame costs one refetch, never a crash or a
//! silently corrupted board. Staff actions apply optimistically and a
//! failed authoritative call is rolled back by refetching, never by a
//! hand-rolled partial undo.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::OrderApi;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{
    BoardColumn, ConnectionPhase, ConnectionState, KitchenTicket, Order, OrderStatus,
};
use crate::projector;

/// Reconnect floor; never retry tighter than this.
const BACKOFF_FLOOR: Duration = Duration::from_secs(5);
/// Reconnect cap.
const BACKOFF_CAP: Duration = Duration::from_secs(300);
/// Consecutive failures after which the operator is told live updates are
/// paused. Reconnect attempts continue at the capped delay regardless;
/// REST-driven actions keep working throughout.
const PAUSED_ADVISORY_AFTER: u32 = 10;

/// Statuses mirrored on the board.
const BOARD_STATUSES: [OrderStatus; 3] = [
    OrderStatus::SentToKitchen,
    OrderStatus::Prepared,
    OrderStatus::Completed,
];

// ---------------------------------------------------------------------------
// Reconnect backoff
// ---------------------------------------------------------------------------

/// Backoff state for the reconnect loop. Pure - owns no timers, so tests
/// drive it by value.
#[derive(Debug, Clone, Default)]
pub struct Backoff {
    retry_count: u32,
}

impl Backoff {
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Register a failure and return the delay before the next attempt:
    /// `5s * 2^(n-1)` clamped to the cap.
    pub fn next_delay(&mut self) -> Duration {
        self.retry_count = self.retry_count.saturating_add(1);
        delay_for_attempt(self.retry_count)
    }

    /// Reset after an explicit, successful connect.
    pub fn reset(&mut self) {
        self.retry_count = 0;
    }
}

/// Delay for the nth consecutive failed attempt (1-based).
pub fn delay_for_attempt(attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    let delay = BACKOFF_FLOOR.saturating_mul(1u32 << shift);
    delay.clamp(BACKOFF_FLOOR, BACKOFF_CAP)
}

// ---------------------------------------------------------------------------
// Push frame shapes
// ---------------------------------------------------------------------------

/// The push feed's frame envelope. Every payload must be fully formed - a
/// complete order or order list - so it can be validated and applied
/// without cross-referencing state the feed may have dropped. Anything
/// else (including the legacy bare-delta update) fails decode and is
/// treated as a desync.
#[derive(Debug, Deserialize)]
struct PushFrame {
    #[serde(rename = "type")]
    kind: String,
    message: PushMessage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum PushMessage {
    Create { order: Order },
    Update { order: Order },
    List { orders: Vec<Order> },
}

fn decode_frame(text: &str) -> Result<PushMessage> {
    let frame: PushFrame = serde_json::from_str(text).map_err(|e| Error::ChannelDesync {
        detail: e.to_string(),
    })?;
    if frame.kind != "order_update" {
        return Err(Error::ChannelDesync {
            detail: format!("unexpected frame type '{}'", frame.kind),
        });
    }
    Ok(frame.message)
}

// ---------------------------------------------------------------------------
// Ticket board
// ---------------------------------------------------------------------------

/// The optimistic ticket cache, distinct from confirmed order truth. It is
/// rebuilt wholesale from any snapshot; per-frame application is keyed off
/// order ids with last-write-wins by snapshot timestamp.
#[derive(Debug, Default)]
pub struct TicketBoard {
    tickets: BTreeMap<i64, KitchenTicket>,
}

impl TicketBoard {
    /// Rebuild the whole board from an authoritative snapshot.
    pub fn seed(&mut self, orders: &[Order]) {
        self.tickets = orders
            .iter()
            .filter(|o| o.status.is_in_flight())
            .map(|o| (o.id, projector::ticket_from_order(o)))
            .collect();
    }

    /// Apply one full-order push. Returns true when the board changed.
    ///
    /// A frame older than the held ticket (by `updated_at`) is ignored -
    /// push delivery is not ordered relative to REST responses, so the
    /// newest snapshot timestamp wins regardless of arrival order.
    pub fn apply_order(&mut self, order: &Order) -> bool {
        if let Some(existing) = self.tickets.get(&order.id) {
            if let (Some(held), Some(incoming)) = (existing.updated_at, order.updated_at) {
                if incoming < held {
                    debug!(order_id = order.id, "ignoring stale push frame");
                    return false;
                }
            }
        }
        if order.status.is_in_flight() {
            self.tickets
                .insert(order.id, projector::ticket_from_order(order));
        } else {
            // Cancelled or back to draft: off the board.
            if self.tickets.remove(&order.id).is_none() {
                return false;
            }
        }
        true
    }

    pub fn get(&self, order_id: i64) -> Option<&KitchenTicket> {
        self.tickets.get(&order_id)
    }

    /// All tickets, oldest first.
    pub fn tickets(&self) -> Vec<KitchenTicket> {
        let mut all: Vec<KitchenTicket> = self.tickets.values().cloned().collect();
        projector::sort_board(&mut all);
        all
    }

    /// Tickets in one column, oldest first.
    pub fn column(&self, column: BoardColumn) -> Vec<KitchenTicket> {
        let mut lane: Vec<KitchenTicket> = self
            .tickets
            .values()
            .filter(|t| t.column == column)
            .cloned()
            .collect();
        projector::sort_board(&mut lane);
        lane
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Sync engine
// ---------------------------------------------------------------------------

/// Notifications surfaced to the host UI.
#[derive(Debug, Clone, PartialEq)]
pub enum KitchenEvent {
    Connected,
    Disconnected { error: Option<String> },
    /// Advisory only: reconnects keep failing, REST still works.
    LiveUpdatesPaused,
    BoardChanged,
}

/// The kitchen sync engine. Owns the connection state, the backoff, and
/// the ticket board; everything else reaches it through method calls on
/// the host's event loop.
pub struct KitchenSync {
    api: Arc<dyn OrderApi>,
    board: TicketBoard,
    conn: ConnectionState,
    backoff: Backoff,
    events: mpsc::UnboundedSender<KitchenEvent>,
    /// Pending reconnect timer, cancelled by a manual refresh so a manual
    /// fetch and a timed reconnect never run concurrently.
    reconnect_timer: Option<CancellationToken>,
}

impl KitchenSync {
    pub fn new(api: Arc<dyn OrderApi>, events: mpsc::UnboundedSender<KitchenEvent>) -> Self {
        Self {
            api,
            board: TicketBoard::default(),
            conn: ConnectionState::default(),
            backoff: Backoff::default(),
            events,
            reconnect_timer: None,
        }
    }

    pub fn board(&self) -> &TicketBoard {
        &self.board
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.conn
    }

    fn emit(&self, event: KitchenEvent) {
        let _ = self.events.send(event);
    }

    /// Fetch an authoritative snapshot and rebuild the board from it.
    pub async fn snapshot_refetch(&mut self) -> Result<()> {
        let orders = self.api.list_orders(&BOARD_STATUSES).await?;
        self.board.seed(&orders);
        self.emit(KitchenEvent::BoardChanged);
        debug!(tickets = self.board.len(), "board reseeded from snapshot");
        Ok(())
    }

    /// Manual refresh: cancel any pending backoff timer, then fetch.
    pub async fn refresh(&mut self) -> Result<()> {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.cancel();
        }
        self.snapshot_refetch().await
    }

    /// Apply one inbound push frame.
    ///
    /// A frame that does not decode into a known, fully-formed shape is
    /// discarded and answered with a snapshot refetch; the desync is only
    /// surfaced if that refetch itself fails.
    pub async fn handle_frame(&mut self, text: &str) -> Result<()> {
        let message = match decode_frame(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "malformed push frame; falling back to snapshot");
                return self.snapshot_refetch().await;
            }
        };

        let changed = match message {
            PushMessage::Create { order } | PushMessage::Update { order } => {
                self.board.apply_order(&order)
            }
            PushMessage::List { orders } => {
                self.board.seed(&orders);
                true
            }
        };
        if changed {
            self.emit(KitchenEvent::BoardChanged);
        }
        Ok(())
    }

    /// Drag a ticket to a column.
    ///
    /// Applies the projected state optimistically, then issues the
    /// authoritative status call. On failure the optimistic change is
    /// thrown away wholesale by refetching a snapshot.
    pub async fn move_ticket(&mut self, order_id: i64, column: BoardColumn) -> Result<()> {
        let Some(ticket) = self.board.tickets.get_mut(&order_id) else {
            // Acting on a vanished ticket means the board is stale.
            warn!(order_id, "move on unknown ticket; resyncing");
            return self.snapshot_refetch().await;
        };

        ticket.column = column;
        if let Some(completed) = projector::completion_for_column(column) {
            for item in &mut ticket.items {
                item.completed = completed;
            }
        }
        let total = ticket.items.len();
        self.emit(KitchenEvent::BoardChanged);

        let status = projector::status_for_column(column, total);
        self.confirm_or_rollback(order_id, status).await
    }

    /// Tap one ticket item, toggling its completion. The aggregate status
    /// is recomputed from the new per-line state - the same function the
    /// column-move path uses.
    pub async fn toggle_item(&mut self, order_id: i64, item_index: usize) -> Result<()> {
        let Some(ticket) = self.board.tickets.get_mut(&order_id) else {
            warn!(order_id, "tap on unknown ticket; resyncing");
            return self.snapshot_refetch().await;
        };
        let Some(item) = ticket.items.get_mut(item_index) else {
            return Err(Error::LineNotFound { index: item_index });
        };

        item.completed = !item.completed;
        let total = ticket.items.len();
        let completed = ticket.items.iter().filter(|i| i.completed).count();
        let status = projector::status_for_completion(completed, total);
        ticket.column = projector::column_for_status(status);
        self.emit(KitchenEvent::BoardChanged);

        self.confirm_or_rollback(order_id, status).await
    }

    async fn confirm_or_rollback(&mut self, order_id: i64, status: OrderStatus) -> Result<()> {
        match self.api.set_order_status(order_id, status).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(order_id, error = %e, "status update failed; discarding optimistic change");
                self.snapshot_refetch().await?;
                Err(e)
            }
        }
    }

    // -- connection lifecycle, driven by the feed pump --------------------

    fn channel_connecting(&mut self) {
        self.conn.phase = ConnectionPhase::Connecting;
    }

    async fn channel_connected(&mut self) {
        self.conn.phase = ConnectionPhase::Connected;
        self.conn.retry_count = 0;
        self.conn.last_error = None;
        self.backoff.reset();
        self.reconnect_timer = None;
        info!("kitchen feed connected");
        self.emit(KitchenEvent::Connected);
        if let Err(e) = self.snapshot_refetch().await {
            warn!(error = %e, "initial snapshot after connect failed");
        }
    }

    /// Record a disconnect and schedule the next attempt. Returns the
    /// backoff delay and a token the pump must honor so a manual refresh
    /// can cut the wait short.
    fn channel_disconnected(&mut self, error: Option<String>) -> (Duration, CancellationToken) {
        let delay = self.backoff.next_delay();
        self.conn.phase = ConnectionPhase::Disconnected;
        self.conn.retry_count = self.backoff.retry_count();
        self.conn.last_error = error.clone();
        warn!(
            retry_count = self.conn.retry_count,
            delay_secs = delay.as_secs(),
            error = error.as_deref().unwrap_or("closed"),
            "kitchen feed disconnected"
        );
        self.emit(KitchenEvent::Disconnected { error });
        if self.conn.retry_count == PAUSED_ADVISORY_AFTER {
            self.emit(KitchenEvent::LiveUpdatesPaused);
        }
        let timer = CancellationToken::new();
        self.reconnect_timer = Some(timer.clone());
        (delay, timer)
    }
}

// ---------------------------------------------------------------------------
// Feed pump
// ---------------------------------------------------------------------------

/// Run the push-channel pump until `shutdown` fires.
///
/// Connects to the kitchen feed, hands every text frame to the engine, and
/// reconnects with backoff on any error or close. The engine lock is held
/// only per frame, so REST-driven engine calls interleave freely.
pub async fn run_feed(
    engine: Arc<tokio::sync::Mutex<KitchenSync>>,
    config: Config,
    shutdown: CancellationToken,
) {
    let ws_url = config.ws_url();
    loop {
        engine.lock().await.channel_connecting();

        let error = match connect_async(ws_url.as_str()).await {
            Ok((stream, _)) => {
                engine.lock().await.channel_connected().await;
                let (mut write, mut read) = stream.split();
                let mut error = None;
                loop {
                    tokio::select! {
                        frame = read.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                let _ = engine.lock().await.handle_frame(&text).await;
                            }
                            Some(Ok(Message::Ping(data))) => {
                                let _ = write.send(Message::Pong(data)).await;
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error = Some(e.to_string());
                                break;
                            }
                        },
                        _ = shutdown.cancelled() => return,
                    }
                }
                error
            }
            Err(e) => Some(e.to_string()),
        };

        let (delay, timer) = engine.lock().await.channel_disconnected(error);
        tokio::select! {
            _ = sleep(delay) => {}
            _ = timer.cancelled() => {
                debug!("reconnect backoff cut short by manual refresh");
            }
            _ = shutdown.cancelled() => return,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
