//! Payment orchestration.
//!
//! Drives the external checkout widget: mint (or reuse) a payment session
//! for the held order, hand a widget request to the host UI, and handle the
//! widget callback - the only re-entry point after the context switch to
//! the provider's UI. The callback may never fire; the orchestrator then
//! simply stays in `AwaitingPayment` until the widget reports dismissal.
//! Verification is always server-side; a failed verification leaves the
//! cart and the held order untouched so the attempt can be retried.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::api::{OrderApi, PaymentSession, VerifyPayment};
use crate::cart::Cart;
use crate::error::{Error, Result};
use crate::pipeline::SubmissionPipeline;

/// How long a minted payment session is considered reusable. Within this
/// window a second checkout attempt reuses the existing provider order
/// instead of minting another one (double-charge protection).
const SESSION_TTL: Duration = Duration::from_secs(15 * 60);

/// Observable orchestrator phase. `Cancelled` is distinct from
/// `AwaitingPayment` so the UI never hangs on a silently-dismissed widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentPhase {
    Idle,
    AwaitingPayment,
    Cancelled,
    Completed,
}

/// Everything the host UI needs to open the checkout widget.
#[derive(Debug, Clone)]
pub struct WidgetRequest {
    /// Provider public key; parameterizes the widget, never verification.
    pub provider_key: String,
    pub session_token: String,
    pub provider_order_id: String,
    /// Total in minor currency units, as the provider requires.
    pub amount_minor: i64,
    pub display_label: String,
}

/// Result reported by the checkout widget.
#[derive(Debug, Clone)]
pub enum WidgetOutcome {
    Completed {
        provider_payment_id: String,
        signature: String,
    },
    /// The user closed the widget without paying.
    Dismissed,
}

struct HeldSession {
    order_id: i64,
    amount: f64,
    session: PaymentSession,
    minted_at: Instant,
}

/// Orchestrates one payment flow per cart session. Reads the held order id
/// through the submission pipeline; never mutates it directly.
pub struct PaymentOrchestrator {
    api: Arc<dyn OrderApi>,
    provider_key: String,
    phase: PaymentPhase,
    held: Option<HeldSession>,
}

impl PaymentOrchestrator {
    pub fn new(api: Arc<dyn OrderApi>, provider_key: &str) -> Self {
        Self {
            api,
            provider_key: provider_key.to_string(),
            phase: PaymentPhase::Idle,
            held: None,
        }
    }

    pub fn phase(&self) -> PaymentPhase {
        self.phase
    }

    /// Start (or resume) a checkout for the current cart.
    ///
    /// Ensures the order exists and all lines are synced, then mints a
    /// payment session for the cart total - or reuses the unexpired one
    /// already held for this order and amount, so an accidental double
    /// submission cannot create a second charge.
    pub async fn begin_checkout(
        &mut self,
        pipeline: &mut SubmissionPipeline,
        cart: &Cart,
        table: Option<i64>,
    ) -> Result<WidgetRequest> {
        if cart.is_empty() {
            return Err(Error::EmptyCart);
        }

        let order_id = pipeline.ensure_order(table).await?;
        pipeline.sync_lines(cart).await?;

        let amount = cart.totals().total;
        let reusable = self.held.as_ref().is_some_and(|h| {
            h.order_id == order_id
                && h.amount == amount
                && h.minted_at.elapsed() < SESSION_TTL
        });
        if !reusable {
            // Never mint a second session while a widget may still be open
            // on the old one; the callback (or dismissal) must come first.
            if self.phase == PaymentPhase::AwaitingPayment {
                return Err(Error::PaymentPending);
            }
            let session = self.api.create_payment_session(order_id, amount).await?;
            info!(order_id, provider_order_id = %session.provider_order_id, "payment session created");
            self.held = Some(HeldSession {
                order_id,
                amount,
                session,
                minted_at: Instant::now(),
            });
        }

        let held = self.held.as_ref().ok_or(Error::NoActiveOrder)?;
        self.phase = PaymentPhase::AwaitingPayment;
        Ok(WidgetRequest {
            provider_key: self.provider_key.clone(),
            session_token: held.session.session_token.clone(),
            provider_order_id: held.session.provider_order_id.clone(),
            amount_minor: (amount * 100.0).round() as i64,
            display_label: format!(
                "Order #{}",
                pipeline.current_order_number().unwrap_or("-")
            ),
        })
    }

    /// Handle the widget callback.
    ///
    /// On a completed payment the callback fields are verified against the
    /// order service; verified success dispatches the order to the kitchen
    /// and finishes the cycle. Verified failure surfaces the reason with
    /// the cart and held order preserved for retry. A dismissal moves to
    /// the explicit `Cancelled` phase with everything preserved.
    pub async fn handle_widget_callback(
        &mut self,
        pipeline: &mut SubmissionPipeline,
        cart: &mut Cart,
        outcome: WidgetOutcome,
    ) -> Result<PaymentPhase> {
        if self.phase != PaymentPhase::AwaitingPayment {
            return Err(Error::NoActiveOrder);
        }
        let held = self.held.as_ref().ok_or(Error::NoActiveOrder)?;

        match outcome {
            WidgetOutcome::Dismissed => {
                info!(order_id = held.order_id, "checkout widget dismissed");
                self.phase = PaymentPhase::Cancelled;
                Ok(self.phase)
            }
            WidgetOutcome::Completed {
                provider_payment_id,
                signature,
            } => {
                let verify = VerifyPayment {
                    provider_order_id: held.session.provider_order_id.clone(),
                    provider_payment_id,
                    signature,
                };
                match self.api.verify_payment(&verify).await {
                    Ok(_) => {
                        info!(order_id = held.order_id, "payment verified");
                        pipeline.dispatch(cart).await?;
                        self.held = None;
                        self.phase = PaymentPhase::Completed;
                        Ok(self.phase)
                    }
                    Err(e) => {
                        // Order stays draft; session and cart are kept so
                        // the operator can retry the same order.
                        warn!(order_id = held.order_id, error = %e, "payment verification failed");
                        self.phase = PaymentPhase::Idle;
                        Err(e)
                    }
                }
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::Product;
    use crate::models::OrderStatus;
    use crate::testutil::MockApi;

    fn cart_with_total() -> Cart {
        let mut cart = Cart::new();
        cart.add_item(
            &Product {
                id: 1,
                name: "Pasta".into(),
                price: 10.0,
                tax_rate: 5.0,
                has_variants: false,
                variants: vec![],
            },
            None,
            2,
        )
        .unwrap();
        cart
    }

    fn setup() -> (Arc<MockApi>, SubmissionPipeline, PaymentOrchestrator, Cart) {
        let api = Arc::new(MockApi::new());
        let pipeline = SubmissionPipeline::new(Arc::clone(&api) as Arc<dyn OrderApi>);
        let orchestrator =
            PaymentOrchestrator::new(Arc::clone(&api) as Arc<dyn OrderApi>, "pk_test_123");
        (api, pipeline, orchestrator, cart_with_total())
    }

    #[tokio::test]
    async fn test_begin_checkout_mints_session() {
        let (_, mut pipeline, mut orchestrator, cart) = setup();
        let request = orchestrator
            .begin_checkout(&mut pipeline, &cart, Some(1))
            .await
            .unwrap();

        // 2 x 10.00 + 5% tax = 21.00 => 2100 minor units.
        assert_eq!(request.amount_minor, 2100);
        assert_eq!(request.provider_key, "pk_test_123");
        assert_eq!(orchestrator.phase(), PaymentPhase::AwaitingPayment);
        assert!(pipeline.current_order_id().is_some());
    }

    #[tokio::test]
    async fn test_double_submission_reuses_session() {
        let (api, mut pipeline, mut orchestrator, cart) = setup();
        let first = orchestrator
            .begin_checkout(&mut pipeline, &cart, Some(1))
            .await
            .unwrap();
        let second = orchestrator
            .begin_checkout(&mut pipeline, &cart, Some(1))
            .await
            .unwrap();

        assert_eq!(first.provider_order_id, second.provider_order_id);
        assert_eq!(api.state().sessions_created, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_session_is_replaced() {
        let (api, mut pipeline, mut orchestrator, cart) = setup();
        orchestrator
            .begin_checkout(&mut pipeline, &cart, Some(1))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(16 * 60)).await;

        orchestrator
            .begin_checkout(&mut pipeline, &cart, Some(1))
            .await
            .unwrap();
        assert_eq!(api.state().sessions_created, 2);
    }

    #[tokio::test]
    async fn test_amount_change_while_widget_open_is_rejected() {
        let (api, mut pipeline, mut orchestrator, mut cart) = setup();
        orchestrator
            .begin_checkout(&mut pipeline, &cart, Some(1))
            .await
            .unwrap();

        // The widget may still be open on the old session; a changed total
        // must not mint a second one underneath it.
        cart.set_quantity(0, 3).unwrap();
        let err = orchestrator
            .begin_checkout(&mut pipeline, &cart, Some(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PaymentPending));
        assert_eq!(api.state().sessions_created, 1);
    }

    #[tokio::test]
    async fn test_amount_change_after_dismissal_mints_new_session() {
        let (api, mut pipeline, mut orchestrator, mut cart) = setup();
        orchestrator
            .begin_checkout(&mut pipeline, &cart, Some(1))
            .await
            .unwrap();
        orchestrator
            .handle_widget_callback(&mut pipeline, &mut cart, WidgetOutcome::Dismissed)
            .await
            .unwrap();

        cart.set_quantity(0, 3).unwrap();
        pipeline.sync_lines(&cart).await.ok();
        orchestrator
            .begin_checkout(&mut pipeline, &cart, Some(1))
            .await
            .unwrap();
        assert_eq!(api.state().sessions_created, 2);
    }

    #[tokio::test]
    async fn test_verified_success_dispatches_and_finishes() {
        let (api, mut pipeline, mut orchestrator, mut cart) = setup();
        orchestrator
            .begin_checkout(&mut pipeline, &cart, Some(1))
            .await
            .unwrap();

        let phase = orchestrator
            .handle_widget_callback(
                &mut pipeline,
                &mut cart,
                WidgetOutcome::Completed {
                    provider_payment_id: "pay_1".into(),
                    signature: "sig".into(),
                },
            )
            .await
            .unwrap();

        assert_eq!(phase, PaymentPhase::Completed);
        assert!(cart.is_empty());
        assert_eq!(pipeline.current_order_id(), None);
        let state = api.state();
        let (_, status) = state.status_calls.last().unwrap();
        assert_eq!(*status, OrderStatus::SentToKitchen);
    }

    #[tokio::test]
    async fn test_verification_failure_preserves_cart_and_order() {
        let (api, mut pipeline, mut orchestrator, mut cart) = setup();
        orchestrator
            .begin_checkout(&mut pipeline, &cart, Some(1))
            .await
            .unwrap();
        api.state().verify_success = false;

        let err = orchestrator
            .handle_widget_callback(
                &mut pipeline,
                &mut cart,
                WidgetOutcome::Completed {
                    provider_payment_id: "pay_1".into(),
                    signature: "bad".into(),
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::PaymentVerificationFailure { .. }));
        assert!(!cart.is_empty());
        assert!(pipeline.current_order_id().is_some());
        // No dispatch reached the server.
        assert!(api.state().status_calls.is_empty());

        // The same order is retried against the held session.
        api.state().verify_success = true;
        let retry = orchestrator
            .begin_checkout(&mut pipeline, &cart, Some(1))
            .await
            .unwrap();
        assert_eq!(api.state().sessions_created, 1);
        assert!(retry.provider_order_id.starts_with("prov_order_"));
    }

    #[tokio::test]
    async fn test_dismissal_is_explicit_cancelled_not_pending() {
        let (_, mut pipeline, mut orchestrator, mut cart) = setup();
        orchestrator
            .begin_checkout(&mut pipeline, &cart, Some(1))
            .await
            .unwrap();

        let phase = orchestrator
            .handle_widget_callback(&mut pipeline, &mut cart, WidgetOutcome::Dismissed)
            .await
            .unwrap();

        assert_eq!(phase, PaymentPhase::Cancelled);
        assert!(!cart.is_empty());
        assert!(pipeline.current_order_id().is_some());
    }

    #[tokio::test]
    async fn test_callback_without_checkout_is_rejected() {
        let (_, mut pipeline, mut orchestrator, mut cart) = setup();
        let result = orchestrator
            .handle_widget_callback(&mut pipeline, &mut cart, WidgetOutcome::Dismissed)
            .await;
        assert!(matches!(result, Err(Error::NoActiveOrder)));
    }
}
