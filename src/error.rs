//! Error taxonomy for the synchronization engine.
//!
//! Validation and business-rule errors are surfaced to the call site and
//! never retried automatically. Transport errors are retried or self-healed
//! by the owning component; only policy failures (payment verification,
//! repeated reconnect exhaustion) escalate to the user.

use thiserror::Error;

/// Errors produced by the cart, pipeline, payment, and kitchen components.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The product declares variants and none was supplied.
    #[error("product '{product}' requires a variant selection")]
    VariantRequired { product: String },

    /// Quantity below 1. Removal is an explicit operation, never implied.
    #[error("quantity must be at least 1")]
    InvalidQuantity,

    /// A cart line index that does not exist.
    #[error("no cart line at index {index}")]
    LineNotFound { index: usize },

    /// `clear()` called without explicit confirmation.
    #[error("clearing the cart requires confirmation")]
    ConfirmationRequired,

    /// Submission or payment attempted against an empty cart.
    #[error("cart is empty")]
    EmptyCart,

    /// Dine-in submission attempted without a table reference.
    #[error("no table selected")]
    NoTable,

    /// Some order lines failed to persist. `failed` holds the cart line
    /// indices that still need a retry; acknowledged lines are never resent.
    #[error("{} order line(s) failed to sync", .failed.len())]
    PartialSyncFailure { failed: Vec<usize> },

    /// Dispatch refused because lines are still unsynced.
    #[error("{} order line(s) not yet synced; refusing dispatch", .unsynced.len())]
    IncompleteOrder { unsynced: Vec<usize> },

    /// Dispatch, cancel, or payment attempted with no held order id.
    #[error("no active order")]
    NoActiveOrder,

    /// The payment gateway rejected the verification request. The order
    /// stays in draft and can be retried without rebuilding the cart.
    #[error("payment verification failed: {reason}")]
    PaymentVerificationFailure { reason: String },

    /// A callback-dependent operation was attempted while a checkout
    /// widget is still open.
    #[error("a payment attempt is already in progress")]
    PaymentPending,

    /// Malformed or unrecognized push message. Self-healed by a snapshot
    /// refetch; surfaced only if the refetch itself fails.
    #[error("push channel desync: {detail}")]
    ChannelDesync { detail: String },

    /// Transport-level failure talking to the order service.
    #[error("{message}")]
    Http { message: String },

    /// A response that did not match the expected shape.
    #[error("invalid response from order service: {message}")]
    Decode { message: String },
}

impl Error {
    /// True for errors that are safe to retry as-is (transient transport
    /// or partial-sync conditions).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::PartialSyncFailure { .. } | Error::Http { .. } | Error::ChannelDesync { .. }
        )
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
