//! Billing error types

use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;
use vendorbill_shared::{ParseTierError, SubscriptionTier};

use crate::models::{PaymentStatus, SubscriptionStatus};

pub type BillingResult<T> = Result<T, BillingError>;

/// Coarse classification used by callers to decide how to surface an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Entity absent
    NotFound,
    /// Status precondition failed
    InvalidState,
    /// Bad input
    Validation,
    /// Business rule refused the operation
    PolicyViolation,
    /// Payment gateway or notification transport failed
    Upstream,
    /// Persistence failure
    Store,
}

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(Uuid),

    #[error("Payment not found: {0}")]
    PaymentNotFound(Uuid),

    #[error("Invoice not found: {0}")]
    InvoiceNotFound(Uuid),

    #[error("Subscription {id} is {status}, expected active")]
    SubscriptionInactive { id: Uuid, status: SubscriptionStatus },

    #[error("Payment {id} is {status}, only partial payments can be rejected")]
    PaymentNotPartial { id: Uuid, status: PaymentStatus },

    #[error("Payment {id} is {status}, invoices are only issued for completed payments")]
    PaymentNotCompleted { id: Uuid, status: PaymentStatus },

    #[error("Incoming subscription starting {incoming_start} does not overlap subscription ending {current_end}")]
    NoOverlap {
        current_end: OffsetDateTime,
        incoming_start: OffsetDateTime,
    },

    #[error("Subscription {0} has no end date to extend")]
    MissingEndDate(Uuid),

    #[error("Invalid subscription tier: {0}")]
    InvalidTier(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid date range: {0}")]
    InvalidDateRange(String),

    #[error("Unsupported payment method: {0}")]
    UnsupportedPaymentMethod(String),

    #[error("Invalid payment method: {0}")]
    InvalidPaymentMethod(String),

    #[error("Refund window of {window_days} days expired (subscription started {started_at})")]
    RefundWindowExpired {
        started_at: OffsetDateTime,
        window_days: i64,
    },

    #[error("Reduce product count to {limit} or fewer before downgrading to {tier} (currently {count})")]
    TooManyProducts {
        tier: SubscriptionTier,
        count: i64,
        limit: i64,
    },

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Notification delivery failed: {0}")]
    Notification(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl BillingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BillingError::SubscriptionNotFound(_)
            | BillingError::PaymentNotFound(_)
            | BillingError::InvoiceNotFound(_) => ErrorKind::NotFound,
            BillingError::SubscriptionInactive { .. }
            | BillingError::PaymentNotPartial { .. }
            | BillingError::PaymentNotCompleted { .. }
            | BillingError::MissingEndDate(_) => ErrorKind::InvalidState,
            BillingError::NoOverlap { .. }
            | BillingError::InvalidTier(_)
            | BillingError::InvalidAmount(_)
            | BillingError::InvalidDateRange(_)
            | BillingError::UnsupportedPaymentMethod(_)
            | BillingError::InvalidPaymentMethod(_) => ErrorKind::Validation,
            BillingError::RefundWindowExpired { .. } | BillingError::TooManyProducts { .. } => {
                ErrorKind::PolicyViolation
            }
            BillingError::Gateway(_) | BillingError::Notification(_) => ErrorKind::Upstream,
            BillingError::Config(_) | BillingError::Database(_) => ErrorKind::Store,
        }
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Database(e.to_string())
    }
}

impl From<ParseTierError> for BillingError {
    fn from(e: ParseTierError) -> Self {
        BillingError::InvalidTier(e.0)
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(e: stripe::StripeError) -> Self {
        BillingError::Gateway(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let id = Uuid::new_v4();
        assert_eq!(BillingError::SubscriptionNotFound(id).kind(), ErrorKind::NotFound);
        assert_eq!(
            BillingError::SubscriptionInactive {
                id,
                status: SubscriptionStatus::Suspended
            }
            .kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(BillingError::InvalidTier("Gold".into()).kind(), ErrorKind::Validation);
        assert_eq!(
            BillingError::TooManyProducts {
                tier: SubscriptionTier::Starter,
                count: 11,
                limit: 10
            }
            .kind(),
            ErrorKind::PolicyViolation
        );
        assert_eq!(BillingError::Database("boom".into()).kind(), ErrorKind::Store);
        assert_eq!(BillingError::Gateway("declined".into()).kind(), ErrorKind::Upstream);
    }

    #[test]
    fn test_too_many_products_message() {
        let err = BillingError::TooManyProducts {
            tier: SubscriptionTier::Starter,
            count: 11,
            limit: 10,
        };
        assert_eq!(
            err.to_string(),
            "Reduce product count to 10 or fewer before downgrading to Starter (currently 11)"
        );
    }

    #[test]
    fn test_parse_tier_error_converts() {
        let err: BillingError = "Gold".parse::<SubscriptionTier>().unwrap_err().into();
        assert!(matches!(err, BillingError::InvalidTier(ref t) if t == "Gold"));
    }
}
