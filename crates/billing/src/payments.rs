//! Payment ledger
//!
//! Records payments against subscriptions and classifies each one as completed or
//! partial against the tier price at the branch count seen when it is inserted.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;
use vendorbill_shared::Clock;

use crate::error::{BillingError, BillingResult};
use crate::gateway::{ChargeRequest, Gateways, PaymentMethod};
use crate::models::{NewPayment, Payment, PaymentStatus, Subscription};
use crate::policy::BillingPolicy;
use crate::pricing::expected_charge_cents;
use crate::store::BillingStore;

/// Message surfaced to the payer when a partial payment is turned away
pub const RETRY_WITH_SUFFICIENT_FUNDS: &str =
    "Payment was rejected because it is less than the amount due. Please retry with sufficient funds.";

/// A partial payment that has been moved to `rejected`
#[derive(Debug, Clone, Serialize)]
pub struct RejectedPayment {
    pub payment: Payment,
    pub message: &'static str,
}

/// A confirmed gateway charge and the payment recorded for it
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedPayment {
    pub payment: Payment,
    pub gateway_reference: String,
}

/// Administrative correction to a payment
#[derive(Debug, Clone, Default)]
pub struct PaymentUpdate {
    pub amount_cents: Option<i64>,
    pub date: Option<OffsetDateTime>,
    pub status: Option<PaymentStatus>,
}

/// Decide a payment's status for a subscription at a branch count
pub fn classify_payment(
    subscription: &Subscription,
    branch_count: i64,
    amount_cents: i64,
) -> BillingResult<PaymentStatus> {
    subscription.require_active()?;
    let expected = expected_charge_cents(subscription.tier, branch_count);
    Ok(if amount_cents == expected {
        PaymentStatus::Completed
    } else {
        PaymentStatus::Partial
    })
}

fn validate_amount(amount_cents: i64) -> BillingResult<()> {
    if amount_cents <= 0 {
        return Err(BillingError::InvalidAmount(format!(
            "amount must be positive, got {} cents",
            amount_cents
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct PaymentLedger {
    store: Arc<dyn BillingStore>,
    gateways: Gateways,
    clock: Arc<dyn Clock>,
    policy: BillingPolicy,
}

impl PaymentLedger {
    pub fn new(
        store: Arc<dyn BillingStore>,
        gateways: Gateways,
        clock: Arc<dyn Clock>,
        policy: BillingPolicy,
    ) -> Self {
        Self {
            store,
            gateways,
            clock,
            policy,
        }
    }

    /// Record a payment and classify it as completed or partial.
    ///
    /// `date` defaults to the ledger clock's current time.
    pub async fn record_payment(
        &self,
        subscription_id: Uuid,
        amount_cents: i64,
        date: Option<OffsetDateTime>,
    ) -> BillingResult<Payment> {
        validate_amount(amount_cents)?;
        let date = date.unwrap_or_else(|| self.clock.now());

        let new_payment = NewPayment {
            id: Uuid::new_v4(),
            subscription_id,
            amount_cents,
            date,
        };
        let classify = move |subscription: &Subscription, branches: i64| {
            classify_payment(subscription, branches, amount_cents)
        };
        let payment = self.store.record_payment(new_payment, &classify).await?;

        tracing::info!(
            payment_id = %payment.id,
            subscription_id = %subscription_id,
            amount_cents = amount_cents,
            status = %payment.status,
            "Payment recorded"
        );

        Ok(payment)
    }

    pub async fn get_payment(&self, id: Uuid) -> BillingResult<Payment> {
        self.store
            .get_payment(id)
            .await?
            .ok_or(BillingError::PaymentNotFound(id))
    }

    pub async fn list_payments(&self) -> BillingResult<Vec<Payment>> {
        self.store.list_payments().await
    }

    pub async fn list_payments_by_subscription(
        &self,
        subscription_id: Uuid,
    ) -> BillingResult<Vec<Payment>> {
        self.store.list_payments_by_subscription(subscription_id).await
    }

    pub async fn update_payment(&self, id: Uuid, update: PaymentUpdate) -> BillingResult<Payment> {
        let mut payment = self.get_payment(id).await?;

        if let Some(amount_cents) = update.amount_cents {
            validate_amount(amount_cents)?;
            payment.amount_cents = amount_cents;
        }
        if let Some(date) = update.date {
            payment.date = date;
        }
        if let Some(status) = update.status {
            payment.status = status;
        }

        if !self.store.update_payment(&payment).await? {
            return Err(BillingError::PaymentNotFound(id));
        }

        tracing::info!(payment_id = %id, status = %payment.status, "Payment updated");
        Ok(payment)
    }

    pub async fn delete_payment(&self, id: Uuid) -> BillingResult<()> {
        if !self.store.soft_delete_payment(id, self.clock.now()).await? {
            return Err(BillingError::PaymentNotFound(id));
        }
        tracing::info!(payment_id = %id, "Payment deleted");
        Ok(())
    }

    /// Move a partial payment to `rejected` and tell the payer to retry
    pub async fn reject_partial_payment(&self, id: Uuid) -> BillingResult<RejectedPayment> {
        let payment = self.get_payment(id).await?;
        if payment.status != PaymentStatus::Partial {
            return Err(BillingError::PaymentNotPartial {
                id,
                status: payment.status,
            });
        }

        let moved = self
            .store
            .transition_payment(id, PaymentStatus::Partial, PaymentStatus::Rejected)
            .await?;
        if !moved {
            // Lost a race with another writer; report what it left behind
            let current = self.get_payment(id).await?;
            return Err(BillingError::PaymentNotPartial {
                id,
                status: current.status,
            });
        }

        tracing::warn!(
            payment_id = %id,
            subscription_id = %payment.subscription_id,
            amount_cents = payment.amount_cents,
            "Partial payment rejected"
        );

        Ok(RejectedPayment {
            payment: Payment {
                status: PaymentStatus::Rejected,
                ..payment
            },
            message: RETRY_WITH_SUFFICIENT_FUNDS,
        })
    }

    /// Charge through the gateway for `method`, then record the payment.
    ///
    /// The subscription must be active and `amount_cents` must equal the amount due
    /// at its current branch count; nothing is charged otherwise. A branch added
    /// between that check and the insert leaves the payment recorded as partial.
    pub async fn process_payment(
        &self,
        subscription_id: Uuid,
        amount_cents: i64,
        method: PaymentMethod,
    ) -> BillingResult<ProcessedPayment> {
        validate_amount(amount_cents)?;
        let gateway = self.gateways.for_method(&method)?;

        let subscription = self
            .store
            .get_subscription(subscription_id)
            .await?
            .filter(|s| !s.is_deleted())
            .ok_or(BillingError::SubscriptionNotFound(subscription_id))?;
        subscription.require_active()?;

        let branches = self.store.count_branches(subscription.business_id).await?;
        let due = expected_charge_cents(subscription.tier, branches);
        if amount_cents != due {
            return Err(BillingError::InvalidAmount(format!(
                "amount due is {} cents, got {} cents",
                due, amount_cents
            )));
        }

        let request = ChargeRequest {
            amount_cents,
            currency: self.policy.currency.clone(),
            description: format!("{} subscription payment", subscription.tier),
            reference: subscription_id.to_string(),
            method,
        };
        let gateway_reference = gateway.charge(&request).await?;

        tracing::info!(
            subscription_id = %subscription_id,
            gateway = gateway.name(),
            gateway_reference = %gateway_reference,
            "Gateway charge confirmed"
        );

        let payment = self
            .record_payment(subscription_id, amount_cents, None)
            .await?;

        if payment.status == PaymentStatus::Partial {
            tracing::warn!(
                payment_id = %payment.id,
                subscription_id = %subscription_id,
                gateway_reference = %gateway_reference,
                "Branch count changed during charge, payment recorded as partial"
            );
        }

        Ok(ProcessedPayment {
            payment,
            gateway_reference,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubscriptionStatus;
    use time::macros::datetime;
    use vendorbill_shared::SubscriptionTier;

    fn subscription(tier: SubscriptionTier, status: SubscriptionStatus) -> Subscription {
        Subscription {
            id: Uuid::new_v4(),
            business_id: Uuid::new_v4(),
            tier,
            start_date: datetime!(2024-01-01 0:00 UTC),
            end_date: None,
            status,
            deleted_at: None,
        }
    }

    #[test]
    fn test_exact_amount_is_completed() {
        let sub = subscription(SubscriptionTier::Pro, SubscriptionStatus::Active);
        assert_eq!(classify_payment(&sub, 1, 300).unwrap(), PaymentStatus::Completed);
        assert_eq!(classify_payment(&sub, 2, 500).unwrap(), PaymentStatus::Completed);
    }

    #[test]
    fn test_any_other_amount_is_partial() {
        let sub = subscription(SubscriptionTier::Pro, SubscriptionStatus::Active);
        assert_eq!(classify_payment(&sub, 1, 299).unwrap(), PaymentStatus::Partial);
        assert_eq!(classify_payment(&sub, 1, 301).unwrap(), PaymentStatus::Partial);
        assert_eq!(classify_payment(&sub, 2, 300).unwrap(), PaymentStatus::Partial);
    }

    #[test]
    fn test_inactive_subscription_is_refused() {
        let sub = subscription(SubscriptionTier::Starter, SubscriptionStatus::Suspended);
        let err = classify_payment(&sub, 1, 100).unwrap_err();
        assert!(matches!(
            err,
            BillingError::SubscriptionInactive {
                status: SubscriptionStatus::Suspended,
                ..
            }
        ));
    }

    #[test]
    fn test_non_positive_amount_is_invalid() {
        assert!(validate_amount(1).is_ok());
        assert!(matches!(validate_amount(0), Err(BillingError::InvalidAmount(_))));
        assert!(matches!(validate_amount(-5), Err(BillingError::InvalidAmount(_))));
    }

    #[test]
    fn test_rejection_serializes_with_retry_message() {
        let rejection = RejectedPayment {
            payment: Payment {
                id: Uuid::nil(),
                subscription_id: Uuid::nil(),
                amount_cents: 50,
                date: datetime!(2024-01-01 0:00 UTC),
                status: PaymentStatus::Rejected,
                deleted_at: None,
            },
            message: RETRY_WITH_SUFFICIENT_FUNDS,
        };
        let json = serde_json::to_value(&rejection).unwrap();
        assert_eq!(json["message"], RETRY_WITH_SUFFICIENT_FUNDS);
        assert_eq!(json["payment"]["status"], "rejected");
        assert_eq!(json["payment"]["amount_cents"], 50);
    }
}
