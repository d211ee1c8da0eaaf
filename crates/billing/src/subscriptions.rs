//! Subscription lifecycle
//!
//! `active` is the only state with outgoing transitions: a subscription is either
//! canceled inside its refund window or suspended once it is overdue, and both are
//! final. Tier and end date may change while it stays active.

use std::sync::Arc;

use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;
use vendorbill_shared::{add_months, Clock, SubscriptionTier};

use crate::error::{BillingError, BillingResult};
use crate::models::{Subscription, SubscriptionStatus};
use crate::policy::BillingPolicy;
use crate::store::BillingStore;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSubscription {
    pub business_id: Uuid,
    pub tier: SubscriptionTier,
    #[serde(with = "time::serde::rfc3339")]
    pub start_date: OffsetDateTime,
    /// Defaults to one calendar month after the start
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end_date: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionUpdate {
    pub tier: Option<SubscriptionTier>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end_date: Option<OffsetDateTime>,
}

/// A subscription that would run alongside an existing one
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingSubscription {
    #[serde(with = "time::serde::rfc3339")]
    pub start_date: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end_date: Option<OffsetDateTime>,
}

fn default_end(start: OffsetDateTime) -> BillingResult<OffsetDateTime> {
    add_months(start, 1).ok_or_else(|| {
        BillingError::InvalidDateRange(format!("no date one month after {}", start))
    })
}

fn ensure_after(start: OffsetDateTime, end: OffsetDateTime) -> BillingResult<()> {
    if end <= start {
        return Err(BillingError::InvalidDateRange(format!(
            "end {} must be after start {}",
            end, start
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct SubscriptionService {
    store: Arc<dyn BillingStore>,
    clock: Arc<dyn Clock>,
    policy: BillingPolicy,
}

impl SubscriptionService {
    pub fn new(store: Arc<dyn BillingStore>, clock: Arc<dyn Clock>, policy: BillingPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    pub async fn create(&self, request: CreateSubscription) -> BillingResult<Subscription> {
        let end_date = match request.end_date {
            Some(end) => end,
            None => default_end(request.start_date)?,
        };
        ensure_after(request.start_date, end_date)?;

        let subscription = Subscription {
            id: Uuid::new_v4(),
            business_id: request.business_id,
            tier: request.tier,
            start_date: request.start_date,
            end_date: Some(end_date),
            status: SubscriptionStatus::Active,
            deleted_at: None,
        };
        self.store.insert_subscription(&subscription).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            business_id = %subscription.business_id,
            tier = %subscription.tier,
            "Subscription created"
        );

        Ok(subscription)
    }

    /// Fetch a subscription that has not been deleted
    pub async fn get(&self, id: Uuid) -> BillingResult<Subscription> {
        self.store
            .get_subscription(id)
            .await?
            .filter(|s| !s.is_deleted())
            .ok_or(BillingError::SubscriptionNotFound(id))
    }

    /// Change tier and/or end date; status is never touched here
    pub async fn update(&self, id: Uuid, update: SubscriptionUpdate) -> BillingResult<Subscription> {
        let mut subscription = self.get(id).await?;

        if let Some(tier) = update.tier {
            subscription.tier = tier;
        }
        if let Some(end) = update.end_date {
            ensure_after(subscription.start_date, end)?;
            subscription.end_date = Some(end);
        }

        let updated = self
            .store
            .update_subscription_terms(id, subscription.tier, subscription.end_date)
            .await?;
        if !updated {
            return Err(BillingError::SubscriptionNotFound(id));
        }

        tracing::info!(subscription_id = %id, tier = %subscription.tier, "Subscription updated");
        Ok(subscription)
    }

    /// Cancel inside the refund window. Canceled subscriptions are also soft-deleted.
    pub async fn cancel(&self, id: Uuid) -> BillingResult<Subscription> {
        let subscription = self.get(id).await?;
        subscription.require_active()?;

        let now = self.clock.now();
        if now - subscription.start_date > self.policy.refund_window() {
            tracing::info!(
                subscription_id = %id,
                started_at = %subscription.start_date,
                "Cancellation refused, refund window expired"
            );
            return Err(BillingError::RefundWindowExpired {
                started_at: subscription.start_date,
                window_days: self.policy.refund_window_days,
            });
        }

        self.transition(&subscription, SubscriptionStatus::Canceled, Some(now))
            .await?;

        tracing::info!(subscription_id = %id, "Subscription canceled");
        Ok(Subscription {
            status: SubscriptionStatus::Canceled,
            deleted_at: Some(now),
            ..subscription
        })
    }

    /// Switch tier if the business's product count fits the new tier's limit
    pub async fn downgrade(&self, id: Uuid, new_tier: SubscriptionTier) -> BillingResult<Subscription> {
        let subscription = self.get(id).await?;

        if let Some(limit) = self.policy.product_limit(new_tier) {
            let count = self.store.count_products(subscription.business_id).await?;
            if count > limit {
                tracing::info!(
                    subscription_id = %id,
                    tier = %new_tier,
                    product_count = count,
                    limit = limit,
                    "Downgrade refused, too many products"
                );
                return Err(BillingError::TooManyProducts {
                    tier: new_tier,
                    count,
                    limit,
                });
            }
        }

        if !self.store.set_subscription_tier(id, new_tier).await? {
            return Err(BillingError::SubscriptionNotFound(id));
        }

        tracing::info!(
            subscription_id = %id,
            from_tier = %subscription.tier,
            to_tier = %new_tier,
            "Subscription tier changed"
        );

        Ok(Subscription {
            tier: new_tier,
            ..subscription
        })
    }

    /// Fold an overlapping subscription into the current one by extending its end
    /// date by the incoming subscription's length. The incoming one is never stored.
    pub async fn handle_overlap(
        &self,
        current_id: Uuid,
        incoming: IncomingSubscription,
    ) -> BillingResult<Subscription> {
        let current = self.get(current_id).await?;
        current.require_active()?;
        let current_end = current
            .end_date
            .ok_or(BillingError::MissingEndDate(current_id))?;

        let incoming_end = match incoming.end_date {
            Some(end) => end,
            None => default_end(incoming.start_date)?,
        };
        ensure_after(incoming.start_date, incoming_end)?;

        if incoming.start_date >= current_end {
            return Err(BillingError::NoOverlap {
                current_end,
                incoming_start: incoming.start_date,
            });
        }

        let new_end = current_end + (incoming_end - incoming.start_date);
        let extended = self
            .store
            .extend_subscription_end(current_id, current_end, new_end)
            .await?;
        if !extended {
            let latest = self.get(current_id).await?;
            latest.require_active()?;
            return Err(BillingError::Database(format!(
                "subscription {} end date changed concurrently",
                current_id
            )));
        }

        tracing::info!(
            subscription_id = %current_id,
            previous_end = %current_end,
            new_end = %new_end,
            "Overlapping subscription merged"
        );

        Ok(Subscription {
            end_date: Some(new_end),
            ..current
        })
    }

    pub async fn delete(&self, id: Uuid) -> BillingResult<()> {
        if !self.store.soft_delete_subscription(id, self.clock.now()).await? {
            return Err(BillingError::SubscriptionNotFound(id));
        }
        tracing::info!(subscription_id = %id, "Subscription deleted");
        Ok(())
    }

    /// Apply an `active -> to` transition, reporting a lost race as `InvalidState`
    pub(crate) async fn transition(
        &self,
        subscription: &Subscription,
        to: SubscriptionStatus,
        deleted_at: Option<OffsetDateTime>,
    ) -> BillingResult<()> {
        let from = subscription.status;
        if !from.can_transition_to(to) {
            return Err(BillingError::SubscriptionInactive {
                id: subscription.id,
                status: from,
            });
        }

        let moved = self
            .store
            .transition_subscription(subscription.id, from, to, deleted_at)
            .await?;
        if moved {
            return Ok(());
        }

        match self.store.get_subscription(subscription.id).await? {
            Some(latest) if !latest.is_deleted() => Err(BillingError::SubscriptionInactive {
                id: latest.id,
                status: latest.status,
            }),
            _ => Err(BillingError::SubscriptionNotFound(subscription.id)),
        }
    }
}
