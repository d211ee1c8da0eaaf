//! Tier pricing
//!
//! A subscription is charged its tier's base price, plus a flat per-branch fee once
//! the business operates more than one branch.

use vendorbill_shared::SubscriptionTier;

use crate::error::BillingResult;

/// Fee per branch in cents, applied to every branch once there are two or more
pub const PER_BRANCH_CENTS: i64 = 100;

/// Base monthly price in cents
pub fn base_price_cents(tier: SubscriptionTier) -> i64 {
    match tier {
        SubscriptionTier::Starter => 100,
        SubscriptionTier::Pro => 300,
        SubscriptionTier::Enterprise => 500,
    }
}

/// Expected charge for a tier at a given branch count
pub fn expected_charge_cents(tier: SubscriptionTier, branch_count: i64) -> i64 {
    let base = base_price_cents(tier);
    if branch_count <= 1 {
        return base;
    }
    base.saturating_add(branch_count.saturating_mul(PER_BRANCH_CENTS))
}

/// Expected charge for a tier given by name
///
/// Fails with [`crate::BillingError::InvalidTier`] for anything other than
/// Starter, Pro or Enterprise.
pub fn calculate_cost(tier: &str, branch_count: i64) -> BillingResult<i64> {
    let tier: SubscriptionTier = tier.parse()?;
    Ok(expected_charge_cents(tier, branch_count))
}
