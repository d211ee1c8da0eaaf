//! Billing policy knobs

use time::Duration;
use vendorbill_shared::SubscriptionTier;

/// Windows and limits that drive the lifecycle rules
#[derive(Debug, Clone)]
pub struct BillingPolicy {
    /// Days after start during which a subscription may be canceled
    pub refund_window_days: i64,
    /// Days past the end date before an unpaid subscription is suspended
    pub grace_period_days: i64,
    /// How far ahead of the due date reminders go out
    pub reminder_lead_days: i64,
    pub starter_product_limit: i64,
    pub pro_product_limit: i64,
    /// ISO currency code passed to payment gateways
    pub currency: String,
}

impl Default for BillingPolicy {
    fn default() -> Self {
        Self {
            refund_window_days: 7,
            grace_period_days: 7,
            reminder_lead_days: 3,
            starter_product_limit: 10,
            pro_product_limit: 100,
            currency: "usd".to_string(),
        }
    }
}

impl BillingPolicy {
    /// Load policy from environment or use defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            refund_window_days: env_i64("REFUND_WINDOW_DAYS", defaults.refund_window_days),
            grace_period_days: env_i64("GRACE_PERIOD_DAYS", defaults.grace_period_days),
            reminder_lead_days: env_i64("REMINDER_LEAD_DAYS", defaults.reminder_lead_days),
            starter_product_limit: env_i64(
                "STARTER_PRODUCT_LIMIT",
                defaults.starter_product_limit,
            ),
            pro_product_limit: env_i64("PRO_PRODUCT_LIMIT", defaults.pro_product_limit),
            currency: std::env::var("BILLING_CURRENCY")
                .map(|c| c.to_ascii_lowercase())
                .unwrap_or(defaults.currency),
        }
    }

    pub fn refund_window(&self) -> Duration {
        Duration::days(self.refund_window_days)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::days(self.grace_period_days)
    }

    pub fn reminder_lead(&self) -> Duration {
        Duration::days(self.reminder_lead_days)
    }

    /// Product ceiling for a tier, `None` when unlimited
    pub fn product_limit(&self, tier: SubscriptionTier) -> Option<i64> {
        match tier {
            SubscriptionTier::Starter => Some(self.starter_product_limit),
            SubscriptionTier::Pro => Some(self.pro_product_limit),
            SubscriptionTier::Enterprise => None,
        }
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_tier_limits() {
        let policy = BillingPolicy::default();
        for tier in SubscriptionTier::ALL {
            assert_eq!(policy.product_limit(tier), tier.default_product_limit());
        }
        assert_eq!(policy.refund_window(), Duration::days(7));
        assert_eq!(policy.grace_period(), Duration::days(7));
        assert_eq!(policy.reminder_lead(), Duration::days(3));
    }
}
