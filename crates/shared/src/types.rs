//! Shared domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Subscription pricing plan
///
/// Ordered from cheapest to most expensive, so `Starter < Pro < Enterprise`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SubscriptionTier {
    Starter,
    Pro,
    Enterprise,
}

impl SubscriptionTier {
    pub const ALL: [SubscriptionTier; 3] = [
        SubscriptionTier::Starter,
        SubscriptionTier::Pro,
        SubscriptionTier::Enterprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Starter => "Starter",
            SubscriptionTier::Pro => "Pro",
            SubscriptionTier::Enterprise => "Enterprise",
        }
    }

    /// Maximum number of products a business may own on this tier.
    /// `None` means unlimited.
    pub fn default_product_limit(&self) -> Option<i64> {
        match self {
            SubscriptionTier::Starter => Some(10),
            SubscriptionTier::Pro => Some(100),
            SubscriptionTier::Enterprise => None,
        }
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid subscription tier '{0}'")]
pub struct ParseTierError(pub String);

impl FromStr for SubscriptionTier {
    type Err = ParseTierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "starter" => Ok(SubscriptionTier::Starter),
            "pro" => Ok(SubscriptionTier::Pro),
            "enterprise" => Ok(SubscriptionTier::Enterprise),
            _ => Err(ParseTierError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("starter".parse::<SubscriptionTier>().unwrap(), SubscriptionTier::Starter);
        assert_eq!("PRO".parse::<SubscriptionTier>().unwrap(), SubscriptionTier::Pro);
        assert_eq!(
            " Enterprise ".parse::<SubscriptionTier>().unwrap(),
            SubscriptionTier::Enterprise
        );
    }

    #[test]
    fn test_parse_unknown_tier_fails() {
        let err = "Unknown".parse::<SubscriptionTier>().unwrap_err();
        assert_eq!(err.0, "Unknown");
        assert!("".parse::<SubscriptionTier>().is_err());
        assert!("team".parse::<SubscriptionTier>().is_err());
    }

    #[test]
    fn test_tier_ordering() {
        assert!(SubscriptionTier::Starter < SubscriptionTier::Pro);
        assert!(SubscriptionTier::Pro < SubscriptionTier::Enterprise);
    }

    #[test]
    fn test_serde_uses_display_names() {
        let json = serde_json::to_string(&SubscriptionTier::Enterprise).unwrap();
        assert_eq!(json, "\"Enterprise\"");
        let tier: SubscriptionTier = serde_json::from_str("\"Pro\"").unwrap();
        assert_eq!(tier, SubscriptionTier::Pro);
    }

    #[test]
    fn test_product_limits() {
        assert_eq!(SubscriptionTier::Starter.default_product_limit(), Some(10));
        assert_eq!(SubscriptionTier::Pro.default_product_limit(), Some(100));
        assert_eq!(SubscriptionTier::Enterprise.default_product_limit(), None);
    }
}
