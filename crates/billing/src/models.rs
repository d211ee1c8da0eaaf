//! Billing records
//!
//! Amounts are integer cents. Timestamps are UTC and serialise as RFC 3339.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;
use vendorbill_shared::SubscriptionTier;

use crate::error::BillingError;

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = BillingError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(BillingError::Database(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

/// Subscription state machine: `active` moves to `canceled` or `suspended`, both terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Canceled,
    Suspended,
}

string_enum!(SubscriptionStatus {
    Active => "active",
    Canceled => "canceled",
    Suspended => "suspended",
});

impl SubscriptionStatus {
    pub fn can_transition_to(&self, next: SubscriptionStatus) -> bool {
        matches!(
            (self, next),
            (SubscriptionStatus::Active, SubscriptionStatus::Canceled)
                | (SubscriptionStatus::Active, SubscriptionStatus::Suspended)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Completed,
    Partial,
    Rejected,
}

string_enum!(PaymentStatus {
    Completed => "completed",
    Partial => "partial",
    Rejected => "rejected",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Unpaid,
    Paid,
}

string_enum!(InvoiceStatus {
    Unpaid => "unpaid",
    Paid => "paid",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationType {
    Reminder,
    LateAlert,
}

string_enum!(NotificationType {
    Reminder => "Reminder",
    LateAlert => "LateAlert",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Sent,
    Failed,
}

string_enum!(NotificationStatus {
    Sent => "sent",
    Failed => "failed",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub business_id: Uuid,
    pub tier: SubscriptionTier,
    #[serde(with = "time::serde::rfc3339")]
    pub start_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub end_date: Option<OffsetDateTime>,
    pub status: SubscriptionStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn require_active(&self) -> Result<(), BillingError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(BillingError::SubscriptionInactive {
                id: self.id,
                status: self.status,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub amount_cents: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    pub status: PaymentStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
}

/// Payment to be recorded; status is decided at insert time
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub amount_cents: i64,
    pub date: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub user_id: Uuid,
    pub amount_cents: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub issue_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub due_date: OffsetDateTime,
    pub status: InvoiceStatus,
}

/// An unpaid invoice joined with the vendor who should hear about it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceNotice {
    pub invoice_id: Uuid,
    pub due_date: OffsetDateTime,
    pub amount_cents: i64,
    pub user_id: Uuid,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub invoice_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub message: String,
    pub status: NotificationStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Vendor account; only the fields billing needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Business {
    pub id: Uuid,
    pub vendor_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub id: Uuid,
    pub business_id: Uuid,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub id: Uuid,
    pub business_id: Uuid,
    pub name: String,
    pub deleted_at: Option<OffsetDateTime>,
}

/// Format cents as a major-unit amount, e.g. `1234` -> `"12.34"`
pub fn format_amount(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_through_text() {
        for status in [
            SubscriptionStatus::Active,
            SubscriptionStatus::Canceled,
            SubscriptionStatus::Suspended,
        ] {
            assert_eq!(status.as_str().parse::<SubscriptionStatus>().unwrap(), status);
        }
        assert!("paused".parse::<SubscriptionStatus>().is_err());
    }

    #[test]
    fn test_only_active_can_transition() {
        use SubscriptionStatus::*;
        assert!(Active.can_transition_to(Canceled));
        assert!(Active.can_transition_to(Suspended));
        assert!(!Suspended.can_transition_to(Active));
        assert!(!Canceled.can_transition_to(Active));
        assert!(!Canceled.can_transition_to(Suspended));
        assert!(!Active.can_transition_to(Active));
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(0), "0.00");
        assert_eq!(format_amount(500), "5.00");
        assert_eq!(format_amount(1234), "12.34");
        assert_eq!(format_amount(-75), "-0.75");
    }

    #[test]
    fn test_notification_type_serializes_as_type() {
        let n = Notification {
            id: Uuid::nil(),
            user_id: Uuid::nil(),
            invoice_id: None,
            notification_type: NotificationType::LateAlert,
            message: "late".into(),
            status: NotificationStatus::Sent,
            created_at: OffsetDateTime::UNIX_EPOCH,
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["type"], "LateAlert");
        assert_eq!(json["status"], "sent");
    }
}
