// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Vendorbill Billing Core
//!
//! Pricing, payments and the subscription lifecycle for vendors' businesses.
//!
//! ## Features
//!
//! - **Pricing**: Tier base price plus a per-branch fee
//! - **Payment Ledger**: Record payments, classify them as completed or partial, reject partials
//! - **Gateways**: Card payments through Stripe, mobile money through M-Pesa
//! - **Subscriptions**: Create, update, cancel within the refund window, downgrade, merge overlaps
//! - **Invoices**: Issue invoices for completed payments
//! - **Remediation**: Suspend overdue subscriptions, send reminders and late alerts

pub mod error;
pub mod gateway;
pub mod invoices;
pub mod models;
pub mod notifications;
pub mod payments;
pub mod policy;
pub mod pricing;
pub mod remediation;
pub mod store;
pub mod subscriptions;


// Error
pub use error::{BillingError, BillingResult, ErrorKind};

// Gateways
pub use gateway::{
    ChargeRequest, Gateways, MpesaConfig, MpesaGateway, PaymentGateway, PaymentMethod,
    RecordingGateway, StripeGateway,
};

// Invoices
pub use invoices::InvoiceService;

// Models
pub use models::{
    format_amount, Invoice, InvoiceStatus, Notification, NotificationStatus, NotificationType,
    Payment, PaymentStatus, Subscription, SubscriptionStatus,
};

// Notifications
pub use notifications::{notifier_from_env, LogNotifier, Notifier, ResendNotifier};

// Payments
pub use payments::{
    PaymentLedger, PaymentUpdate, ProcessedPayment, RejectedPayment, RETRY_WITH_SUFFICIENT_FUNDS,
};

// Policy
pub use policy::BillingPolicy;

// Pricing
pub use pricing::{base_price_cents, calculate_cost, expected_charge_cents, PER_BRANCH_CENTS};

// Remediation
pub use remediation::{NotificationRun, OverdueOutcome, RemediationService, SuspensionRun};

// Store
pub use store::{BillingStore, InMemoryBillingStore, PgBillingStore};

// Subscriptions
pub use subscriptions::{
    CreateSubscription, IncomingSubscription, SubscriptionService, SubscriptionUpdate,
};

use std::sync::Arc;

use sqlx::PgPool;
use vendorbill_shared::{Clock, SystemClock};

/// Main billing service that combines all billing functionality
#[derive(Clone)]
pub struct BillingService {
    pub payments: PaymentLedger,
    pub subscriptions: SubscriptionService,
    pub invoices: InvoiceService,
    pub remediation: RemediationService,
    pub policy: BillingPolicy,
}

impl BillingService {
    /// Create a Postgres-backed billing service configured from environment variables
    pub fn from_env(pool: PgPool) -> Self {
        Self::new(
            Arc::new(PgBillingStore::new(pool)),
            Gateways::from_env(),
            notifier_from_env(),
            Arc::new(SystemClock),
            BillingPolicy::from_env(),
        )
    }

    /// Create a billing service from explicit collaborators
    pub fn new(
        store: Arc<dyn BillingStore>,
        gateways: Gateways,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        policy: BillingPolicy,
    ) -> Self {
        let subscriptions = SubscriptionService::new(store.clone(), clock.clone(), policy.clone());

        Self {
            payments: PaymentLedger::new(store.clone(), gateways, clock.clone(), policy.clone()),
            invoices: InvoiceService::new(store.clone()),
            remediation: RemediationService::new(
                store,
                subscriptions.clone(),
                notifier,
                clock,
                policy.clone(),
            ),
            subscriptions,
            policy,
        }
    }
}
