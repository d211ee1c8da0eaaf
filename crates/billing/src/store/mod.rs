//! Storage abstraction for billing data
//!
//! Services talk to [`BillingStore`] instead of a concrete database so the lifecycle
//! rules can run against Postgres in production and an in-memory store in tests.
//!
//! Status transitions are conditional (`from` -> `to`) and report whether a row
//! changed. A `false` return means the row was missing or already moved on, and the
//! caller re-reads to find out which.

mod memory;
mod postgres;

pub use memory::InMemoryBillingStore;
pub use postgres::PgBillingStore;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;
use vendorbill_shared::SubscriptionTier;

use crate::error::BillingResult;
use crate::models::{
    Invoice, InvoiceNotice, NewPayment, Notification, Payment, PaymentStatus, Subscription,
    SubscriptionStatus,
};

/// Decides a payment's status from the subscription and the business's branch count.
/// Called by [`BillingStore::record_payment`] inside its unit of work.
pub type PaymentClassifier<'a> =
    &'a (dyn Fn(&Subscription, i64) -> BillingResult<PaymentStatus> + Send + Sync);

#[async_trait]
pub trait BillingStore: Send + Sync {
    // ─────────────────────────────── Subscriptions ───────────────────────────────

    async fn insert_subscription(&self, subscription: &Subscription) -> BillingResult<()>;

    /// Fetch a subscription, including soft-deleted rows
    async fn get_subscription(&self, id: Uuid) -> BillingResult<Option<Subscription>>;

    /// Active, non-deleted subscriptions whose end date is before `cutoff`
    async fn list_active_subscriptions_ended_before(
        &self,
        cutoff: OffsetDateTime,
    ) -> BillingResult<Vec<Subscription>>;

    /// Overwrite tier and end date of a non-deleted subscription
    async fn update_subscription_terms(
        &self,
        id: Uuid,
        tier: SubscriptionTier,
        end_date: Option<OffsetDateTime>,
    ) -> BillingResult<bool>;

    async fn set_subscription_tier(&self, id: Uuid, tier: SubscriptionTier) -> BillingResult<bool>;

    /// Move a non-deleted subscription from `from` to `to`, optionally soft-deleting it
    async fn transition_subscription(
        &self,
        id: Uuid,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
        deleted_at: Option<OffsetDateTime>,
    ) -> BillingResult<bool>;

    /// Compare-and-set the end date of an active subscription
    async fn extend_subscription_end(
        &self,
        id: Uuid,
        expected_end: OffsetDateTime,
        new_end: OffsetDateTime,
    ) -> BillingResult<bool>;

    async fn soft_delete_subscription(&self, id: Uuid, at: OffsetDateTime) -> BillingResult<bool>;

    // ─────────────────────────────── Businesses ───────────────────────────────

    async fn count_branches(&self, business_id: Uuid) -> BillingResult<i64>;

    /// Non-deleted products owned by the business
    async fn count_products(&self, business_id: Uuid) -> BillingResult<i64>;

    // ─────────────────────────────── Payments ───────────────────────────────

    /// Look up the subscription, count branches, classify and insert as one unit of work.
    ///
    /// Fails with `SubscriptionNotFound` when the subscription is absent or deleted.
    /// Errors returned by `classify` abort the insert.
    async fn record_payment(
        &self,
        payment: NewPayment,
        classify: PaymentClassifier<'_>,
    ) -> BillingResult<Payment>;

    async fn get_payment(&self, id: Uuid) -> BillingResult<Option<Payment>>;

    /// All non-deleted payments, newest first
    async fn list_payments(&self) -> BillingResult<Vec<Payment>>;

    /// Non-deleted payments for one subscription, oldest first
    async fn list_payments_by_subscription(
        &self,
        subscription_id: Uuid,
    ) -> BillingResult<Vec<Payment>>;

    /// Overwrite amount, date and status of a non-deleted payment
    async fn update_payment(&self, payment: &Payment) -> BillingResult<bool>;

    async fn transition_payment(
        &self,
        id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
    ) -> BillingResult<bool>;

    async fn soft_delete_payment(&self, id: Uuid, at: OffsetDateTime) -> BillingResult<bool>;

    // ─────────────────────────────── Invoices ───────────────────────────────

    async fn insert_invoice(&self, invoice: &Invoice) -> BillingResult<()>;

    async fn get_invoice(&self, id: Uuid) -> BillingResult<Option<Invoice>>;

    /// Unpaid invoices due in `[due_from, due_until]`, joined to the vendor who owns
    /// the paying business. `due_from = None` means no lower bound.
    async fn unpaid_invoice_notices(
        &self,
        due_from: Option<OffsetDateTime>,
        due_until: OffsetDateTime,
    ) -> BillingResult<Vec<InvoiceNotice>>;

    // ─────────────────────────────── Notifications ───────────────────────────────

    async fn insert_notification(&self, notification: &Notification) -> BillingResult<()>;
}
