//! Postgres-backed [`BillingStore`]

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;
use vendorbill_shared::SubscriptionTier;

use super::{BillingStore, PaymentClassifier};
use crate::error::{BillingError, BillingResult};
use crate::models::{
    Invoice, InvoiceNotice, NewPayment, Notification, Payment, PaymentStatus, Subscription,
    SubscriptionStatus,
};

#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(FromRow)]
struct SubscriptionRow {
    id: Uuid,
    business_id: Uuid,
    tier: String,
    start_date: OffsetDateTime,
    end_date: Option<OffsetDateTime>,
    status: String,
    deleted_at: Option<OffsetDateTime>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = BillingError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Subscription {
            id: row.id,
            business_id: row.business_id,
            tier: row
                .tier
                .parse()
                .map_err(|e| BillingError::Database(format!("stored tier: {}", e)))?,
            start_date: row.start_date,
            end_date: row.end_date,
            status: row.status.parse()?,
            deleted_at: row.deleted_at,
        })
    }
}

#[derive(FromRow)]
struct PaymentRow {
    id: Uuid,
    subscription_id: Uuid,
    amount_cents: i64,
    date: OffsetDateTime,
    status: String,
    deleted_at: Option<OffsetDateTime>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = BillingError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: row.id,
            subscription_id: row.subscription_id,
            amount_cents: row.amount_cents,
            date: row.date,
            status: row.status.parse()?,
            deleted_at: row.deleted_at,
        })
    }
}

#[derive(FromRow)]
struct InvoiceRow {
    id: Uuid,
    payment_id: Uuid,
    user_id: Uuid,
    amount_cents: i64,
    issue_date: OffsetDateTime,
    due_date: OffsetDateTime,
    status: String,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = BillingError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        Ok(Invoice {
            id: row.id,
            payment_id: row.payment_id,
            user_id: row.user_id,
            amount_cents: row.amount_cents,
            issue_date: row.issue_date,
            due_date: row.due_date,
            status: row.status.parse()?,
        })
    }
}

#[derive(FromRow)]
struct InvoiceNoticeRow {
    invoice_id: Uuid,
    due_date: OffsetDateTime,
    amount_cents: i64,
    user_id: Uuid,
    email: String,
}

const SUBSCRIPTION_COLUMNS: &str =
    "id, business_id, tier, start_date, end_date, status, deleted_at";
const PAYMENT_COLUMNS: &str = "id, subscription_id, amount_cents, date, status, deleted_at";

fn collect<R, T>(rows: Vec<R>) -> BillingResult<Vec<T>>
where
    T: TryFrom<R, Error = BillingError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn insert_subscription(&self, subscription: &Subscription) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (id, business_id, tier, start_date, end_date, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.business_id)
        .bind(subscription.tier.as_str())
        .bind(subscription.start_date)
        .bind(subscription.end_date)
        .bind(subscription.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_subscription(&self, id: Uuid) -> BillingResult<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE id = $1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Subscription::try_from).transpose()
    }

    async fn list_active_subscriptions_ended_before(
        &self,
        cutoff: OffsetDateTime,
    ) -> BillingResult<Vec<Subscription>> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM subscriptions
            WHERE status = 'active' AND deleted_at IS NULL AND end_date < $1
            ORDER BY end_date
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn update_subscription_terms(
        &self,
        id: Uuid,
        tier: SubscriptionTier,
        end_date: Option<OffsetDateTime>,
    ) -> BillingResult<bool> {
        let result = sqlx::query(
            "UPDATE subscriptions SET tier = $2, end_date = $3 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(tier.as_str())
        .bind(end_date)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_subscription_tier(&self, id: Uuid, tier: SubscriptionTier) -> BillingResult<bool> {
        let result = sqlx::query(
            "UPDATE subscriptions SET tier = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(tier.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn transition_subscription(
        &self,
        id: Uuid,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
        deleted_at: Option<OffsetDateTime>,
    ) -> BillingResult<bool> {
        // Conditional on the current status so concurrent transitions cannot both win
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = $3, deleted_at = COALESCE($4, deleted_at)
            WHERE id = $1 AND status = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(deleted_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn extend_subscription_end(
        &self,
        id: Uuid,
        expected_end: OffsetDateTime,
        new_end: OffsetDateTime,
    ) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET end_date = $3
            WHERE id = $1 AND end_date = $2 AND status = 'active' AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(expected_end)
        .bind(new_end)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn soft_delete_subscription(&self, id: Uuid, at: OffsetDateTime) -> BillingResult<bool> {
        let result = sqlx::query(
            "UPDATE subscriptions SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_branches(&self, business_id: Uuid) -> BillingResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM branches WHERE business_id = $1 AND deleted_at IS NULL",
        )
        .bind(business_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn count_products(&self, business_id: Uuid) -> BillingResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM products WHERE business_id = $1 AND deleted_at IS NULL",
        )
        .bind(business_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn record_payment(
        &self,
        payment: NewPayment,
        classify: PaymentClassifier<'_>,
    ) -> BillingResult<Payment> {
        let mut tx = self.pool.begin().await?;

        // Lock the subscription row so tier and branch count cannot shift under us
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(payment.subscription_id)
        .fetch_optional(&mut *tx)
        .await?;
        let subscription = row
            .map(Subscription::try_from)
            .transpose()?
            .ok_or(BillingError::SubscriptionNotFound(payment.subscription_id))?;

        let branches: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM branches WHERE business_id = $1 AND deleted_at IS NULL",
        )
        .bind(subscription.business_id)
        .fetch_one(&mut *tx)
        .await?;

        let status = classify(&subscription, branches)?;

        let row: PaymentRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO payments (id, subscription_id, amount_cents, date, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(payment.id)
        .bind(payment.subscription_id)
        .bind(payment.amount_cents)
        .bind(payment.date)
        .bind(status.as_str())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Payment::try_from(row)
    }

    async fn get_payment(&self, id: Uuid) -> BillingResult<Option<Payment>> {
        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE id = $1 AND deleted_at IS NULL",
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Payment::try_from).transpose()
    }

    async fn list_payments(&self) -> BillingResult<Vec<Payment>> {
        let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE deleted_at IS NULL ORDER BY date DESC",
            PAYMENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn list_payments_by_subscription(
        &self,
        subscription_id: Uuid,
    ) -> BillingResult<Vec<Payment>> {
        let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM payments
            WHERE subscription_id = $1 AND deleted_at IS NULL
            ORDER BY date
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(subscription_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn update_payment(&self, payment: &Payment) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payments SET amount_cents = $2, date = $3, status = $4
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(payment.id)
        .bind(payment.amount_cents)
        .bind(payment.date)
        .bind(payment.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn transition_payment(
        &self,
        id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
    ) -> BillingResult<bool> {
        let result = sqlx::query(
            "UPDATE payments SET status = $3 WHERE id = $1 AND status = $2 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn soft_delete_payment(&self, id: Uuid, at: OffsetDateTime) -> BillingResult<bool> {
        let result = sqlx::query(
            "UPDATE payments SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_invoice(&self, invoice: &Invoice) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO invoices (id, payment_id, user_id, amount_cents, issue_date, due_date, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(invoice.id)
        .bind(invoice.payment_id)
        .bind(invoice.user_id)
        .bind(invoice.amount_cents)
        .bind(invoice.issue_date)
        .bind(invoice.due_date)
        .bind(invoice.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_invoice(&self, id: Uuid) -> BillingResult<Option<Invoice>> {
        let row: Option<InvoiceRow> = sqlx::query_as(
            r#"
            SELECT id, payment_id, user_id, amount_cents, issue_date, due_date, status
            FROM invoices WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Invoice::try_from).transpose()
    }

    async fn unpaid_invoice_notices(
        &self,
        due_from: Option<OffsetDateTime>,
        due_until: OffsetDateTime,
    ) -> BillingResult<Vec<InvoiceNotice>> {
        let rows: Vec<InvoiceNoticeRow> = sqlx::query_as(
            r#"
            SELECT i.id AS invoice_id, i.due_date, p.amount_cents, u.id AS user_id, u.email
            FROM invoices i
            JOIN payments p ON p.id = i.payment_id
            JOIN subscriptions s ON s.id = p.subscription_id
            JOIN businesses b ON b.id = s.business_id
            JOIN users u ON u.id = b.vendor_id
            WHERE i.status <> 'paid'
              AND i.deleted_at IS NULL
              AND i.due_date <= $2
              AND ($1::timestamptz IS NULL OR i.due_date >= $1)
            ORDER BY i.due_date
            "#,
        )
        .bind(due_from)
        .bind(due_until)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| InvoiceNotice {
                invoice_id: r.invoice_id,
                due_date: r.due_date,
                amount_cents: r.amount_cents,
                user_id: r.user_id,
                email: r.email,
            })
            .collect())
    }

    async fn insert_notification(&self, notification: &Notification) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, invoice_id, type, message, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            "#,
        )
        .bind(notification.id)
        .bind(notification.user_id)
        .bind(notification.invoice_id)
        .bind(notification.notification_type.as_str())
        .bind(&notification.message)
        .bind(notification.status.as_str())
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
