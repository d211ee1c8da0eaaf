//! Overdue remediation
//!
//! Suspends subscriptions left unpaid past their grace period and nudges vendors
//! about unpaid invoices. The batch runs never abort on a single bad row: failures
//! are logged, counted, and skipped.

use std::sync::Arc;

use serde::Serialize;
use time::macros::format_description;
use time::OffsetDateTime;
use uuid::Uuid;
use vendorbill_shared::Clock;

use crate::error::BillingResult;
use crate::models::{
    format_amount, InvoiceNotice, Notification, NotificationStatus, NotificationType,
    SubscriptionStatus,
};
use crate::notifications::Notifier;
use crate::policy::BillingPolicy;
use crate::store::BillingStore;
use crate::subscriptions::SubscriptionService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverdueOutcome {
    /// Grace period elapsed; the subscription is now suspended
    Suspended,
    /// Still inside the grace period (or no end date); nothing changed
    WithinGrace,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SuspensionRun {
    pub scanned: usize,
    pub suspended: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NotificationRun {
    pub scanned: usize,
    pub sent: usize,
    pub failed_deliveries: usize,
    pub failed_logs: usize,
}

fn format_due(at: OffsetDateTime) -> String {
    at.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| at.date().to_string())
}

#[derive(Clone)]
pub struct RemediationService {
    store: Arc<dyn BillingStore>,
    subscriptions: SubscriptionService,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    policy: BillingPolicy,
}

impl RemediationService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        subscriptions: SubscriptionService,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        policy: BillingPolicy,
    ) -> Self {
        Self {
            store,
            subscriptions,
            notifier,
            clock,
            policy,
        }
    }

    /// Suspend one subscription if it is active and past end date plus grace.
    ///
    /// Already suspended or canceled subscriptions fail with `SubscriptionInactive`
    /// on every call.
    pub async fn handle_overdue(&self, subscription_id: Uuid) -> BillingResult<OverdueOutcome> {
        let subscription = self.subscriptions.get(subscription_id).await?;
        subscription.require_active()?;

        let Some(end_date) = subscription.end_date else {
            return Ok(OverdueOutcome::WithinGrace);
        };
        if self.clock.now() <= end_date + self.policy.grace_period() {
            return Ok(OverdueOutcome::WithinGrace);
        }

        self.subscriptions
            .transition(&subscription, SubscriptionStatus::Suspended, None)
            .await?;

        tracing::warn!(
            subscription_id = %subscription_id,
            end_date = %end_date,
            grace_days = self.policy.grace_period_days,
            "Subscription suspended for non-payment"
        );

        Ok(OverdueOutcome::Suspended)
    }

    /// Suspend every active subscription past its grace period
    pub async fn suspend_overdue(&self) -> BillingResult<SuspensionRun> {
        let cutoff = self.clock.now() - self.policy.grace_period();
        let candidates = self
            .store
            .list_active_subscriptions_ended_before(cutoff)
            .await?;

        let mut run = SuspensionRun {
            scanned: candidates.len(),
            ..Default::default()
        };

        for subscription in candidates {
            match self.handle_overdue(subscription.id).await {
                Ok(OverdueOutcome::Suspended) => run.suspended += 1,
                Ok(OverdueOutcome::WithinGrace) => {}
                Err(e) => {
                    tracing::error!(
                        subscription_id = %subscription.id,
                        error = %e,
                        "Failed to suspend overdue subscription"
                    );
                    run.failed += 1;
                }
            }
        }

        tracing::info!(
            scanned = run.scanned,
            suspended = run.suspended,
            failed = run.failed,
            "Overdue suspension run complete"
        );
        Ok(run)
    }

    /// Remind vendors of unpaid invoices falling due within the lead time
    pub async fn send_reminders(&self) -> BillingResult<NotificationRun> {
        let now = self.clock.now();
        let notices = self
            .store
            .unpaid_invoice_notices(Some(now), now + self.policy.reminder_lead())
            .await?;
        Ok(self.dispatch(NotificationType::Reminder, notices).await)
    }

    /// Alert vendors of unpaid invoices already past due
    pub async fn send_late_alerts(&self) -> BillingResult<NotificationRun> {
        let now = self.clock.now();
        // The store bound is inclusive; anything due exactly now is not late yet
        let notices: Vec<InvoiceNotice> = self
            .store
            .unpaid_invoice_notices(None, now)
            .await?
            .into_iter()
            .filter(|n| n.due_date < now)
            .collect();
        Ok(self.dispatch(NotificationType::LateAlert, notices).await)
    }

    fn compose(&self, kind: NotificationType, notice: &InvoiceNotice) -> (&'static str, String) {
        let amount = format!(
            "{} {}",
            format_amount(notice.amount_cents),
            self.policy.currency.to_uppercase()
        );
        let due = format_due(notice.due_date);
        match kind {
            NotificationType::Reminder => (
                "Payment Reminder",
                format!("Reminder: Your payment of {} is due on {}.", amount, due),
            ),
            NotificationType::LateAlert => (
                "Late Payment Alert",
                format!(
                    "Your payment of {} was due on {} and is now overdue. Please pay to avoid suspension.",
                    amount, due
                ),
            ),
        }
    }

    async fn dispatch(&self, kind: NotificationType, notices: Vec<InvoiceNotice>) -> NotificationRun {
        let mut run = NotificationRun {
            scanned: notices.len(),
            ..Default::default()
        };

        for notice in notices {
            let (subject, message) = self.compose(kind, &notice);

            let status = match self.notifier.send(&notice.email, subject, &message).await {
                Ok(()) => {
                    run.sent += 1;
                    NotificationStatus::Sent
                }
                Err(e) => {
                    tracing::warn!(
                        invoice_id = %notice.invoice_id,
                        user_id = %notice.user_id,
                        error = %e,
                        "Failed to send {}",
                        kind
                    );
                    run.failed_deliveries += 1;
                    NotificationStatus::Failed
                }
            };

            let record = Notification {
                id: Uuid::new_v4(),
                user_id: notice.user_id,
                invoice_id: Some(notice.invoice_id),
                notification_type: kind,
                message,
                status,
                created_at: self.clock.now(),
            };
            if let Err(e) = self.store.insert_notification(&record).await {
                tracing::warn!(
                    invoice_id = %notice.invoice_id,
                    user_id = %notice.user_id,
                    error = %e,
                    "Failed to log notification"
                );
                run.failed_logs += 1;
            }
        }

        tracing::info!(
            kind = %kind,
            scanned = run.scanned,
            sent = run.sent,
            failed_deliveries = run.failed_deliveries,
            failed_logs = run.failed_logs,
            "Notification run complete"
        );
        run
    }
}
