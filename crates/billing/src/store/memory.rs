//! In-memory [`BillingStore`] for tests and local development

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;
use vendorbill_shared::SubscriptionTier;

use super::{BillingStore, PaymentClassifier};
use crate::error::{BillingError, BillingResult};
use crate::models::{
    Branch, Business, Invoice, InvoiceNotice, InvoiceStatus, NewPayment, Notification, Payment,
    PaymentStatus, Product, Subscription, SubscriptionStatus, User,
};

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    businesses: HashMap<Uuid, Business>,
    branches: HashMap<Uuid, Branch>,
    products: HashMap<Uuid, Product>,
    subscriptions: HashMap<Uuid, Subscription>,
    payments: HashMap<Uuid, Payment>,
    invoices: HashMap<Uuid, Invoice>,
    notifications: Vec<Notification>,
}

/// Store backed by hash maps behind one lock.
///
/// Every trait method takes the lock once, so each call is atomic with respect to
/// the others, including `record_payment`.
#[derive(Clone, Default)]
pub struct InMemoryBillingStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, name: &str, email: &str) -> Uuid {
        let user = User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
        };
        let id = user.id;
        self.state.write().await.users.insert(id, user);
        id
    }

    pub async fn add_business(&self, vendor_id: Uuid, name: &str) -> Uuid {
        let business = Business {
            id: Uuid::new_v4(),
            vendor_id,
            name: name.to_string(),
        };
        let id = business.id;
        self.state.write().await.businesses.insert(id, business);
        id
    }

    pub async fn add_branch(&self, business_id: Uuid, location: &str) -> Uuid {
        let branch = Branch {
            id: Uuid::new_v4(),
            business_id,
            location: location.to_string(),
        };
        let id = branch.id;
        self.state.write().await.branches.insert(id, branch);
        id
    }

    pub async fn add_product(&self, business_id: Uuid, name: &str) -> Uuid {
        let product = Product {
            id: Uuid::new_v4(),
            business_id,
            name: name.to_string(),
            deleted_at: None,
        };
        let id = product.id;
        self.state.write().await.products.insert(id, product);
        id
    }

    pub async fn delete_product(&self, id: Uuid, at: OffsetDateTime) -> bool {
        match self.state.write().await.products.get_mut(&id) {
            Some(product) => {
                product.deleted_at = Some(at);
                true
            }
            None => false,
        }
    }

    /// Payments including soft-deleted ones
    pub async fn payment_count(&self) -> usize {
        self.state.read().await.payments.len()
    }

    pub async fn set_invoice_status(&self, id: Uuid, status: InvoiceStatus) -> bool {
        match self.state.write().await.invoices.get_mut(&id) {
            Some(invoice) => {
                invoice.status = status;
                true
            }
            None => false,
        }
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.state.read().await.notifications.clone()
    }
}

fn live_subscription(state: &mut State, id: Uuid) -> Option<&mut Subscription> {
    state.subscriptions.get_mut(&id).filter(|s| !s.is_deleted())
}

fn live_payment(state: &mut State, id: Uuid) -> Option<&mut Payment> {
    state.payments.get_mut(&id).filter(|p| p.deleted_at.is_none())
}

fn count_branches(state: &State, business_id: Uuid) -> i64 {
    state
        .branches
        .values()
        .filter(|b| b.business_id == business_id)
        .count() as i64
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn insert_subscription(&self, subscription: &Subscription) -> BillingResult<()> {
        let mut state = self.state.write().await;
        if state.subscriptions.contains_key(&subscription.id) {
            return Err(BillingError::Database(format!(
                "duplicate subscription id {}",
                subscription.id
            )));
        }
        state
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn get_subscription(&self, id: Uuid) -> BillingResult<Option<Subscription>> {
        Ok(self.state.read().await.subscriptions.get(&id).cloned())
    }

    async fn list_active_subscriptions_ended_before(
        &self,
        cutoff: OffsetDateTime,
    ) -> BillingResult<Vec<Subscription>> {
        let state = self.state.read().await;
        let mut subs: Vec<Subscription> = state
            .subscriptions
            .values()
            .filter(|s| s.is_active() && !s.is_deleted())
            .filter(|s| s.end_date.is_some_and(|end| end < cutoff))
            .cloned()
            .collect();
        subs.sort_by_key(|s| s.end_date);
        Ok(subs)
    }

    async fn update_subscription_terms(
        &self,
        id: Uuid,
        tier: SubscriptionTier,
        end_date: Option<OffsetDateTime>,
    ) -> BillingResult<bool> {
        let mut state = self.state.write().await;
        Ok(match live_subscription(&mut state, id) {
            Some(sub) => {
                sub.tier = tier;
                sub.end_date = end_date;
                true
            }
            None => false,
        })
    }

    async fn set_subscription_tier(&self, id: Uuid, tier: SubscriptionTier) -> BillingResult<bool> {
        let mut state = self.state.write().await;
        Ok(match live_subscription(&mut state, id) {
            Some(sub) => {
                sub.tier = tier;
                true
            }
            None => false,
        })
    }

    async fn transition_subscription(
        &self,
        id: Uuid,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
        deleted_at: Option<OffsetDateTime>,
    ) -> BillingResult<bool> {
        let mut state = self.state.write().await;
        Ok(match live_subscription(&mut state, id) {
            Some(sub) if sub.status == from => {
                sub.status = to;
                if deleted_at.is_some() {
                    sub.deleted_at = deleted_at;
                }
                true
            }
            _ => false,
        })
    }

    async fn extend_subscription_end(
        &self,
        id: Uuid,
        expected_end: OffsetDateTime,
        new_end: OffsetDateTime,
    ) -> BillingResult<bool> {
        let mut state = self.state.write().await;
        Ok(match live_subscription(&mut state, id) {
            Some(sub) if sub.is_active() && sub.end_date == Some(expected_end) => {
                sub.end_date = Some(new_end);
                true
            }
            _ => false,
        })
    }

    async fn soft_delete_subscription(&self, id: Uuid, at: OffsetDateTime) -> BillingResult<bool> {
        let mut state = self.state.write().await;
        Ok(match live_subscription(&mut state, id) {
            Some(sub) => {
                sub.deleted_at = Some(at);
                true
            }
            None => false,
        })
    }

    async fn count_branches(&self, business_id: Uuid) -> BillingResult<i64> {
        Ok(count_branches(&*self.state.read().await, business_id))
    }

    async fn count_products(&self, business_id: Uuid) -> BillingResult<i64> {
        let state = self.state.read().await;
        Ok(state
            .products
            .values()
            .filter(|p| p.business_id == business_id && p.deleted_at.is_none())
            .count() as i64)
    }

    async fn record_payment(
        &self,
        payment: NewPayment,
        classify: PaymentClassifier<'_>,
    ) -> BillingResult<Payment> {
        let mut state = self.state.write().await;

        let subscription = state
            .subscriptions
            .get(&payment.subscription_id)
            .filter(|s| !s.is_deleted())
            .cloned()
            .ok_or(BillingError::SubscriptionNotFound(payment.subscription_id))?;
        let branches = count_branches(&state, subscription.business_id);
        let status = classify(&subscription, branches)?;

        let record = Payment {
            id: payment.id,
            subscription_id: payment.subscription_id,
            amount_cents: payment.amount_cents,
            date: payment.date,
            status,
            deleted_at: None,
        };
        state.payments.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_payment(&self, id: Uuid) -> BillingResult<Option<Payment>> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .get(&id)
            .filter(|p| p.deleted_at.is_none())
            .cloned())
    }

    async fn list_payments(&self) -> BillingResult<Vec<Payment>> {
        let state = self.state.read().await;
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.deleted_at.is_none())
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(payments)
    }

    async fn list_payments_by_subscription(
        &self,
        subscription_id: Uuid,
    ) -> BillingResult<Vec<Payment>> {
        let state = self.state.read().await;
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.subscription_id == subscription_id && p.deleted_at.is_none())
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.date);
        Ok(payments)
    }

    async fn update_payment(&self, payment: &Payment) -> BillingResult<bool> {
        let mut state = self.state.write().await;
        Ok(match live_payment(&mut state, payment.id) {
            Some(existing) => {
                existing.amount_cents = payment.amount_cents;
                existing.date = payment.date;
                existing.status = payment.status;
                true
            }
            None => false,
        })
    }

    async fn transition_payment(
        &self,
        id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
    ) -> BillingResult<bool> {
        let mut state = self.state.write().await;
        Ok(match live_payment(&mut state, id) {
            Some(payment) if payment.status == from => {
                payment.status = to;
                true
            }
            _ => false,
        })
    }

    async fn soft_delete_payment(&self, id: Uuid, at: OffsetDateTime) -> BillingResult<bool> {
        let mut state = self.state.write().await;
        Ok(match live_payment(&mut state, id) {
            Some(payment) => {
                payment.deleted_at = Some(at);
                true
            }
            None => false,
        })
    }

    async fn insert_invoice(&self, invoice: &Invoice) -> BillingResult<()> {
        self.state
            .write()
            .await
            .invoices
            .insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn get_invoice(&self, id: Uuid) -> BillingResult<Option<Invoice>> {
        Ok(self.state.read().await.invoices.get(&id).cloned())
    }

    async fn unpaid_invoice_notices(
        &self,
        due_from: Option<OffsetDateTime>,
        due_until: OffsetDateTime,
    ) -> BillingResult<Vec<InvoiceNotice>> {
        let state = self.state.read().await;
        let mut notices: Vec<InvoiceNotice> = state
            .invoices
            .values()
            .filter(|i| i.status != InvoiceStatus::Paid)
            .filter(|i| i.due_date <= due_until && due_from.is_none_or(|from| i.due_date >= from))
            .filter_map(|invoice| {
                let payment = state.payments.get(&invoice.payment_id)?;
                let subscription = state.subscriptions.get(&payment.subscription_id)?;
                let business = state.businesses.get(&subscription.business_id)?;
                let vendor = state.users.get(&business.vendor_id)?;
                Some(InvoiceNotice {
                    invoice_id: invoice.id,
                    due_date: invoice.due_date,
                    amount_cents: payment.amount_cents,
                    user_id: vendor.id,
                    email: vendor.email.clone(),
                })
            })
            .collect();
        notices.sort_by_key(|n| n.due_date);
        Ok(notices)
    }

    async fn insert_notification(&self, notification: &Notification) -> BillingResult<()> {
        self.state
            .write()
            .await
            .notifications
            .push(notification.clone());
        Ok(())
    }
}
