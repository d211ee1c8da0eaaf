//! Invoices for completed payments

use std::sync::Arc;

use uuid::Uuid;
use vendorbill_shared::add_months;

use crate::error::{BillingError, BillingResult};
use crate::models::{Invoice, InvoiceStatus, PaymentStatus};
use crate::store::BillingStore;

#[derive(Clone)]
pub struct InvoiceService {
    store: Arc<dyn BillingStore>,
}

impl InvoiceService {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Issue an unpaid invoice dated at the payment, due one month later
    pub async fn generate_for_payment(&self, payment_id: Uuid, user_id: Uuid) -> BillingResult<Invoice> {
        let payment = self
            .store
            .get_payment(payment_id)
            .await?
            .ok_or(BillingError::PaymentNotFound(payment_id))?;

        if payment.status != PaymentStatus::Completed {
            return Err(BillingError::PaymentNotCompleted {
                id: payment_id,
                status: payment.status,
            });
        }

        let due_date = add_months(payment.date, 1).ok_or_else(|| {
            BillingError::InvalidDateRange(format!("no due date one month after {}", payment.date))
        })?;

        let invoice = Invoice {
            id: Uuid::new_v4(),
            payment_id,
            user_id,
            amount_cents: payment.amount_cents,
            issue_date: payment.date,
            due_date,
            status: InvoiceStatus::Unpaid,
        };
        self.store.insert_invoice(&invoice).await?;

        tracing::info!(
            invoice_id = %invoice.id,
            payment_id = %payment_id,
            due_date = %due_date,
            "Invoice generated"
        );

        Ok(invoice)
    }

    pub async fn get(&self, id: Uuid) -> BillingResult<Invoice> {
        self.store
            .get_invoice(id)
            .await?
            .ok_or(BillingError::InvoiceNotFound(id))
    }
}
