//! Outbound notifications
//!
//! Emails go out through Resend when an API key is configured; otherwise they are
//! only logged.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::error::{BillingError, BillingResult};

const RESEND_API_URL: &str = "https://api.resend.com";

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> BillingResult<()>;
}

/// Pick Resend when `RESEND_API_KEY` is set, the log notifier otherwise
pub fn notifier_from_env() -> std::sync::Arc<dyn Notifier> {
    match ResendNotifier::from_env() {
        Ok(resend) => std::sync::Arc::new(resend),
        Err(e) => {
            tracing::warn!(error = %e, "Email delivery disabled, notifications will only be logged");
            std::sync::Arc::new(LogNotifier)
        }
    }
}

pub struct ResendNotifier {
    client: reqwest::Client,
    api_key: String,
    from: String,
    base_url: String,
    max_retries: usize,
}

#[derive(Serialize)]
struct ResendEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
}

struct DeliveryError {
    retryable: bool,
    message: String,
}

impl ResendNotifier {
    pub fn new(api_key: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            from: from.into(),
            base_url: RESEND_API_URL.to_string(),
            max_retries: 3,
        }
    }

    pub fn from_env() -> BillingResult<Self> {
        let api_key = std::env::var("RESEND_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| BillingError::Config("RESEND_API_KEY not set".to_string()))?;
        let from = std::env::var("EMAIL_FROM")
            .unwrap_or_else(|_| "Vendorbill <billing@vendorbill.app>".to_string());
        Ok(Self::new(api_key, from))
    }

    /// Point at a different API host (used by tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    async fn deliver(&self, email: &ResendEmail<'_>) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(format!("{}/emails", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(email)
            .send()
            .await
            .map_err(|e| DeliveryError {
                retryable: true,
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError {
            retryable: status.is_server_error() || status.as_u16() == 429,
            message: format!("Resend API error ({}): {}", status, body),
        })
    }
}

#[async_trait]
impl Notifier for ResendNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> BillingResult<()> {
        let email = ResendEmail {
            from: &self.from,
            to: [to],
            subject,
            text: body,
        };

        let strategy = ExponentialBackoff::from_millis(10)
            .max_delay(Duration::from_secs(2))
            .map(jitter)
            .take(self.max_retries);

        RetryIf::spawn(
            strategy,
            || self.deliver(&email),
            |e: &DeliveryError| e.retryable,
        )
        .await
        .map_err(|e| {
            tracing::error!(to = %to, error = %e.message, "Email delivery failed");
            BillingError::Notification(e.message)
        })
    }
}

/// Writes notifications to the log instead of sending them
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> BillingResult<()> {
        tracing::info!(to = %to, subject = %subject, body = %body, "Notification (not emailed)");
        Ok(())
    }
}
