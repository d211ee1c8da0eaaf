//! Payment gateways
//!
//! A gateway charges a customer and hands back the provider's reference once the
//! provider has confirmed the funds. Cards go through Stripe, mobile money through
//! Safaricom's Daraja STK push.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use time::macros::{format_description, offset};
use time::OffsetDateTime;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;

use crate::error::{BillingError, BillingResult};

/// How the customer pays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PaymentMethod {
    /// A Stripe payment method collected on the client, e.g. `pm_...`
    Card { payment_method_id: String },
    MobileMoney { phone_number: String },
}

impl PaymentMethod {
    pub fn name(&self) -> &'static str {
        match self {
            PaymentMethod::Card { .. } => "card",
            PaymentMethod::MobileMoney { .. } => "mobile_money",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub amount_cents: i64,
    /// Lowercase ISO code
    pub currency: String,
    pub description: String,
    /// Our reference, echoed back by providers that support it
    pub reference: String,
    pub method: PaymentMethod,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    /// Charge the customer, returning the provider's transaction reference.
    ///
    /// Only returns `Ok` once the provider reports the charge as paid.
    async fn charge(&self, request: &ChargeRequest) -> BillingResult<String>;
}

/// Gateways keyed by payment method; an absent entry means the method is disabled
#[derive(Clone, Default)]
pub struct Gateways {
    card: Option<Arc<dyn PaymentGateway>>,
    mobile_money: Option<Arc<dyn PaymentGateway>>,
}

impl Gateways {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_card(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.card = Some(gateway);
        self
    }

    pub fn with_mobile_money(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.mobile_money = Some(gateway);
        self
    }

    /// Build from environment, leaving out any gateway that is not configured
    pub fn from_env() -> Self {
        let mut gateways = Self::new();

        match StripeGateway::from_env() {
            Ok(stripe) => gateways.card = Some(Arc::new(stripe)),
            Err(e) => tracing::warn!(error = %e, "Card payments disabled"),
        }
        match MpesaGateway::from_env() {
            Ok(mpesa) => gateways.mobile_money = Some(Arc::new(mpesa)),
            Err(e) => tracing::warn!(error = %e, "Mobile money payments disabled"),
        }

        gateways
    }

    pub fn for_method(&self, method: &PaymentMethod) -> BillingResult<&Arc<dyn PaymentGateway>> {
        let gateway = match method {
            PaymentMethod::Card { .. } => self.card.as_ref(),
            PaymentMethod::MobileMoney { .. } => self.mobile_money.as_ref(),
        };
        gateway.ok_or_else(|| BillingError::UnsupportedPaymentMethod(method.name().to_string()))
    }
}

// =============================================================================
// Stripe
// =============================================================================

pub struct StripeGateway {
    client: stripe::Client,
}

impl StripeGateway {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            client: stripe::Client::new(secret_key),
        }
    }

    pub fn from_env() -> BillingResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?;
        Ok(Self::new(secret_key))
    }
}

fn stripe_currency(code: &str) -> BillingResult<stripe::Currency> {
    match code {
        "usd" => Ok(stripe::Currency::USD),
        "eur" => Ok(stripe::Currency::EUR),
        "gbp" => Ok(stripe::Currency::GBP),
        "kes" => Ok(stripe::Currency::KES),
        other => Err(BillingError::Config(format!(
            "currency '{}' is not enabled for card payments",
            other
        ))),
    }
}

/// Accept a confirmed payment intent only once Stripe reports it as succeeded
fn ensure_intent_succeeded(
    intent_id: &str,
    status: stripe::PaymentIntentStatus,
) -> BillingResult<String> {
    match status {
        stripe::PaymentIntentStatus::Succeeded => Ok(intent_id.to_string()),
        other => Err(BillingError::Gateway(format!(
            "Stripe payment intent {} not settled: {}",
            intent_id,
            other.as_str()
        ))),
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn name(&self) -> &'static str {
        "stripe"
    }

    async fn charge(&self, request: &ChargeRequest) -> BillingResult<String> {
        let PaymentMethod::Card { payment_method_id } = &request.method else {
            return Err(BillingError::UnsupportedPaymentMethod(
                request.method.name().to_string(),
            ));
        };
        let payment_method = payment_method_id
            .parse::<stripe::PaymentMethodId>()
            .map_err(|e| {
                BillingError::InvalidPaymentMethod(format!("Invalid card payment method: {}", e))
            })?;
        let currency = stripe_currency(&request.currency)?;

        let mut params = stripe::CreatePaymentIntent::new(request.amount_cents, currency);
        params.description = Some(&request.description);
        params.metadata = Some(
            [("reference".to_string(), request.reference.clone())]
                .into_iter()
                .collect(),
        );
        params.payment_method = Some(payment_method);
        params.payment_method_types = Some(vec!["card".to_string()]);
        params.confirm = Some(true);

        let intent = stripe::PaymentIntent::create(&self.client, params).await?;

        tracing::info!(
            payment_intent = %intent.id,
            amount_cents = request.amount_cents,
            status = intent.status.as_str(),
            "Stripe payment intent confirmed"
        );

        ensure_intent_succeeded(intent.id.as_str(), intent.status)
    }
}

// =============================================================================
// M-Pesa (Daraja STK push)
// =============================================================================

#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    pub callback_url: String,
    /// STK status queries made while the customer has not yet answered the prompt
    pub confirm_attempts: usize,
    pub confirm_interval: Duration,
}

impl MpesaConfig {
    pub fn from_env() -> BillingResult<Self> {
        let var = |key: &str| {
            std::env::var(key).map_err(|_| BillingError::Config(format!("{} not set", key)))
        };
        Ok(Self {
            base_url: std::env::var("MPESA_BASE_URL")
                .unwrap_or_else(|_| "https://sandbox.safaricom.co.ke".to_string()),
            consumer_key: var("MPESA_CONSUMER_KEY")?,
            consumer_secret: var("MPESA_CONSUMER_SECRET")?,
            shortcode: var("MPESA_SHORTCODE")?,
            passkey: var("MPESA_PASSKEY")?,
            callback_url: var("MPESA_CALLBACK_URL")?,
            confirm_attempts: std::env::var("MPESA_CONFIRM_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(12),
            confirm_interval: Duration::from_millis(
                std::env::var("MPESA_CONFIRM_INTERVAL_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5_000),
            ),
        })
    }
}

pub struct MpesaGateway {
    config: MpesaConfig,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct AccessToken {
    access_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushRequest<'a> {
    business_short_code: &'a str,
    password: String,
    timestamp: String,
    transaction_type: &'static str,
    amount: i64,
    party_a: &'a str,
    party_b: &'a str,
    phone_number: &'a str,
    #[serde(rename = "CallBackURL")]
    callback_url: &'a str,
    account_reference: &'a str,
    transaction_desc: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushResponse {
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
    response_code: String,
    response_description: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkQueryRequest<'a> {
    business_short_code: &'a str,
    password: String,
    timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StkQueryResponse {
    result_code: Option<String>,
    result_desc: Option<String>,
}

/// Daraja error code while the customer has not answered the STK prompt
const STK_STILL_PROCESSING: &str = "500.001.1001";

enum StkQueryError {
    Pending,
    Failed(String),
}

/// Daraja password: base64 of shortcode, passkey and timestamp concatenated
pub fn stk_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    BASE64.encode(format!("{}{}{}", shortcode, passkey, timestamp))
}

/// `YYYYMMDDHHmmss` in East Africa Time, as Daraja expects
pub fn stk_timestamp(at: OffsetDateTime) -> BillingResult<String> {
    at.to_offset(offset!(+3))
        .format(format_description!(
            "[year][month][day][hour][minute][second]"
        ))
        .map_err(|e| BillingError::Gateway(format!("timestamp format: {}", e)))
}

impl MpesaGateway {
    pub fn new(config: MpesaConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(MpesaConfig::from_env()?))
    }

    async fn access_token(&self) -> BillingResult<String> {
        let response = self
            .client
            .get(format!(
                "{}/oauth/v1/generate",
                self.config.base_url.trim_end_matches('/')
            ))
            .query(&[("grant_type", "client_credentials")])
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await
            .map_err(|e| BillingError::Gateway(format!("M-Pesa auth request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, error_body = %body, "M-Pesa auth failed");
            return Err(BillingError::Gateway(format!(
                "M-Pesa auth error ({}): {}",
                status, body
            )));
        }

        let token: AccessToken = response
            .json()
            .await
            .map_err(|e| BillingError::Gateway(format!("M-Pesa auth response: {}", e)))?;
        Ok(token.access_token)
    }

    /// One STK status query: `Ok` when paid, `Pending` while the prompt is open
    async fn query_stk(&self, token: &str, checkout_request_id: &str) -> Result<(), StkQueryError> {
        let timestamp = stk_timestamp(OffsetDateTime::now_utc())
            .map_err(|e| StkQueryError::Failed(e.to_string()))?;
        let body = StkQueryRequest {
            business_short_code: &self.config.shortcode,
            password: stk_password(&self.config.shortcode, &self.config.passkey, &timestamp),
            timestamp,
            checkout_request_id,
        };

        let response = self
            .client
            .post(format!(
                "{}/mpesa/stkpushquery/v1/query",
                self.config.base_url.trim_end_matches('/')
            ))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(checkout_request_id = %checkout_request_id, error = %e, "M-Pesa STK query failed");
                StkQueryError::Pending
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            if text.contains(STK_STILL_PROCESSING) || status.is_server_error() {
                return Err(StkQueryError::Pending);
            }
            return Err(StkQueryError::Failed(format!(
                "M-Pesa query error ({}): {}",
                status, text
            )));
        }

        let result: StkQueryResponse = serde_json::from_str(&text)
            .map_err(|e| StkQueryError::Failed(format!("M-Pesa query response: {}", e)))?;
        match result.result_code.as_deref() {
            Some("0") => Ok(()),
            Some(code) => Err(StkQueryError::Failed(format!(
                "M-Pesa payment not completed ({}): {}",
                code,
                result.result_desc.unwrap_or_default()
            ))),
            None => Err(StkQueryError::Pending),
        }
    }

    /// Poll the STK status until the customer pays, declines, or the attempts run out
    async fn confirm_stk(&self, token: &str, checkout_request_id: &str) -> BillingResult<()> {
        let strategy = FixedInterval::new(self.config.confirm_interval)
            .take(self.config.confirm_attempts);

        RetryIf::spawn(
            strategy,
            || self.query_stk(token, checkout_request_id),
            |e: &StkQueryError| matches!(e, StkQueryError::Pending),
        )
        .await
        .map_err(|e| match e {
            StkQueryError::Pending => BillingError::Gateway(format!(
                "M-Pesa payment {} was not confirmed in time",
                checkout_request_id
            )),
            StkQueryError::Failed(message) => BillingError::Gateway(message),
        })
    }
}

#[async_trait]
impl PaymentGateway for MpesaGateway {
    fn name(&self) -> &'static str {
        "mpesa"
    }

    async fn charge(&self, request: &ChargeRequest) -> BillingResult<String> {
        let PaymentMethod::MobileMoney { phone_number } = &request.method else {
            return Err(BillingError::UnsupportedPaymentMethod(
                request.method.name().to_string(),
            ));
        };
        if request.amount_cents % 100 != 0 {
            return Err(BillingError::InvalidAmount(
                "M-Pesa only accepts whole currency units".to_string(),
            ));
        }

        let token = self.access_token().await?;
        let timestamp = stk_timestamp(OffsetDateTime::now_utc())?;
        let body = StkPushRequest {
            business_short_code: &self.config.shortcode,
            password: stk_password(&self.config.shortcode, &self.config.passkey, &timestamp),
            timestamp,
            transaction_type: "CustomerPayBillOnline",
            amount: request.amount_cents / 100,
            party_a: phone_number,
            party_b: &self.config.shortcode,
            phone_number,
            callback_url: &self.config.callback_url,
            account_reference: &request.reference,
            transaction_desc: &request.description,
        };

        let response = self
            .client
            .post(format!(
                "{}/mpesa/stkpush/v1/processrequest",
                self.config.base_url.trim_end_matches('/')
            ))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|e| BillingError::Gateway(format!("M-Pesa STK push failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, error_body = %body, "M-Pesa STK push rejected");
            return Err(BillingError::Gateway(format!(
                "M-Pesa error ({}): {}",
                status, body
            )));
        }

        let push: StkPushResponse = response
            .json()
            .await
            .map_err(|e| BillingError::Gateway(format!("M-Pesa response: {}", e)))?;
        if push.response_code != "0" {
            return Err(BillingError::Gateway(format!(
                "M-Pesa declined: {}",
                push.response_description
            )));
        }

        tracing::info!(
            checkout_request_id = %push.checkout_request_id,
            amount_cents = request.amount_cents,
            "M-Pesa STK push accepted"
        );

        self.confirm_stk(&token, &push.checkout_request_id).await?;

        tracing::info!(
            checkout_request_id = %push.checkout_request_id,
            "M-Pesa payment confirmed"
        );

        Ok(push.checkout_request_id)
    }
}

// =============================================================================
// Recording gateway
// =============================================================================

/// Gateway that records charges in memory; for tests and local development
#[derive(Default)]
pub struct RecordingGateway {
    failure: Option<String>,
    charges: Mutex<Vec<ChargeRequest>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// A gateway that declines every charge with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            charges: Mutex::new(Vec::new()),
        }
    }

    pub fn charges(&self) -> Vec<ChargeRequest> {
        self.charges
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn charge(&self, request: &ChargeRequest) -> BillingResult<String> {
        if let Some(message) = &self.failure {
            return Err(BillingError::Gateway(message.clone()));
        }
        let mut charges = self.charges.lock().unwrap_or_else(|e| e.into_inner());
        charges.push(request.clone());
        Ok(format!("rec_{}_{}", charges.len(), request.amount_cents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use time::macros::datetime;

    fn mobile_request(amount_cents: i64) -> ChargeRequest {
        ChargeRequest {
            amount_cents,
            currency: "kes".into(),
            description: "Subscription payment".into(),
            reference: "sub-123".into(),
            method: PaymentMethod::MobileMoney {
                phone_number: "254712345678".into(),
            },
        }
    }

    fn mpesa_config(base_url: String) -> MpesaConfig {
        MpesaConfig {
            base_url,
            consumer_key: "key".into(),
            consumer_secret: "secret".into(),
            shortcode: "174379".into(),
            passkey: "passkey".into(),
            callback_url: "https://example.test/callback".into(),
            confirm_attempts: 2,
            confirm_interval: Duration::from_millis(1),
        }
    }

    fn card_request(payment_method_id: &str) -> ChargeRequest {
        ChargeRequest {
            amount_cents: 300,
            currency: "usd".into(),
            description: "Pro subscription payment".into(),
            reference: "sub-123".into(),
            method: PaymentMethod::Card {
                payment_method_id: payment_method_id.into(),
            },
        }
    }

    async fn mock_auth(server: &mut mockito::ServerGuard) -> mockito::Mock {
        server
            .mock("GET", "/oauth/v1/generate")
            .match_query(Matcher::UrlEncoded(
                "grant_type".into(),
                "client_credentials".into(),
            ))
            .with_status(200)
            .with_body(r#"{"access_token":"tok","expires_in":"3599"}"#)
            .create_async()
            .await
    }

    async fn mock_accepted_push(server: &mut mockito::ServerGuard) -> mockito::Mock {
        server
            .mock("POST", "/mpesa/stkpush/v1/processrequest")
            .match_header("authorization", "Bearer tok")
            .match_body(Matcher::PartialJsonString(
                r#"{"Amount":500,"PhoneNumber":"254712345678","AccountReference":"sub-123"}"#
                    .into(),
            ))
            .with_status(200)
            .with_body(
                r#"{"MerchantRequestID":"m-1","CheckoutRequestID":"ws_CO_1","ResponseCode":"0","ResponseDescription":"Success","CustomerMessage":"ok"}"#,
            )
            .create_async()
            .await
    }

    #[test]
    fn test_stk_timestamp_is_east_africa_time() {
        let ts = stk_timestamp(datetime!(2024-06-01 21:30:05 UTC)).unwrap();
        assert_eq!(ts, "20240602003005");
    }

    #[test]
    fn test_stk_password() {
        assert_eq!(
            stk_password("174379", "pk", "20240101000000"),
            BASE64.encode("174379pk20240101000000")
        );
    }

    #[test]
    fn test_disabled_method_is_unsupported() {
        let gateways = Gateways::new().with_card(Arc::new(RecordingGateway::new()));
        assert!(gateways
            .for_method(&PaymentMethod::Card {
                payment_method_id: "pm_card_visa".into()
            })
            .is_ok());

        let err = gateways
            .for_method(&PaymentMethod::MobileMoney {
                phone_number: "254700000000".into(),
            })
            .err()
            .unwrap();
        assert!(matches!(err, BillingError::UnsupportedPaymentMethod(m) if m == "mobile_money"));
    }

    #[test]
    fn test_payment_method_json_shape() {
        let method: PaymentMethod =
            serde_json::from_str(r#"{"method":"mobile_money","phone_number":"254700000000"}"#)
                .unwrap();
        assert_eq!(
            method,
            PaymentMethod::MobileMoney {
                phone_number: "254700000000".into()
            }
        );
        let card: PaymentMethod =
            serde_json::from_str(r#"{"method":"card","payment_method_id":"pm_card_visa"}"#)
                .unwrap();
        assert_eq!(
            card,
            PaymentMethod::Card {
                payment_method_id: "pm_card_visa".into()
            }
        );
        assert!(serde_json::from_str::<PaymentMethod>(r#"{"method":"card"}"#).is_err());
    }

    #[test]
    fn test_only_succeeded_intent_is_accepted() {
        assert_eq!(
            ensure_intent_succeeded("pi_1", stripe::PaymentIntentStatus::Succeeded).unwrap(),
            "pi_1"
        );
        for status in [
            stripe::PaymentIntentStatus::RequiresAction,
            stripe::PaymentIntentStatus::RequiresPaymentMethod,
            stripe::PaymentIntentStatus::Processing,
        ] {
            let err = ensure_intent_succeeded("pi_1", status).unwrap_err();
            assert!(matches!(err, BillingError::Gateway(m) if m.contains("not settled")));
        }
    }

    #[tokio::test]
    async fn test_stripe_rejects_malformed_payment_method_before_calling_out() {
        let gateway = StripeGateway::new("sk_test_123");
        let err = gateway.charge(&card_request("not-a-method")).await.unwrap_err();
        assert!(matches!(err, BillingError::InvalidPaymentMethod(_)));
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn test_unknown_stripe_currency_rejected() {
        assert!(stripe_currency("usd").is_ok());
        assert!(matches!(stripe_currency("xyz"), Err(BillingError::Config(_))));
    }

    #[tokio::test]
    async fn test_mpesa_confirmed_payment_returns_checkout_id() {
        let mut server = mockito::Server::new_async().await;
        let auth = mock_auth(&mut server).await;
        let push = mock_accepted_push(&mut server).await;
        let query = server
            .mock("POST", "/mpesa/stkpushquery/v1/query")
            .match_header("authorization", "Bearer tok")
            .match_body(Matcher::PartialJsonString(
                r#"{"BusinessShortCode":"174379","CheckoutRequestID":"ws_CO_1"}"#.into(),
            ))
            .with_status(200)
            .with_body(
                r#"{"ResponseCode":"0","CheckoutRequestID":"ws_CO_1","ResultCode":"0","ResultDesc":"The service request is processed successfully."}"#,
            )
            .create_async()
            .await;

        let gateway = MpesaGateway::new(mpesa_config(server.url()));
        let reference = gateway.charge(&mobile_request(50_000)).await.unwrap();

        assert_eq!(reference, "ws_CO_1");
        auth.assert_async().await;
        push.assert_async().await;
        query.assert_async().await;
    }

    #[tokio::test]
    async fn test_mpesa_cancelled_prompt_is_gateway_error() {
        let mut server = mockito::Server::new_async().await;
        mock_auth(&mut server).await;
        mock_accepted_push(&mut server).await;
        let query = server
            .mock("POST", "/mpesa/stkpushquery/v1/query")
            .with_status(200)
            .with_body(
                r#"{"ResponseCode":"0","CheckoutRequestID":"ws_CO_1","ResultCode":"1032","ResultDesc":"Request cancelled by user"}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let gateway = MpesaGateway::new(mpesa_config(server.url()));
        let err = gateway.charge(&mobile_request(50_000)).await.unwrap_err();

        assert!(matches!(err, BillingError::Gateway(ref m) if m.contains("cancelled by user")));
        query.assert_async().await;
    }

    #[tokio::test]
    async fn test_mpesa_unanswered_prompt_is_gateway_error() {
        let mut server = mockito::Server::new_async().await;
        mock_auth(&mut server).await;
        mock_accepted_push(&mut server).await;
        let query = server
            .mock("POST", "/mpesa/stkpushquery/v1/query")
            .with_status(500)
            .with_body(
                r#"{"requestId":"r-1","errorCode":"500.001.1001","errorMessage":"The transaction is being processed"}"#,
            )
            .expect(3)
            .create_async()
            .await;

        let gateway = MpesaGateway::new(mpesa_config(server.url()));
        let err = gateway.charge(&mobile_request(50_000)).await.unwrap_err();

        assert!(matches!(err, BillingError::Gateway(ref m) if m.contains("not confirmed")));
        assert_eq!(err.kind(), crate::error::ErrorKind::Upstream);
        query.assert_async().await;
    }

    #[tokio::test]
    async fn test_mpesa_declined_push_is_gateway_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/oauth/v1/generate")
            .match_query(Matcher::Any)
            .with_body(r#"{"access_token":"tok"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/mpesa/stkpush/v1/processrequest")
            .with_body(
                r#"{"CheckoutRequestID":"ws_CO_2","ResponseCode":"1","ResponseDescription":"Insufficient balance"}"#,
            )
            .create_async()
            .await;

        let gateway = MpesaGateway::new(mpesa_config(server.url()));
        let err = gateway.charge(&mobile_request(100)).await.unwrap_err();
        assert!(matches!(err, BillingError::Gateway(m) if m.contains("Insufficient balance")));
    }

    #[tokio::test]
    async fn test_mpesa_rejects_fractional_amount_before_calling_out() {
        let gateway = MpesaGateway::new(mpesa_config("http://127.0.0.1:9".into()));
        let err = gateway.charge(&mobile_request(150)).await.unwrap_err();
        assert!(matches!(err, BillingError::InvalidAmount(_)));
    }

    #[tokio::test]
    async fn test_recording_gateway() {
        let gateway = RecordingGateway::new();
        let reference = gateway.charge(&mobile_request(300)).await.unwrap();
        assert_eq!(reference, "rec_1_300");
        assert_eq!(gateway.charges().len(), 1);

        let failing = RecordingGateway::failing("card declined");
        assert!(failing.charge(&mobile_request(300)).await.is_err());
    }
}
