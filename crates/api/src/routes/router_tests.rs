//! Router tests
//!
//! Drive the full router (auth middleware included) against the in-memory store.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};
    use time::macros::datetime;
    use time::{Duration, OffsetDateTime};
    use tower::ServiceExt;
    use uuid::Uuid;
    use vendorbill_billing::{
        BillingPolicy, BillingService, Gateways, InMemoryBillingStore, LogNotifier,
        RecordingGateway, RETRY_WITH_SUFFICIENT_FUNDS,
    };
    use vendorbill_shared::FixedClock;

    use crate::auth::JwtManager;
    use crate::routes::create_router;
    use crate::state::AppState;

    const NOW: OffsetDateTime = datetime!(2024-06-10 12:00 UTC);
    const SECRET: &str = "router-test-secret";

    struct TestApp {
        app: Router,
        store: InMemoryBillingStore,
        clock: Arc<FixedClock>,
        token: String,
        user_id: Uuid,
        business_id: Uuid,
    }

    async fn setup() -> TestApp {
        let store = InMemoryBillingStore::new();
        let clock = Arc::new(FixedClock::new(NOW));
        let billing = BillingService::new(
            Arc::new(store.clone()),
            Gateways::new().with_card(Arc::new(RecordingGateway::new())),
            Arc::new(LogNotifier),
            clock.clone(),
            BillingPolicy::default(),
        );

        let user_id = store.add_user("Amina", "amina@example.test").await;
        let business_id = store.add_business(user_id, "Amina's Kiosk").await;
        store.add_branch(business_id, "Nairobi CBD").await;

        let jwt_manager = JwtManager::new(SECRET, 24);
        let token = jwt_manager
            .generate_access_token(user_id, "amina@example.test", "vendor")
            .unwrap();

        TestApp {
            app: create_router(AppState::new(billing, jwt_manager)),
            store,
            clock,
            token,
            user_id,
            business_id,
        }
    }

    impl TestApp {
        async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            self.call_as(Some(&self.token), method, uri, body).await
        }

        async fn call_as(
            &self,
            token: Option<&str>,
            method: Method,
            uri: &str,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
            }
            let request = match body {
                Some(json) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(json.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };

            let response = self.app.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, value)
        }

        async fn subscribe(&self, tier: &str) -> Value {
            let (status, body) = self
                .call(
                    Method::POST,
                    "/subscriptions",
                    Some(json!({
                        "business_id": self.business_id,
                        "tier": tier,
                        "start_date": "2024-06-10T12:00:00Z",
                    })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED, "{}", body);
            body
        }

        async fn pay(&self, subscription_id: &Value, amount_cents: i64) -> Value {
            let (status, body) = self
                .call(
                    Method::POST,
                    "/payments",
                    Some(json!({
                        "subscription_id": subscription_id,
                        "amount_cents": amount_cents,
                        "date": "2024-06-10T12:00:00Z",
                    })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED, "{}", body);
            body
        }
    }

    // ==========================================================================
    // Authentication
    // ==========================================================================

    #[tokio::test]
    async fn test_health_is_public() {
        let app = setup().await;
        let (status, body) = app.call_as(None, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let app = setup().await;
        let (status, body) = app.call_as(None, Method::GET, "/payments", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], 401);
    }

    #[tokio::test]
    async fn test_token_from_other_secret_is_unauthorized() {
        let app = setup().await;
        let forged = JwtManager::new("someone-else", 24)
            .generate_access_token(app.user_id, "amina@example.test", "vendor")
            .unwrap();
        let (status, _) = app
            .call_as(Some(&forged), Method::GET, "/payments", None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    // ==========================================================================
    // Pricing
    // ==========================================================================

    #[tokio::test]
    async fn test_quote_includes_branch_fees() {
        let app = setup().await;
        let (status, body) = app
            .call(Method::GET, "/pricing/quote?tier=pro&branches=3", None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["amount_cents"], 600);
        assert_eq!(body["amount"], "6.00");
        assert_eq!(body["currency"], "usd");
    }

    #[tokio::test]
    async fn test_quote_unknown_tier_is_bad_request() {
        let app = setup().await;
        let (status, body) = app
            .call(Method::GET, "/pricing/quote?tier=Gold&branches=1", None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid subscription tier: Gold");
    }

    // ==========================================================================
    // Subscriptions
    // ==========================================================================

    #[tokio::test]
    async fn test_create_and_fetch_subscription() {
        let app = setup().await;
        let created = app.subscribe("starter").await;
        assert_eq!(created["tier"], "Starter");
        assert_eq!(created["status"], "active");
        assert_eq!(created["end_date"], "2024-07-10T12:00:00Z");

        let uri = format!("/subscriptions/{}", created["id"].as_str().unwrap());
        let (status, fetched) = app.call(Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_create_with_unknown_tier_is_bad_request() {
        let app = setup().await;
        let (status, _) = app
            .call(
                Method::POST,
                "/subscriptions",
                Some(json!({
                    "business_id": app.business_id,
                    "tier": "Platinum",
                    "start_date": "2024-06-10T12:00:00Z",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_subscription_is_not_found() {
        let app = setup().await;
        let uri = format!("/subscriptions/{}", Uuid::new_v4());
        let (status, body) = app.call(Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], 404);
    }

    #[tokio::test]
    async fn test_cancel_after_refund_window_is_policy_violation() {
        let app = setup().await;
        let created = app.subscribe("pro").await;
        app.clock.advance(Duration::days(8));

        let uri = format!("/subscriptions/{}/cancel", created["id"].as_str().unwrap());
        let (status, _) = app.call(Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_downgrade_refused_with_too_many_products() {
        let app = setup().await;
        let created = app.subscribe("pro").await;
        for i in 0..11 {
            app.store
                .add_product(app.business_id, &format!("Product {}", i))
                .await;
        }

        let uri = format!("/subscriptions/{}/downgrade", created["id"].as_str().unwrap());
        let (status, body) = app
            .call(Method::POST, &uri, Some(json!({ "tier": "Starter" })))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            body["error"],
            "Reduce product count to 10 or fewer before downgrading to Starter (currently 11)"
        );
    }

    #[tokio::test]
    async fn test_overdue_on_suspended_subscription_conflicts() {
        let app = setup().await;
        let created = app.subscribe("starter").await;
        let uri = format!("/subscriptions/{}/overdue", created["id"].as_str().unwrap());

        app.clock.set(datetime!(2024-07-18 12:00 UTC));
        let (status, body) = app.call(Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "suspended");

        let (status, _) = app.call(Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    // ==========================================================================
    // Payments
    // ==========================================================================

    #[tokio::test]
    async fn test_partial_payment_rejection_is_not_an_error() {
        let app = setup().await;
        let created = app.subscribe("starter").await;
        let payment = app.pay(&created["id"], 50).await;
        assert_eq!(payment["status"], "partial");

        let uri = format!("/payments/{}/reject", payment["id"].as_str().unwrap());
        let (status, body) = app.call(Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "rejected");
        assert_eq!(body["message"], RETRY_WITH_SUFFICIENT_FUNDS);

        let (status, _) = app.call(Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_non_positive_amount_is_bad_request() {
        let app = setup().await;
        let created = app.subscribe("starter").await;
        let (status, _) = app
            .call(
                Method::POST,
                "/payments",
                Some(json!({ "subscription_id": created["id"], "amount_cents": 0 })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(app.store.payment_count().await, 0);
    }

    #[tokio::test]
    async fn test_process_card_payment() {
        let app = setup().await;
        let created = app.subscribe("starter").await;
        let (status, body) = app
            .call(
                Method::POST,
                "/payments/process",
                Some(json!({
                    "subscription_id": created["id"],
                    "amount_cents": 100,
                    "method": "card",
                    "payment_method_id": "pm_card_visa",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["payment"]["status"], "completed");
        assert!(body["gateway_reference"].is_string());
    }

    #[tokio::test]
    async fn test_process_short_card_payment_is_bad_request() {
        let app = setup().await;
        let created = app.subscribe("starter").await;
        let (status, body) = app
            .call(
                Method::POST,
                "/payments/process",
                Some(json!({
                    "subscription_id": created["id"],
                    "amount_cents": 60,
                    "method": "card",
                    "payment_method_id": "pm_card_visa",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
        assert_eq!(body["code"], 400);
        assert_eq!(app.store.payment_count().await, 0);
    }

    #[tokio::test]
    async fn test_payment_without_date_uses_billing_clock() {
        let app = setup().await;
        let created = app.subscribe("starter").await;
        let (status, payment) = app
            .call(
                Method::POST,
                "/payments",
                Some(json!({ "subscription_id": created["id"], "amount_cents": 100 })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(payment["date"], "2024-06-10T12:00:00Z");
    }

    #[tokio::test]
    async fn test_unconfigured_mobile_money_is_bad_request() {
        let app = setup().await;
        let created = app.subscribe("starter").await;
        let (status, _) = app
            .call(
                Method::POST,
                "/payments/process",
                Some(json!({
                    "subscription_id": created["id"],
                    "amount_cents": 100,
                    "method": "mobile_money",
                    "phone_number": "254700000000",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(app.store.payment_count().await, 0);
    }

    #[tokio::test]
    async fn test_deleted_payment_is_gone() {
        let app = setup().await;
        let created = app.subscribe("starter").await;
        let payment = app.pay(&created["id"], 100).await;
        let uri = format!("/payments/{}", payment["id"].as_str().unwrap());

        let (status, _) = app.call(Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = app.call(Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // ==========================================================================
    // Invoices and notifications
    // ==========================================================================

    #[tokio::test]
    async fn test_invoice_is_billed_to_caller() {
        let app = setup().await;
        let created = app.subscribe("starter").await;
        let payment = app.pay(&created["id"], 100).await;

        let uri = format!("/invoices/generate/{}", payment["id"].as_str().unwrap());
        let (status, invoice) = app.call(Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(invoice["user_id"], app.user_id.to_string());
        assert_eq!(invoice["due_date"], "2024-07-10T12:00:00Z");
        assert_eq!(invoice["status"], "unpaid");
    }

    #[tokio::test]
    async fn test_invoice_for_partial_payment_conflicts() {
        let app = setup().await;
        let created = app.subscribe("starter").await;
        let payment = app.pay(&created["id"], 40).await;

        let uri = format!("/invoices/generate/{}", payment["id"].as_str().unwrap());
        let (status, _) = app.call(Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_reminder_run_reports_summary() {
        let app = setup().await;
        let created = app.subscribe("starter").await;
        let payment = app.pay(&created["id"], 100).await;
        let uri = format!("/invoices/generate/{}", payment["id"].as_str().unwrap());
        app.call(Method::POST, &uri, None).await;

        // Due 2024-07-10, two days out
        app.clock.set(datetime!(2024-07-08 12:00 UTC));
        let (status, run) = app
            .call(Method::POST, "/notifications/reminders", None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(run["scanned"], 1);
        assert_eq!(run["sent"], 1);
        assert_eq!(app.store.notifications().await.len(), 1);
    }
}
