//! HTTP routes

pub mod invoices;
pub mod notifications;
pub mod payments;
pub mod pricing;
pub mod subscriptions;

#[cfg(test)]
mod router_tests;

use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::{auth::require_auth, state::AppState};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/pricing/quote", get(pricing::quote))
        // Subscriptions
        .route("/subscriptions", post(subscriptions::create_subscription))
        .route(
            "/subscriptions/suspend-overdue",
            post(subscriptions::suspend_overdue),
        )
        .route(
            "/subscriptions/{id}",
            get(subscriptions::get_subscription)
                .put(subscriptions::update_subscription)
                .delete(subscriptions::delete_subscription),
        )
        .route(
            "/subscriptions/{id}/cancel",
            post(subscriptions::cancel_subscription),
        )
        .route(
            "/subscriptions/{id}/downgrade",
            post(subscriptions::downgrade_subscription),
        )
        .route(
            "/subscriptions/{id}/merge",
            post(subscriptions::merge_subscription),
        )
        .route(
            "/subscriptions/{id}/overdue",
            post(subscriptions::handle_overdue),
        )
        .route(
            "/subscriptions/{id}/payments",
            get(subscriptions::list_subscription_payments),
        )
        // Payments
        .route(
            "/payments",
            get(payments::list_payments).post(payments::record_payment),
        )
        .route("/payments/process", post(payments::process_payment))
        .route(
            "/payments/{id}",
            get(payments::get_payment)
                .put(payments::update_payment)
                .delete(payments::delete_payment),
        )
        .route("/payments/{id}/reject", post(payments::reject_payment))
        // Invoices
        .route(
            "/invoices/generate/{payment_id}",
            post(invoices::generate_invoice),
        )
        .route("/invoices/{id}", get(invoices::get_invoice))
        // Remediation
        .route(
            "/notifications/reminders",
            post(notifications::send_reminders),
        )
        .route(
            "/notifications/late-alerts",
            post(notifications::send_late_alerts),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .with_state(state)
}
