//! Payment routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;
use vendorbill_billing::{Payment, PaymentMethod, PaymentStatus, PaymentUpdate, ProcessedPayment};

use crate::{error::ApiResult, state::AppState};

#[derive(Debug, Deserialize)]
pub struct RecordPaymentRequest {
    pub subscription_id: Uuid,
    pub amount_cents: i64,
    /// Defaults to the billing clock's current time
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub date: Option<OffsetDateTime>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePaymentRequest {
    pub amount_cents: Option<i64>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub date: Option<OffsetDateTime>,
    pub status: Option<PaymentStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessPaymentRequest {
    pub subscription_id: Uuid,
    pub amount_cents: i64,
    #[serde(flatten)]
    pub method: PaymentMethod,
}

#[derive(Debug, Serialize)]
pub struct RejectionResponse {
    pub status: PaymentStatus,
    pub message: &'static str,
    pub payment: Payment,
}

pub async fn record_payment(
    State(state): State<AppState>,
    Json(req): Json<RecordPaymentRequest>,
) -> ApiResult<(StatusCode, Json<Payment>)> {
    let payment = state
        .billing
        .payments
        .record_payment(req.subscription_id, req.amount_cents, req.date)
        .await?;

    Ok((StatusCode::CREATED, Json(payment)))
}

pub async fn list_payments(State(state): State<AppState>) -> ApiResult<Json<Vec<Payment>>> {
    Ok(Json(state.billing.payments.list_payments().await?))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Payment>> {
    Ok(Json(state.billing.payments.get_payment(id).await?))
}

pub async fn update_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdatePaymentRequest>,
) -> ApiResult<Json<Payment>> {
    let payment = state
        .billing
        .payments
        .update_payment(
            id,
            PaymentUpdate {
                amount_cents: req.amount_cents,
                date: req.date,
                status: req.status,
            },
        )
        .await?;

    Ok(Json(payment))
}

pub async fn delete_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.billing.payments.delete_payment(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Reject a partial payment. A successful rejection is a normal 200 response.
pub async fn reject_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RejectionResponse>> {
    let rejected = state.billing.payments.reject_partial_payment(id).await?;

    Ok(Json(RejectionResponse {
        status: rejected.payment.status,
        message: rejected.message,
        payment: rejected.payment,
    }))
}

/// Charge and record a payment; the amount must equal what is currently due
pub async fn process_payment(
    State(state): State<AppState>,
    Json(req): Json<ProcessPaymentRequest>,
) -> ApiResult<Json<ProcessedPayment>> {
    let processed = state
        .billing
        .payments
        .process_payment(req.subscription_id, req.amount_cents, req.method)
        .await?;

    Ok(Json(processed))
}
