//! Subscription routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;
use vendorbill_billing::{
    BillingError, CreateSubscription, IncomingSubscription, OverdueOutcome, Payment,
    Subscription, SubscriptionUpdate, SuspensionRun,
};
use vendorbill_shared::SubscriptionTier;

use crate::{error::ApiResult, state::AppState};

fn parse_tier(tier: &str) -> Result<SubscriptionTier, BillingError> {
    Ok(tier.parse()?)
}

#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub business_id: Uuid,
    pub tier: String,
    #[serde(with = "time::serde::rfc3339")]
    pub start_date: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end_date: Option<OffsetDateTime>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSubscriptionRequest {
    pub tier: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end_date: Option<OffsetDateTime>,
}

#[derive(Debug, Deserialize)]
pub struct DowngradeRequest {
    pub tier: String,
}

#[derive(Debug, Serialize)]
pub struct OverdueResponse {
    pub subscription_id: Uuid,
    pub outcome: OverdueOutcome,
}

pub async fn create_subscription(
    State(state): State<AppState>,
    Json(req): Json<CreateSubscriptionRequest>,
) -> ApiResult<(StatusCode, Json<Subscription>)> {
    let subscription = state
        .billing
        .subscriptions
        .create(CreateSubscription {
            business_id: req.business_id,
            tier: parse_tier(&req.tier)?,
            start_date: req.start_date,
            end_date: req.end_date,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(subscription)))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Subscription>> {
    Ok(Json(state.billing.subscriptions.get(id).await?))
}

pub async fn update_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateSubscriptionRequest>,
) -> ApiResult<Json<Subscription>> {
    let tier = req.tier.as_deref().map(parse_tier).transpose()?;
    let subscription = state
        .billing
        .subscriptions
        .update(
            id,
            SubscriptionUpdate {
                tier,
                end_date: req.end_date,
            },
        )
        .await?;

    Ok(Json(subscription))
}

pub async fn delete_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.billing.subscriptions.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Subscription>> {
    Ok(Json(state.billing.subscriptions.cancel(id).await?))
}

pub async fn downgrade_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<DowngradeRequest>,
) -> ApiResult<Json<Subscription>> {
    let tier = parse_tier(&req.tier)?;
    Ok(Json(state.billing.subscriptions.downgrade(id, tier).await?))
}

/// Fold an overlapping subscription into this one
pub async fn merge_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(incoming): Json<IncomingSubscription>,
) -> ApiResult<Json<Subscription>> {
    Ok(Json(
        state
            .billing
            .subscriptions
            .handle_overlap(id, incoming)
            .await?,
    ))
}

pub async fn handle_overdue(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<OverdueResponse>> {
    let outcome = state.billing.remediation.handle_overdue(id).await?;
    Ok(Json(OverdueResponse {
        subscription_id: id,
        outcome,
    }))
}

pub async fn suspend_overdue(State(state): State<AppState>) -> ApiResult<Json<SuspensionRun>> {
    Ok(Json(state.billing.remediation.suspend_overdue().await?))
}

pub async fn list_subscription_payments(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Payment>>> {
    Ok(Json(
        state
            .billing
            .payments
            .list_payments_by_subscription(id)
            .await?,
    ))
}
