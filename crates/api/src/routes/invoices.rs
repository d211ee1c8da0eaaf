//! Invoice routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use uuid::Uuid;
use vendorbill_billing::Invoice;

use crate::{auth::AuthUser, error::ApiResult, state::AppState};

/// Issue an invoice for a completed payment, billed to the caller
pub async fn generate_invoice(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(payment_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<Invoice>)> {
    let invoice = state
        .billing
        .invoices
        .generate_for_payment(payment_id, auth_user.user_id)
        .await?;

    Ok((StatusCode::CREATED, Json(invoice)))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Invoice>> {
    Ok(Json(state.billing.invoices.get(id).await?))
}
