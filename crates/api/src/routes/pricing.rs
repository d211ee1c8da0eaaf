//! Price quotes

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use vendorbill_billing::{calculate_cost, format_amount};

use crate::{error::ApiResult, state::AppState};

#[derive(Debug, Deserialize)]
pub struct QuoteQuery {
    pub tier: String,
    #[serde(default)]
    pub branches: i64,
}

#[derive(Debug, Serialize)]
pub struct QuoteResponse {
    pub tier: String,
    pub branches: i64,
    pub amount_cents: i64,
    pub amount: String,
    pub currency: String,
}

/// Quote the monthly charge for a tier at a branch count
pub async fn quote(
    State(state): State<AppState>,
    Query(query): Query<QuoteQuery>,
) -> ApiResult<Json<QuoteResponse>> {
    let amount_cents = calculate_cost(&query.tier, query.branches)?;

    Ok(Json(QuoteResponse {
        tier: query.tier,
        branches: query.branches,
        amount_cents,
        amount: format_amount(amount_cents),
        currency: state.billing.policy.currency.clone(),
    }))
}
