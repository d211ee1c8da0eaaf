//! Manual triggers for the reminder and late-alert runs

use axum::{extract::State, Json};
use vendorbill_billing::NotificationRun;

use crate::{error::ApiResult, state::AppState};

pub async fn send_reminders(State(state): State<AppState>) -> ApiResult<Json<NotificationRun>> {
    Ok(Json(state.billing.remediation.send_reminders().await?))
}

pub async fn send_late_alerts(State(state): State<AppState>) -> ApiResult<Json<NotificationRun>> {
    Ok(Json(state.billing.remediation.send_late_alerts().await?))
}
