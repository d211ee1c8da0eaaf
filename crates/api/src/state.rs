//! Application state

use std::sync::Arc;

use vendorbill_billing::BillingService;

use crate::auth::JwtManager;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub billing: Arc<BillingService>,
    pub jwt_manager: JwtManager,
}

impl AppState {
    pub fn new(billing: BillingService, jwt_manager: JwtManager) -> Self {
        Self {
            billing: Arc::new(billing),
            jwt_manager,
        }
    }
}
