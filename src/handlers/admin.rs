use axum::{
    extract::{Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{
    auth::AuthUser, errors::ServiceError, handlers::common::success_response, AppState,
};

#[derive(Debug, Deserialize, IntoParams)]
pub struct ReconciliationQuery {
    /// Hide resolved cases (default: true)
    #[serde(default = "default_open_only")]
    pub open_only: bool,
}

fn default_open_only() -> bool {
    true
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/reconciliations",
    summary = "List payment reconciliations",
    description = "Paid checkouts that could not be committed and need a refund or manual follow-up.",
    params(ReconciliationQuery),
    responses(
        (status = 200, description = "Reconciliation cases", body = crate::ApiResponse<Vec<crate::services::orders::ReconciliationView>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn list_reconciliations(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(query): Query<ReconciliationQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    auth_user.require_admin()?;
    let cases = state
        .services
        .orders
        .list_reconciliations(query.open_only)
        .await?;
    Ok(success_response(cases))
}
