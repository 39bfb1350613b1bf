use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Extension,
};
use chrono::Utc;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    handlers::common::success_response,
    services::reports::{PharmacyReport, ReportPeriod},
    AppState,
};

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReportParams {
    /// `week`, `month`, `year` or `all` (default)
    #[serde(default)]
    pub period: ReportPeriod,
}

#[utoipa::path(
    get,
    path = "/api/v1/reports/pharmacy",
    summary = "Pharmacy activity report",
    description = "Revenue, average basket, purchase spend, top sellers and low-stock lots of the caller's clinic over the current week, month, year or all time.",
    params(ReportParams),
    responses(
        (status = 200, description = "Report computed", body = crate::ApiResponse<PharmacyReport>),
        (status = 400, description = "Unknown period", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Reports"
)]
pub async fn pharmacy_report(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<ReportParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let clinic_id = user.clinic()?;
    let report = state
        .services
        .reports
        .pharmacy_report(clinic_id, params.period, Utc::now())
        .await?;
    Ok(success_response(report))
}
