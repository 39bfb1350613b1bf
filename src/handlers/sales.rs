use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Extension,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    handlers::common::{
        created_response, success_response, JsonBody, PaginatedResponse, PaginationParams,
    },
    services::sales::{RecordSaleInput, SaleDetail, SaleSummary},
    AppState,
};

/// Body returned once a sale is committed.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SaleCreatedResponse {
    pub sale_id: Uuid,
    #[schema(value_type = String, example = "350")]
    pub total: Decimal,
    #[schema(example = "XOF")]
    pub currency: String,
    pub sold_at: DateTime<Utc>,
    pub line_count: usize,
}

#[utoipa::path(
    post,
    path = "/api/v1/sales",
    summary = "Record a sale",
    description = "Records a pharmacy sale for the caller's clinic. Stock is taken from the lots expiring first; the whole sale is rejected if any line cannot be served.",
    request_body = RecordSaleInput,
    responses(
        (status = 201, description = "Sale recorded", body = crate::ApiResponse<SaleCreatedResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid sale request", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse),
        (status = 422, description = "Medication not stocked or stock insufficient", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Sales"
)]
pub async fn create_sale(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    JsonBody(request): JsonBody<RecordSaleInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let clinic_id = user.clinic()?;

    let receipt = state.services.sales.record_sale(clinic_id, request).await?;

    info!(
        sale_id = %receipt.sale_id,
        user_id = %user.user_id,
        "Sale recorded"
    );

    Ok(created_response(SaleCreatedResponse {
        sale_id: receipt.sale_id,
        total: receipt.total,
        currency: state.config.currency.clone(),
        sold_at: receipt.sold_at,
        line_count: receipt.line_count,
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/sales",
    summary = "List sales",
    description = "Sales of the caller's clinic, newest first",
    params(PaginationParams),
    responses(
        (status = 200, description = "Sales retrieved", body = crate::ApiResponse<PaginatedResponse<SaleSummary>>),
        (status = 400, description = "Invalid pagination", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Sales"
)]
pub async fn list_sales(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let clinic_id = user.clinic()?;
    let (sales, total) = state
        .services
        .sales
        .list_sales(clinic_id, params.page, params.per_page)
        .await?;

    Ok(success_response(PaginatedResponse::new(
        sales,
        params.page,
        params.per_page,
        total,
    )))
}

#[utoipa::path(
    get,
    path = "/api/v1/sales/{id}",
    summary = "Get sale",
    params(("id" = Uuid, Path, description = "Sale id")),
    responses(
        (status = 200, description = "Sale with its lines", body = crate::ApiResponse<SaleDetail>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Sale not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Sales"
)]
pub async fn get_sale(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let clinic_id = user.clinic()?;
    let sale = state.services.sales.get_sale(clinic_id, id).await?;
    Ok(success_response(sale))
}
