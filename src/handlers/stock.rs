use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Extension,
};
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    handlers::common::{created_response, success_response, JsonBody},
    services::stock::{MedicationDetail, MedicationStock, ReceiveStockInput, StockReceipt},
    AppState,
};

#[utoipa::path(
    post,
    path = "/api/v1/stock",
    summary = "Receive stock",
    description = "Registers a delivery. The catalogue entry and the clinic's medication are created on first delivery; each delivery adds one lot and one purchase record.",
    request_body = ReceiveStockInput,
    responses(
        (status = 201, description = "Stock received", body = crate::ApiResponse<StockReceipt>),
        (status = 400, description = "Invalid delivery", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 409, description = "Concurrent creation, retry", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Stock"
)]
pub async fn receive_stock(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    JsonBody(request): JsonBody<ReceiveStockInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let clinic_id = user.clinic()?;
    let receipt = state.services.stock.receive_stock(clinic_id, request).await?;

    info!(lot_id = %receipt.lot_id, user_id = %user.user_id, "Stock received");
    Ok(created_response(receipt))
}

#[utoipa::path(
    get,
    path = "/api/v1/stock",
    summary = "List stocked medications",
    responses(
        (status = 200, description = "Medications with their lots", body = crate::ApiResponse<Vec<MedicationStock>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Stock"
)]
pub async fn list_stock(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, ServiceError> {
    let clinic_id = user.clinic()?;
    let medications = state.services.stock.list_medications(clinic_id).await?;
    Ok(success_response(medications))
}

#[utoipa::path(
    get,
    path = "/api/v1/stock/{catalogue_id}",
    summary = "Get medication stock detail",
    params(("catalogue_id" = Uuid, Path, description = "Catalogue entry id")),
    responses(
        (status = 200, description = "Medication detail", body = crate::ApiResponse<MedicationDetail>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not stocked by this clinic", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Stock"
)]
pub async fn get_medication(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(catalogue_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let clinic_id = user.clinic()?;
    let detail = state
        .services
        .stock
        .medication_detail(clinic_id, catalogue_id)
        .await?;
    Ok(success_response(detail))
}
