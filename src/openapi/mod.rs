use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "Bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Clinic Pharmacy API",
        version = "1.0.0",
        description = r#"
# Clinic Pharmacy API

Pharmacy counter of a clinic: medication sales, stock intake and activity reports.

## Sales

A sale is recorded atomically. Each line names a catalogue product; stock is
taken from the clinic's lots that expire first. If any line cannot be served
(unknown product, medication not stocked by the clinic, not enough units) the
whole sale is rejected and nothing is written.

## Authentication

Every endpoint except status and health requires a JWT issued by the clinic
identity service:

```
Authorization: Bearer <your-jwt-token>
```

The token names the clinic the caller acts for; all data is scoped to it.

## Error Handling

Errors share one body with a machine-readable `code`:

```json
{
  "error": "Not Found",
  "code": "product_not_found",
  "message": "Product not found: Paracetamol",
  "request_id": "0b6f...",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#
    ),
    servers(
        (url = "http://localhost:8080/api/v1", description = "Local development")
    ),
    tags(
        (name = "Sales", description = "Sale recording and history"),
        (name = "Stock", description = "Stock intake and inventory"),
        (name = "Reports", description = "Pharmacy activity reports")
    ),
    paths(
        // Sales
        crate::handlers::sales::create_sale,
        crate::handlers::sales::list_sales,
        crate::handlers::sales::get_sale,

        // Stock
        crate::handlers::stock::receive_stock,
        crate::handlers::stock::list_stock,
        crate::handlers::stock::get_medication,

        // Reports
        crate::handlers::reports::pharmacy_report,
    ),
    components(
        schemas(
            crate::ResponseMeta,
            crate::handlers::common::PaginationMeta,

            // Sales types
            crate::entities::sale::PaymentMode,
            crate::services::sales::SaleLineInput,
            crate::services::sales::RecordSaleInput,
            crate::services::sales::SaleSummary,
            crate::services::sales::SaleLineDetail,
            crate::services::sales::SaleDetail,
            crate::handlers::sales::SaleCreatedResponse,

            // Stock types
            crate::services::stock::ReceiveStockInput,
            crate::services::stock::StockReceipt,
            crate::services::stock::LotView,
            crate::services::stock::MedicationStock,
            crate::services::stock::MedicationDetail,

            // Report types
            crate::services::reports::ReportPeriod,
            crate::services::reports::PharmacyReport,
            crate::services::reports::TopSeller,
            crate::services::reports::LowStockLot,
            crate::services::reports::RevenueBucket,

            // Error types
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&BearerAuth)
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
