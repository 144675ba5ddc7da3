use axum::Json;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Stock Ledger API",
        version = "0.1.0",
        description = r#"
# Stock Ledger

Multi-warehouse stock ledger. Every stock change is a movement; balances per
(warehouse, product) are the projection of the movement history.

## Movements

- `in` and `out` carry a positive magnitude applied to `warehouse_id`.
- `transfer` moves a positive magnitude from `from_warehouse_id` to `warehouse_id`.
- `adjustment` carries a signed delta applied to `warehouse_id`.

Editing or deleting a movement first reverses its effect. When the reversal
would take a balance below zero the request fails with 422 and nothing changes.

## Acting user

Mutating endpoints read the acting user from the optional `x-user-id` header.

## Errors

```json
{
  "error": "Unprocessable Entity",
  "message": "Insufficient stock: Insufficient stock. (available 40, requested 60)",
  "request_id": "5f0c...",
  "timestamp": "2024-01-01T00:00:00Z"
}
```

409 responses are transient conflicts and can be retried.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "movements", description = "Apply, edit, delete and list stock movements"),
        (name = "balances", description = "Stock on hand per warehouse and product"),
        (name = "purchase-orders", description = "Purchase order lifecycle and receiving"),
        (name = "activity", description = "Audit trail"),
        (name = "reports", description = "Read-only valuation, low stock and consistency reports"),
        (name = "catalog", description = "Warehouses and products"),
        (name = "health", description = "Health check")
    ),
    paths(
        // Movements
        crate::handlers::movements::create_movement,
        crate::handlers::movements::list_movements,
        crate::handlers::movements::get_movement,
        crate::handlers::movements::update_movement,
        crate::handlers::movements::delete_movement,

        // Balances
        crate::handlers::balances::list_balances,

        // Purchase orders
        crate::handlers::purchase_orders::create_purchase_order,
        crate::handlers::purchase_orders::list_purchase_orders,
        crate::handlers::purchase_orders::get_purchase_order,
        crate::handlers::purchase_orders::send_purchase_order,
        crate::handlers::purchase_orders::receive_purchase_order,
        crate::handlers::purchase_orders::cancel_purchase_order,

        // Audit
        crate::handlers::activity::list_activity_logs,

        // Reports
        crate::handlers::reports::stock_valuation,
        crate::handlers::reports::low_stock,
        crate::handlers::reports::consistency,

        // Catalog
        crate::handlers::catalog::create_warehouse,
        crate::handlers::catalog::list_warehouses,
        crate::handlers::catalog::create_product,
        crate::handlers::catalog::list_products,
        crate::handlers::catalog::get_product,

        crate::handlers::health::health_check,
    ),
    components(
        schemas(
            crate::entities::stock_movement::MovementType,
            crate::entities::stock_movement::ReferenceKind,
            crate::entities::stock_movement::Reference,
            crate::entities::purchase_order::PurchaseOrderStatus,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

/// Serves the generated OpenAPI document.
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDocV1::openapi())
}
