use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Plant Checkout API",
        version = "0.1.0",
        description = r#"
# Plant Checkout API

Cart, payment and order pipeline for the plant storefront.

## Flow

1. Fill the cart with `POST /api/v1/cart`.
2. Open a payment intent with `POST /api/v1/payments/create-order` and complete it with the gateway.
3. Place the order with `POST /api/v1/orders`, passing the gateway's signed proof and an address id.

## Authentication

Every endpoint except `/health` requires a bearer JWT whose `sub` is the owner id:

```
Authorization: Bearer <your-jwt-token>
```

Status changes and the reconciliation queue require the `admin` role.

## Errors

Errors carry a stable `code` (e.g. `insufficient_stock`, `signature_mismatch`) alongside a human-readable message.
        "#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "cart", description = "Cart management"),
        (name = "payments", description = "Payment intents and proof verification"),
        (name = "orders", description = "Order placement and lifecycle"),
        (name = "admin", description = "Administrative endpoints"),
        (name = "health", description = "Health check endpoints")
    ),
    paths(
        crate::handlers::carts::get_cart,
        crate::handlers::carts::add_item,
        crate::handlers::carts::update_item,
        crate::handlers::carts::remove_item,
        crate::handlers::carts::clear_cart,
        crate::handlers::payments::create_intent,
        crate::handlers::payments::verify_payment,
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_my_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::update_order_status,
        crate::handlers::admin::list_reconciliations,
        crate::handlers::health::health_check,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::entities::order::OrderStatus,
        crate::entities::product::ProductKind,
    )),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
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
