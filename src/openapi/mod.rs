use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "SoleSwap API",
        version = "0.1.0",
        description = r#"
# SoleSwap Order Reconciliation API

Payment-webhook ingress for the SoleSwap sneaker marketplace. Converts
verified Stripe payment events into exactly one persisted order with
line items and stock decrements, tolerating duplicate and concurrent
webhook deliveries.

## Webhook contract

`POST /api/stripe/webhook` expects the raw Stripe event payload with a
`Stripe-Signature` header. Signature failures and unusable metadata are
answered with 400 (do not retry); duplicates, unhandled event types, and
successful reconciliation with 200; transient persistence failures with
500 so the provider retries.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    paths(
        crate::handlers::payment_webhooks::stripe_webhook,
    ),
    components(
        schemas(
            crate::ApiResponse<serde_json::Value>,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDoc;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
