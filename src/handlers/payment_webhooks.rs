use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use bytes::Bytes;
use serde_json::json;
use tracing::{info, warn};

use crate::errors::ServiceError;
use crate::services::reconciler::ReconcileOutcome;
use crate::stripe::{signature, PaymentEvent};
use crate::{ApiResponse, AppState};

// POST /api/stripe/webhook
#[utoipa::path(
    post,
    path = "/api/stripe/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Event acknowledged (order created, duplicate, or no action needed)"),
        (status = 400, description = "Missing/invalid signature or unusable payload", body = crate::errors::ErrorResponse),
        (status = 500, description = "Transient persistence failure; the provider should retry", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    // Signature verification runs over the raw bytes exactly as
    // received; the body is only parsed as JSON afterwards.
    let signature_header = headers
        .get("Stripe-Signature")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            warn!("Webhook request without Stripe-Signature header");
            ServiceError::MissingSignature
        })?;

    signature::verify_signature(
        signature_header,
        &body,
        &state.config.stripe_webhook_secret,
        state.config.stripe_webhook_tolerance_secs,
    )?;

    let event = PaymentEvent::from_payload(&body)?;
    info!(
        event_type = %event.event_type.as_str(),
        event_id = event.event_id.as_deref().unwrap_or("-"),
        received_at = %chrono::Utc::now().to_rfc3339(),
        "Verified webhook event received"
    );

    let outcome = state.reconciler.reconcile(event).await?;

    let body = match outcome {
        ReconcileOutcome::Completed(report) => json!({
            "received": true,
            "outcome": "order_created",
            "order_id": report.order_id,
            "lines_created": report.lines_created,
            "skipped_skus": report.skipped_skus,
            "decrement_failures": report.decrement_failures,
        }),
        ReconcileOutcome::Duplicate => json!({
            "received": true,
            "outcome": "duplicate",
        }),
        ReconcileOutcome::PaymentFailed => json!({
            "received": true,
            "outcome": "payment_failed",
        }),
        ReconcileOutcome::Ignored(event_type) => json!({
            "received": true,
            "outcome": "ignored",
            "event_type": event_type,
        }),
    };

    Ok(Json(ApiResponse::success(body)))
}
