/// Billing provider webhook
///
/// # Endpoint
///
/// ```text
/// POST /v1/stripe/webhook
/// Stripe-Signature: t=1700000000,v1=5257a869e7...
/// ```
///
/// Unsigned, badly signed, stale or unparsable deliveries get `400` and
/// are not processed. A verified delivery is always acknowledged with
/// `200`, even when processing it fails; failures are logged, and the
/// provider's next event for the subscription reconciles the user again.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
};
use bytes::Bytes;
use chrono::Utc;
use skyaccounts_shared::billing::events::parse_event;
use skyaccounts_shared::billing::webhook::{
    verify_signature, WebhookOutcome, DEFAULT_TOLERANCE_SECS, SIGNATURE_HEADER,
};
use tracing::{error, info, warn};

pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing signature header".to_string()))?;

    verify_signature(
        &body,
        signature,
        &state.config.stripe.webhook_secret,
        Utc::now().timestamp(),
        DEFAULT_TOLERANCE_SECS,
    )
    .map_err(|e| {
        warn!(error = %e, "Rejected webhook delivery");
        ApiError::BadRequest(format!("Invalid signature: {}", e))
    })?;

    let event = parse_event(&body).map_err(|e| {
        warn!(error = %e, "Unparsable webhook delivery");
        ApiError::BadRequest("Malformed event".to_string())
    })?;

    let ctx = state.request_context();
    match state.webhooks.process(&ctx, &event).await {
        Ok(WebhookOutcome::Reconciled(outcome)) => {
            info!(
                event_id = %event.id,
                event_type = %event.event_type,
                ?outcome,
                "Processed billing event"
            );
        }
        Ok(WebhookOutcome::Skipped | WebhookOutcome::Ignored) => {}
        Err(e) => {
            error!(
                event_id = %event.id,
                event_type = %event.event_type,
                error = %e,
                "Processing billing event failed"
            );
        }
    }

    Ok(StatusCode::OK)
}
