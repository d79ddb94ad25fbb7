/// Webhook verification and dispatch
///
/// Every delivery is signed by the billing provider:
///
/// ```text
/// Stripe-Signature: t=1700000000,v1=5257a869e7...
/// ```
///
/// `v1` is the hex HMAC-SHA256 of `"{t}.{payload}"` keyed with the endpoint
/// secret. Deliveries older than the tolerance are rejected so a captured
/// request cannot be replayed later.

use crate::billing::events::{BillingEvent, ParsedEvent};
use crate::billing::ports::BillingProvider;
use crate::billing::reconciler::{ReconcileOutcome, SubscriptionReconciler};
use crate::context::OpContext;
use crate::error::AccountsResult;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, info};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Maximum age of a delivery, in seconds
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Largest accepted webhook body
pub const MAX_PAYLOAD_BYTES: usize = 65536;

/// Error type for signature verification
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("signature header is malformed")]
    Malformed,

    #[error("signature header has no v1 signature")]
    MissingSignature,

    #[error("timestamp is outside the tolerance window")]
    TimestampOutsideTolerance,

    #[error("no signature matches the payload")]
    Mismatch,

    #[error("webhook secret is unusable")]
    InvalidSecret,
}

/// Hex signature of `payload` at `timestamp`
pub fn compute_signature(
    payload: &[u8],
    timestamp: i64,
    secret: &str,
) -> Result<String, SignatureError> {
    let mac = signing_mac(payload, timestamp, secret)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn signing_mac(
    payload: &[u8],
    timestamp: i64,
    secret: &str,
) -> Result<HmacSha256, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Verifies a signature header against `payload`
///
/// `now` is the current time in seconds since the epoch. Comparison is
/// constant-time.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let (key, value) = part.trim().split_once('=').ok_or(SignatureError::Malformed)?;
        match key {
            "t" => {
                timestamp = Some(value.parse::<i64>().map_err(|_| SignatureError::Malformed)?);
            }
            "v1" => {
                // Undecodable candidates can never match; skip them.
                if let Ok(signature) = hex::decode(value) {
                    signatures.push(signature);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::MissingSignature);
    }
    let age = now
        .checked_sub(timestamp)
        .ok_or(SignatureError::TimestampOutsideTolerance)?;
    if age.unsigned_abs() > tolerance_secs.unsigned_abs() {
        return Err(SignatureError::TimestampOutsideTolerance);
    }

    let mac = signing_mac(payload, timestamp, secret)?;
    if signatures
        .iter()
        .any(|signature| mac.clone().verify_slice(signature).is_ok())
    {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// What processing a webhook event did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Reconciled(ReconcileOutcome),

    /// A schedule event without a subscription
    Skipped,

    /// An event type the service does not handle
    Ignored,
}

/// Dispatches verified billing events
pub struct WebhookProcessor {
    reconciler: Arc<SubscriptionReconciler>,
    billing: Arc<dyn BillingProvider>,
}

impl WebhookProcessor {
    pub fn new(reconciler: Arc<SubscriptionReconciler>, billing: Arc<dyn BillingProvider>) -> Self {
        Self {
            reconciler,
            billing,
        }
    }

    /// Handles one event
    ///
    /// Subscription events are reconciled directly. Schedule events fetch
    /// the referenced subscription first.
    pub async fn process(
        &self,
        ctx: &OpContext,
        event: &ParsedEvent,
    ) -> AccountsResult<WebhookOutcome> {
        match &event.event {
            BillingEvent::SubscriptionChanged(subscription) => {
                let outcome = self.reconciler.reconcile(ctx, subscription).await?;
                Ok(WebhookOutcome::Reconciled(outcome))
            }
            BillingEvent::ScheduleChanged {
                subscription_id: Some(subscription_id),
            } => {
                let subscription = self.billing.fetch_subscription(ctx, subscription_id).await?;
                let outcome = self.reconciler.reconcile(ctx, &subscription).await?;
                Ok(WebhookOutcome::Reconciled(outcome))
            }
            BillingEvent::ScheduleChanged {
                subscription_id: None,
            } => {
                info!(
                    event_id = %event.id,
                    "Subscription schedule without subscription, nothing to do"
                );
                Ok(WebhookOutcome::Skipped)
            }
            BillingEvent::Ignored => {
                debug!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    "Ignoring billing event"
                );
                Ok(WebhookOutcome::Ignored)
            }
        }
    }
}
