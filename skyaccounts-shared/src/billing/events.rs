/// Billing provider events
///
/// Webhook payloads are Stripe events `{id, type, data: {object}}`. Only two
/// families matter here: subscription changes, which carry the subscription
/// itself, and subscription schedule changes, which only reference a
/// subscription by id. Everything else is acknowledged and ignored.

use crate::error::{AccountsError, AccountsResult};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

const SUBSCRIPTION_EVENT: &str = "customer.subscription";
const SCHEDULE_EVENT: &str = "subscription_schedule";

/// Lifecycle status of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    Incomplete,
    IncompleteExpired,
    Paused,
    #[serde(other)]
    Unknown,
}

/// The parts of a subscription the reconciler needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionState {
    pub id: String,
    pub customer_id: String,
    pub status: SubscriptionStatus,

    /// Product of the subscribed plan
    pub product_id: Option<String>,

    /// End of the current period, seconds since the epoch
    pub current_period_end: Option<i64>,
}

impl SubscriptionState {
    /// Only an active subscription grants a paid tier
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }
}

/// A classified billing event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEvent {
    SubscriptionChanged(SubscriptionState),

    /// `None` when the schedule is not attached to a subscription
    ScheduleChanged { subscription_id: Option<String> },

    Ignored,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    object: JsonValue,
}

/// A parsed event envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEvent {
    pub id: String,
    pub event_type: String,
    pub event: BillingEvent,
}

/// Parses and classifies a webhook payload
///
/// # Errors
///
/// Returns [`AccountsError::DecodeFailure`] for malformed JSON or a
/// subscription object without its required fields.
pub fn parse_event(payload: &[u8]) -> AccountsResult<ParsedEvent> {
    let raw: RawEvent =
        serde_json::from_slice(payload).map_err(|e| AccountsError::decode("billing event", e))?;

    let event = if raw.event_type.contains(SUBSCRIPTION_EVENT) {
        BillingEvent::SubscriptionChanged(parse_subscription(&raw.data.object)?)
    } else if raw.event_type.contains(SCHEDULE_EVENT) {
        BillingEvent::ScheduleChanged {
            subscription_id: id_or_expanded(&raw.data.object["subscription"])
                .filter(|id| !id.is_empty()),
        }
    } else {
        BillingEvent::Ignored
    };

    Ok(ParsedEvent {
        id: raw.id,
        event_type: raw.event_type,
        event,
    })
}

/// Extracts a [`SubscriptionState`] from a subscription object
///
/// Handles both the legacy `plan` field and the `items` list, and customers
/// given either as an id or as an expanded object.
pub fn parse_subscription(object: &JsonValue) -> AccountsResult<SubscriptionState> {
    let id = object["id"]
        .as_str()
        .ok_or_else(|| AccountsError::decode("subscription", "missing id"))?
        .to_string();
    let customer_id = id_or_expanded(&object["customer"])
        .ok_or_else(|| AccountsError::decode("subscription", "missing customer"))?;
    let status = serde_json::from_value(object["status"].clone())
        .map_err(|e| AccountsError::decode("subscription status", e))?;

    let first_item = &object["items"]["data"][0];
    let product_id = id_or_expanded(&object["plan"]["product"])
        .or_else(|| id_or_expanded(&first_item["price"]["product"]))
        .or_else(|| id_or_expanded(&first_item["plan"]["product"]));
    let current_period_end = object["current_period_end"]
        .as_i64()
        .or_else(|| first_item["current_period_end"].as_i64());

    Ok(SubscriptionState {
        id,
        customer_id,
        status,
        product_id,
        current_period_end,
    })
}

/// An id given either as a string or as an expanded object
fn id_or_expanded(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(id) => Some(id.clone()),
        JsonValue::Object(map) => map.get("id").and_then(JsonValue::as_str).map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: JsonValue) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_subscription_event_with_legacy_plan() {
        let parsed = parse_event(&payload(json!({
            "id": "evt_1",
            "type": "customer.subscription.updated",
            "data": {"object": {
                "id": "sub_1",
                "customer": "cus_1",
                "status": "active",
                "plan": {"product": "prod_J06Q7nJH3HJcYN"},
                "current_period_end": 1735689600
            }}
        })))
        .unwrap();

        assert_eq!(parsed.id, "evt_1");
        assert_eq!(
            parsed.event,
            BillingEvent::SubscriptionChanged(SubscriptionState {
                id: "sub_1".to_string(),
                customer_id: "cus_1".to_string(),
                status: SubscriptionStatus::Active,
                product_id: Some("prod_J06Q7nJH3HJcYN".to_string()),
                current_period_end: Some(1735689600),
            })
        );
    }

    #[test]
    fn test_subscription_with_expanded_customer_and_items() {
        let state = parse_subscription(&json!({
            "id": "sub_2",
            "customer": {"id": "cus_2", "object": "customer"},
            "status": "past_due",
            "items": {"data": [{
                "price": {"product": {"id": "prod_x"}},
                "current_period_end": 1700000000
            }]}
        }))
        .unwrap();

        assert_eq!(state.customer_id, "cus_2");
        assert_eq!(state.status, SubscriptionStatus::PastDue);
        assert!(!state.is_active());
        assert_eq!(state.product_id.as_deref(), Some("prod_x"));
        assert_eq!(state.current_period_end, Some(1700000000));
    }

    #[test]
    fn test_unknown_status_is_not_active() {
        let state = parse_subscription(&json!({
            "id": "sub_3",
            "customer": "cus_3",
            "status": "something_new"
        }))
        .unwrap();
        assert_eq!(state.status, SubscriptionStatus::Unknown);
        assert_eq!(state.product_id, None);
    }

    #[test]
    fn test_subscription_without_customer_fails() {
        let err = parse_subscription(&json!({"id": "sub_4", "status": "active"})).unwrap_err();
        assert!(matches!(err, AccountsError::DecodeFailure { .. }));
    }

    #[test]
    fn test_schedule_event() {
        let parsed = parse_event(&payload(json!({
            "id": "evt_2",
            "type": "subscription_schedule.updated",
            "data": {"object": {"id": "sub_sched_1", "subscription": "sub_9"}}
        })))
        .unwrap();
        assert_eq!(
            parsed.event,
            BillingEvent::ScheduleChanged {
                subscription_id: Some("sub_9".to_string())
            }
        );
    }

    #[test]
    fn test_schedule_event_without_subscription() {
        for subscription in [json!(""), JsonValue::Null] {
            let parsed = parse_event(&payload(json!({
                "id": "evt_3",
                "type": "subscription_schedule.created",
                "data": {"object": {"id": "sub_sched_2", "subscription": subscription}}
            })))
            .unwrap();
            assert_eq!(
                parsed.event,
                BillingEvent::ScheduleChanged {
                    subscription_id: None
                }
            );
        }
    }

    #[test]
    fn test_other_events_ignored() {
        let parsed = parse_event(&payload(json!({
            "id": "evt_4",
            "type": "invoice.paid",
            "data": {"object": {"id": "in_1"}}
        })))
        .unwrap();
        assert_eq!(parsed.event, BillingEvent::Ignored);
    }

    #[test]
    fn test_malformed_payload() {
        assert!(matches!(
            parse_event(b"not json"),
            Err(AccountsError::DecodeFailure { .. })
        ));
    }
}
