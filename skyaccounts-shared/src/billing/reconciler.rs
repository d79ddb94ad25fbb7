/// Subscription reconciliation
///
/// Brings a user's tier and paid-period end in line with the state of their
/// subscription at the billing provider. Replaying the same subscription
/// state is harmless: when nothing changes nothing is written.
///
/// The write is conditional on the values that were read, so two webhook
/// deliveries racing for the same user cannot silently overwrite each other.
/// The loser re-reads and recomputes.

use crate::billing::events::SubscriptionState;
use crate::billing::plans::PlanCatalog;
use crate::billing::ports::UserStore;
use crate::context::OpContext;
use crate::error::{AccountsError, AccountsResult};
use crate::models::user::{SubscriptionSnapshot, Tier};
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Conditional write attempts before giving up
pub const MAX_RECONCILE_ATTEMPTS: usize = 3;

/// Result of a reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The stored state already matched
    Unchanged { user_id: Uuid },

    Updated {
        user_id: Uuid,
        previous: SubscriptionSnapshot,
        current: SubscriptionSnapshot,
    },
}

pub struct SubscriptionReconciler {
    users: Arc<dyn UserStore>,
    catalog: Arc<PlanCatalog>,
}

impl SubscriptionReconciler {
    pub fn new(users: Arc<dyn UserStore>, catalog: Arc<PlanCatalog>) -> Self {
        Self { users, catalog }
    }

    /// Tier and expiry the user should have given `subscription`
    ///
    /// An inactive subscription drops the user to the free tier but keeps
    /// the recorded expiry. An active one grants its plan's tier and moves
    /// the expiry to the end of the current period when one is given.
    pub fn target(
        &self,
        current: SubscriptionSnapshot,
        subscription: &SubscriptionState,
    ) -> AccountsResult<SubscriptionSnapshot> {
        if !subscription.is_active() {
            return Ok(SubscriptionSnapshot {
                tier: Tier::Free,
                subscribed_until: current.subscribed_until,
            });
        }

        let tier = self
            .catalog
            .tier_for_plan(subscription.product_id.as_deref().unwrap_or_default());
        let subscribed_until = match subscription.current_period_end {
            Some(seconds) => Some(Utc.timestamp_opt(seconds, 0).single().ok_or_else(|| {
                AccountsError::decode(
                    "subscription period end",
                    format!("{} is out of range", seconds),
                )
            })?),
            None => current.subscribed_until,
        };

        Ok(SubscriptionSnapshot {
            tier,
            subscribed_until,
        })
    }

    /// Applies `subscription` to the user owning its customer
    ///
    /// # Errors
    ///
    /// - [`AccountsError::NotFound`] if no user owns the customer
    /// - [`AccountsError::Conflict`] if concurrent writers won every attempt
    /// - storage errors from the user store
    pub async fn reconcile(
        &self,
        ctx: &OpContext,
        subscription: &SubscriptionState,
    ) -> AccountsResult<ReconcileOutcome> {
        for attempt in 1..=MAX_RECONCILE_ATTEMPTS {
            let user = self
                .users
                .find_by_customer_id(ctx, &subscription.customer_id)
                .await?
                .ok_or_else(|| {
                    AccountsError::NotFound(format!(
                        "user with billing customer {}",
                        subscription.customer_id
                    ))
                })?;

            let previous = user.snapshot();
            let current = self.target(previous, subscription)?;

            if current == previous {
                debug!(
                    user_id = %user.id,
                    subscription_id = %subscription.id,
                    "Subscription already reconciled"
                );
                return Ok(ReconcileOutcome::Unchanged { user_id: user.id });
            }

            if self
                .users
                .update_subscription(ctx, user.id, previous, current)
                .await?
            {
                info!(
                    user_id = %user.id,
                    subscription_id = %subscription.id,
                    from_tier = %previous.tier,
                    to_tier = %current.tier,
                    subscribed_until = ?current.subscribed_until,
                    "Reconciled subscription"
                );
                return Ok(ReconcileOutcome::Updated {
                    user_id: user.id,
                    previous,
                    current,
                });
            }

            warn!(
                user_id = %user.id,
                attempt,
                "User subscription changed concurrently, retrying"
            );
        }

        Err(AccountsError::Conflict(format!(
            "subscription {} for customer {}",
            subscription.id, subscription.customer_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::events::SubscriptionStatus;
    use crate::billing::ports::MockUserStore;
    use crate::models::user::User;
    use chrono::DateTime;

    const PREMIUM5_PLAN: &str = "prod_J06Q7nJH3HJcYN";
    const PERIOD_END: i64 = 1735689600;

    fn user(tier: Tier, subscribed_until: Option<DateTime<Utc>>) -> User {
        User {
            id: Uuid::new_v4(),
            sub: "sub-1".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            password_hash: String::new(),
            stripe_customer_id: Some("cus_1".to_string()),
            tier,
            subscribed_until,
            created_at: Utc::now(),
        }
    }

    fn subscription(status: SubscriptionStatus, period_end: Option<i64>) -> SubscriptionState {
        SubscriptionState {
            id: "sub_1".to_string(),
            customer_id: "cus_1".to_string(),
            status,
            product_id: Some(PREMIUM5_PLAN.to_string()),
            current_period_end: period_end,
        }
    }

    fn reconciler(store: MockUserStore) -> SubscriptionReconciler {
        SubscriptionReconciler::new(Arc::new(store), Arc::new(PlanCatalog::default()))
    }

    fn period_end() -> DateTime<Utc> {
        Utc.timestamp_opt(PERIOD_END, 0).unwrap()
    }

    #[tokio::test]
    async fn test_active_subscription_upgrades_user() {
        let stored = user(Tier::Free, None);
        let user_id = stored.id;

        let mut store = MockUserStore::new();
        store
            .expect_find_by_customer_id()
            .withf(|_, customer| customer == "cus_1")
            .times(1)
            .return_once(move |_, _| Ok(Some(stored)));
        store
            .expect_update_subscription()
            .withf(move |_, id, expected, next| {
                *id == user_id
                    && expected.tier == Tier::Free
                    && next.tier == Tier::Premium5
                    && next.subscribed_until == Some(period_end())
            })
            .times(1)
            .return_once(|_, _, _, _| Ok(true));

        let outcome = reconciler(store)
            .reconcile(
                &OpContext::background(),
                &subscription(SubscriptionStatus::Active, Some(PERIOD_END)),
            )
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            ReconcileOutcome::Updated { current, .. } if current.tier == Tier::Premium5
        ));
    }

    #[tokio::test]
    async fn test_replay_writes_nothing() {
        let stored = user(Tier::Premium5, Some(period_end()));

        let mut store = MockUserStore::new();
        store
            .expect_find_by_customer_id()
            .times(1)
            .return_once(move |_, _| Ok(Some(stored)));
        store.expect_update_subscription().never();
        store.expect_set_tier().never();

        let outcome = reconciler(store)
            .reconcile(
                &OpContext::background(),
                &subscription(SubscriptionStatus::Active, Some(PERIOD_END)),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Unchanged { .. }));
    }

    #[tokio::test]
    async fn test_inactive_subscription_downgrades_and_keeps_expiry() {
        let stored = user(Tier::Premium20, Some(period_end()));

        let mut store = MockUserStore::new();
        store
            .expect_find_by_customer_id()
            .return_once(move |_, _| Ok(Some(stored)));
        store
            .expect_update_subscription()
            .withf(|_, _, _, next| {
                next.tier == Tier::Free && next.subscribed_until == Some(period_end())
            })
            .times(1)
            .return_once(|_, _, _, _| Ok(true));

        reconciler(store)
            .reconcile(
                &OpContext::background(),
                &subscription(SubscriptionStatus::Canceled, Some(PERIOD_END + 3600)),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_period_end_keeps_expiry() {
        let previous_end = period_end();
        let stored = user(Tier::Free, Some(previous_end));

        let mut store = MockUserStore::new();
        store
            .expect_find_by_customer_id()
            .return_once(move |_, _| Ok(Some(stored)));
        store
            .expect_update_subscription()
            .withf(move |_, _, _, next| {
                next.tier == Tier::Premium5 && next.subscribed_until == Some(previous_end)
            })
            .times(1)
            .return_once(|_, _, _, _| Ok(true));

        reconciler(store)
            .reconcile(
                &OpContext::background(),
                &subscription(SubscriptionStatus::Active, None),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_customer_is_not_found_without_writes() {
        let mut store = MockUserStore::new();
        store
            .expect_find_by_customer_id()
            .times(1)
            .return_once(|_, _| Ok(None));
        store.expect_update_subscription().never();
        store.expect_set_tier().never();

        let err = reconciler(store)
            .reconcile(
                &OpContext::background(),
                &subscription(SubscriptionStatus::Active, Some(PERIOD_END)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AccountsError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_lost_race_rereads_and_retries() {
        let mut store = MockUserStore::new();
        store
            .expect_find_by_customer_id()
            .times(2)
            .returning(|_, _| Ok(Some(user(Tier::Free, None))));

        let mut results = vec![Ok(true), Ok(false)];
        store
            .expect_update_subscription()
            .times(2)
            .returning(move |_, _, _, _| results.pop().unwrap_or(Ok(false)));

        let outcome = reconciler(store)
            .reconcile(
                &OpContext::background(),
                &subscription(SubscriptionStatus::Active, Some(PERIOD_END)),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Updated { .. }));
    }

    #[tokio::test]
    async fn test_persistent_conflict_gives_up() {
        let mut store = MockUserStore::new();
        store
            .expect_find_by_customer_id()
            .times(MAX_RECONCILE_ATTEMPTS)
            .returning(|_, _| Ok(Some(user(Tier::Free, None))));
        store
            .expect_update_subscription()
            .times(MAX_RECONCILE_ATTEMPTS)
            .returning(|_, _, _, _| Ok(false));

        let err = reconciler(store)
            .reconcile(
                &OpContext::background(),
                &subscription(SubscriptionStatus::Active, Some(PERIOD_END)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AccountsError::Conflict(_)));
    }

    #[test]
    fn test_unknown_plan_grants_free_tier() {
        let reconciler = reconciler(MockUserStore::new());
        let mut state = subscription(SubscriptionStatus::Active, None);
        state.product_id = Some("prod_retired".to_string());

        let target = reconciler
            .target(
                SubscriptionSnapshot {
                    tier: Tier::Premium80,
                    subscribed_until: None,
                },
                &state,
            )
            .unwrap();

        assert_eq!(target.tier, Tier::Free);
    }
}
