//! Ports the billing workflows depend on.
//!
//! The reconciler and the tier saga only talk to storage and to the billing
//! provider through these traits, so both can be driven by mocks in tests.

use crate::billing::events::SubscriptionState;
use crate::context::OpContext;
use crate::error::AccountsResult;
use crate::models::user::{SubscriptionSnapshot, Tier, User};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

/// A billing customer to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCustomer {
    /// Free-form description; the user's subject
    pub description: String,
    pub email: String,
    pub name: String,

    /// Initial plan, if any
    pub plan: Option<String>,
}

/// User persistence needed by the billing workflows
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Finds the user owning a billing customer.
    async fn find_by_customer_id(
        &self,
        ctx: &OpContext,
        customer_id: &str,
    ) -> AccountsResult<Option<User>>;

    /// Replaces tier and expiry if they still equal `expected`.
    ///
    /// Returns `false` when the stored values changed in the meantime.
    async fn update_subscription(
        &self,
        ctx: &OpContext,
        user_id: Uuid,
        expected: SubscriptionSnapshot,
        next: SubscriptionSnapshot,
    ) -> AccountsResult<bool>;

    /// Sets the tier, leaving the expiry untouched.
    async fn set_tier(&self, ctx: &OpContext, user_id: Uuid, tier: Tier) -> AccountsResult<()>;
}

/// Operations on the external billing provider
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Creates a customer and returns its id.
    async fn create_customer(&self, ctx: &OpContext, customer: NewCustomer)
        -> AccountsResult<String>;

    /// Moves a customer to another plan.
    async fn update_customer_plan(
        &self,
        ctx: &OpContext,
        customer_id: &str,
        plan_id: &str,
    ) -> AccountsResult<()>;

    /// Loads the current state of a subscription.
    async fn fetch_subscription(
        &self,
        ctx: &OpContext,
        subscription_id: &str,
    ) -> AccountsResult<SubscriptionState>;
}

/// [`UserStore`] backed by the `users` table
#[derive(Debug, Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_customer_id(
        &self,
        ctx: &OpContext,
        customer_id: &str,
    ) -> AccountsResult<Option<User>> {
        ctx.run(
            "find user by billing customer",
            User::find_by_stripe_customer_id(&self.pool, customer_id),
        )
        .await
    }

    async fn update_subscription(
        &self,
        ctx: &OpContext,
        user_id: Uuid,
        expected: SubscriptionSnapshot,
        next: SubscriptionSnapshot,
    ) -> AccountsResult<bool> {
        ctx.run(
            "update user subscription",
            User::update_subscription(&self.pool, user_id, expected, next),
        )
        .await
    }

    async fn set_tier(&self, ctx: &OpContext, user_id: Uuid, tier: Tier) -> AccountsResult<()> {
        ctx.run("set user tier", User::set_tier(&self.pool, user_id, tier))
            .await
    }
}
