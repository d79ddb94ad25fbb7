/// Tier changes initiated by the service
///
/// Assigning a tier touches two systems: the billing provider (the
/// customer's plan) and the local user record. [`TierSync::assign_tier`]
/// updates the provider first and the user second. When the local write
/// fails, the provider is moved back to the previous plan. When that fails
/// too, both failures are reported together and the two systems may
/// disagree until the next subscription event reconciles them.

use crate::billing::plans::PlanCatalog;
use crate::billing::ports::{BillingProvider, NewCustomer, UserStore};
use crate::context::OpContext;
use crate::error::{AccountsError, AccountsResult};
use crate::models::user::{Tier, User};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Time allowed for the compensating plan revert
///
/// The revert runs under its own context so a cancelled request still
/// gets its billing plan restored.
pub const COMPENSATION_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TierSync {
    users: Arc<dyn UserStore>,
    billing: Arc<dyn BillingProvider>,
    catalog: Arc<PlanCatalog>,
}

impl TierSync {
    pub fn new(
        users: Arc<dyn UserStore>,
        billing: Arc<dyn BillingProvider>,
        catalog: Arc<PlanCatalog>,
    ) -> Self {
        Self {
            users,
            billing,
            catalog,
        }
    }

    /// Moves `user` to `new_tier` at the billing provider and locally
    ///
    /// On success `user.tier` is `new_tier`; on failure it is unchanged.
    ///
    /// # Errors
    ///
    /// - [`AccountsError::PlanNotConfigured`] if `new_tier` has no plan;
    ///   nothing was changed
    /// - [`AccountsError::NotFound`] if the user has no billing customer
    /// - the provider's error if the plan update failed; nothing was changed
    /// - the storage error if the local write failed and the plan was
    ///   reverted
    /// - [`AccountsError::CompositeFailure`] if the revert failed as well
    pub async fn assign_tier(
        &self,
        ctx: &OpContext,
        user: &mut User,
        new_tier: Tier,
    ) -> AccountsResult<()> {
        let new_plan = self
            .catalog
            .plan_for_tier(new_tier)
            .ok_or(AccountsError::PlanNotConfigured(new_tier))?;
        let customer_id = user.stripe_customer_id.as_deref().ok_or_else(|| {
            AccountsError::NotFound(format!("billing customer of user {}", user.id))
        })?;
        let old_tier = user.tier;

        self.billing
            .update_customer_plan(ctx, customer_id, new_plan)
            .await?;

        if let Err(primary) = self.users.set_tier(ctx, user.id, new_tier).await {
            warn!(
                user_id = %user.id,
                error = %primary,
                "Storing tier failed, reverting billing plan"
            );
            let compensation = self.revert_plan(customer_id, old_tier).await.err();
            if let Some(compensation) = &compensation {
                error!(
                    user_id = %user.id,
                    customer_id,
                    error = %compensation,
                    "Reverting billing plan failed, billing and local tier disagree"
                );
            }
            return Err(AccountsError::compose(primary, compensation));
        }

        user.tier = new_tier;
        info!(user_id = %user.id, from_tier = %old_tier, to_tier = %new_tier, "Assigned tier");
        Ok(())
    }

    async fn revert_plan(&self, customer_id: &str, old_tier: Tier) -> AccountsResult<()> {
        let old_plan = self
            .catalog
            .plan_for_tier(old_tier)
            .ok_or(AccountsError::PlanNotConfigured(old_tier))?;
        let ctx = OpContext::with_timeout(COMPENSATION_TIMEOUT);
        self.billing
            .update_customer_plan(&ctx, customer_id, old_plan)
            .await
    }

    /// Registers `user` as a billing customer and returns the customer id
    ///
    /// The customer starts on the free tier's plan when one is configured.
    /// The user record is not modified.
    pub async fn create_customer(&self, ctx: &OpContext, user: &User) -> AccountsResult<String> {
        let customer = NewCustomer {
            description: user.sub.clone(),
            email: user.email.clone(),
            name: user.full_name(),
            plan: self.catalog.plan_for_tier(Tier::Free).map(str::to_string),
        };
        self.billing.create_customer(ctx, customer).await
    }
}
