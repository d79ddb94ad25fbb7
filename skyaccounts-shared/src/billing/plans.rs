/// Mapping between billing plans and subscription tiers
///
/// The catalog is built once at startup and shared read-only. It maps each
/// billing product id to exactly one tier and back.
///
/// # Example
///
/// ```
/// use skyaccounts_shared::billing::plans::PlanCatalog;
/// use skyaccounts_shared::models::user::Tier;
///
/// let catalog = PlanCatalog::parse("prod_basic=2,prod_pro=3").unwrap();
/// assert_eq!(catalog.tier_for_plan("prod_pro"), Tier::Premium20);
/// assert_eq!(catalog.tier_for_plan("prod_unknown"), Tier::Free);
/// assert_eq!(catalog.plan_for_tier(Tier::Premium5), Some("prod_basic"));
/// assert_eq!(catalog.plan_for_tier(Tier::Premium80), None);
/// ```

use crate::models::user::Tier;
use std::collections::HashMap;

/// Product ids of the production billing account
const DEFAULT_PLANS: [(&str, Tier); 4] = [
    ("prod_J2FBsxvEl4VoUK", Tier::Free),
    ("prod_J06Q7nJH3HJcYN", Tier::Premium5),
    ("prod_J06Qu7zg1unO8R", Tier::Premium20),
    ("prod_J06QbGjCvmZQGZ", Tier::Premium80),
];

/// Error type for catalog construction
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("plan {0} is mapped more than once")]
    DuplicatePlan(String),

    #[error("tier {0} is mapped to more than one plan")]
    DuplicateTier(Tier),

    #[error("malformed plan entry {0:?}, expected <plan>=<tier>")]
    Malformed(String),
}

/// One-to-one mapping of billing plans to tiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanCatalog {
    tiers_by_plan: HashMap<String, Tier>,
    plans_by_tier: HashMap<Tier, String>,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        let mut catalog = Self {
            tiers_by_plan: HashMap::new(),
            plans_by_tier: HashMap::new(),
        };
        for (plan, tier) in DEFAULT_PLANS {
            catalog.tiers_by_plan.insert(plan.to_string(), tier);
            catalog.plans_by_tier.insert(tier, plan.to_string());
        }
        catalog
    }
}

impl PlanCatalog {
    /// Builds a catalog from `(plan, tier)` pairs
    ///
    /// # Errors
    ///
    /// Fails if a plan or a tier appears twice.
    pub fn new<I, S>(entries: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = (S, Tier)>,
        S: Into<String>,
    {
        let mut tiers_by_plan = HashMap::new();
        let mut plans_by_tier = HashMap::new();

        for (plan, tier) in entries {
            let plan = plan.into();
            if tiers_by_plan.contains_key(&plan) {
                return Err(CatalogError::DuplicatePlan(plan));
            }
            if plans_by_tier.contains_key(&tier) {
                return Err(CatalogError::DuplicateTier(tier));
            }
            tiers_by_plan.insert(plan.clone(), tier);
            plans_by_tier.insert(tier, plan);
        }

        Ok(Self {
            tiers_by_plan,
            plans_by_tier,
        })
    }

    /// Parses `plan=tier` pairs separated by commas, tiers as integers
    pub fn parse(value: &str) -> Result<Self, CatalogError> {
        let mut entries = Vec::new();
        for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (plan, tier) = entry
                .split_once('=')
                .ok_or_else(|| CatalogError::Malformed(entry.to_string()))?;
            let plan = plan.trim();
            let tier = tier
                .trim()
                .parse::<i32>()
                .ok()
                .and_then(|value| Tier::try_from(value).ok())
                .ok_or_else(|| CatalogError::Malformed(entry.to_string()))?;
            if plan.is_empty() {
                return Err(CatalogError::Malformed(entry.to_string()));
            }
            entries.push((plan.to_string(), tier));
        }
        Self::new(entries)
    }

    /// Tier granted by `plan`; unknown plans grant the free tier
    pub fn tier_for_plan(&self, plan: &str) -> Tier {
        self.tiers_by_plan.get(plan).copied().unwrap_or(Tier::Free)
    }

    /// Billing plan of `tier`, if one is configured
    pub fn plan_for_tier(&self, tier: Tier) -> Option<&str> {
        self.plans_by_tier.get(&tier).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tiers_by_plan.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers_by_plan.is_empty()
    }
}
