/// User model and database operations
///
/// A user is identified externally by `sub` (the identity provider subject)
/// and internally by a storage-assigned UUID. Each user carries a
/// subscription tier and, once registered with the billing provider, a
/// billing customer id.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE users (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     sub TEXT NOT NULL,                 -- unique index users_sub_unique
///     first_name TEXT NOT NULL DEFAULT '',
///     last_name TEXT NOT NULL DEFAULT '',
///     email TEXT NOT NULL,
///     password_hash TEXT NOT NULL DEFAULT '',
///     stripe_customer_id TEXT,
///     tier INTEGER NOT NULL DEFAULT 1,
///     subscribed_until TIMESTAMPTZ,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use skyaccounts_shared::models::user::{CreateUser, User};
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let user = User::create(&pool, CreateUser {
///     sub: "b3f1c2d4".to_string(),
///     first_name: "Ada".to_string(),
///     last_name: "Lovelace".to_string(),
///     email: "ada@example.com".to_string(),
///     password_hash: "$argon2id$...".to_string(),
/// }).await?;
///
/// let found = User::find_by_sub(&pool, "b3f1c2d4").await?;
/// assert_eq!(found.map(|u| u.id), Some(user.id));
/// # Ok(())
/// # }
/// ```

use crate::error::{AccountsError, AccountsResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::fmt;
use uuid::Uuid;

const USER_COLUMNS: &str = "id, sub, first_name, last_name, email, password_hash, \
     stripe_customer_id, tier, subscribed_until, created_at";

/// Subscription tier, persisted as an integer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[repr(i32)]
#[serde(try_from = "i32", into = "i32")]
pub enum Tier {
    Anonymous = 0,
    Free = 1,
    Premium5 = 2,
    Premium20 = 3,
    Premium80 = 4,
}

/// Integer that does not name a tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown tier {0}")]
pub struct UnknownTier(pub i32);

impl TryFrom<i32> for Tier {
    type Error = UnknownTier;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Tier::Anonymous),
            1 => Ok(Tier::Free),
            2 => Ok(Tier::Premium5),
            3 => Ok(Tier::Premium20),
            4 => Ok(Tier::Premium80),
            other => Err(UnknownTier(other)),
        }
    }
}

impl From<Tier> for i32 {
    fn from(tier: Tier) -> Self {
        tier as i32
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Anonymous => "anonymous",
            Tier::Free => "free",
            Tier::Premium5 => "premium5",
            Tier::Premium20 => "premium20",
            Tier::Premium80 => "premium80",
        };
        write!(f, "{} ({})", name, *self as i32)
    }
}

/// The subscription fields guarded by conditional writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionSnapshot {
    pub tier: Tier,
    pub subscribed_until: Option<DateTime<Utc>>,
}

/// A user account
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    /// Storage-assigned id
    pub id: Uuid,

    /// Identity provider subject, unique across users
    pub sub: String,

    pub first_name: String,
    pub last_name: String,
    pub email: String,

    /// Argon2id hash; never serialized
    #[serde(skip_serializing, default)]
    pub password_hash: String,

    /// Billing provider customer id, set once the customer exists
    pub stripe_customer_id: Option<String>,

    pub tier: Tier,

    /// End of the paid period; kept when a subscription lapses
    pub subscribed_until: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

/// Input for creating a new user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    pub sub: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,

    /// Argon2id password hash (NOT the plaintext password)
    pub password_hash: String,
}

impl User {
    /// "First Last", skipping empty parts
    pub fn full_name(&self) -> String {
        [self.first_name.trim(), self.last_name.trim()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Current subscription fields
    pub fn snapshot(&self) -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            tier: self.tier,
            subscribed_until: self.subscribed_until,
        }
    }

    /// Creates a new user on the free tier
    ///
    /// # Errors
    ///
    /// - [`AccountsError::AlreadyExists`] if the subject is taken
    /// - [`AccountsError::QueryFailure`] on any other database error
    pub async fn create(pool: &PgPool, data: CreateUser) -> AccountsResult<Self> {
        let query = format!(
            "INSERT INTO users (sub, first_name, last_name, email, password_hash, tier) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            USER_COLUMNS
        );

        sqlx::query_as::<_, User>(&query)
            .bind(data.sub)
            .bind(data.first_name)
            .bind(data.last_name)
            .bind(data.email)
            .bind(data.password_hash)
            .bind(Tier::Free)
            .fetch_one(pool)
            .await
            .map_err(|e| AccountsError::storage("user", e))
    }

    /// Finds a user by identity provider subject
    pub async fn find_by_sub(pool: &PgPool, sub: &str) -> AccountsResult<Option<Self>> {
        let query = format!("SELECT {} FROM users WHERE sub = $1", USER_COLUMNS);

        sqlx::query_as::<_, User>(&query)
            .bind(sub)
            .fetch_optional(pool)
            .await
            .map_err(|e| AccountsError::storage("load user by sub", e))
    }

    /// Finds the user owning a billing customer
    pub async fn find_by_stripe_customer_id(
        pool: &PgPool,
        customer_id: &str,
    ) -> AccountsResult<Option<Self>> {
        let query = format!(
            "SELECT {} FROM users WHERE stripe_customer_id = $1",
            USER_COLUMNS
        );

        sqlx::query_as::<_, User>(&query)
            .bind(customer_id)
            .fetch_optional(pool)
            .await
            .map_err(|e| AccountsError::storage("load user by billing customer", e))
    }

    /// Records the billing customer id of a user
    ///
    /// # Errors
    ///
    /// Returns [`AccountsError::NotFound`] if the user does not exist.
    pub async fn set_stripe_customer_id(
        pool: &PgPool,
        id: Uuid,
        customer_id: &str,
    ) -> AccountsResult<()> {
        let result = sqlx::query("UPDATE users SET stripe_customer_id = $2 WHERE id = $1")
            .bind(id)
            .bind(customer_id)
            .execute(pool)
            .await
            .map_err(|e| AccountsError::storage("store billing customer id", e))?;

        if result.rows_affected() == 0 {
            return Err(AccountsError::NotFound(format!("user {}", id)));
        }
        Ok(())
    }

    /// Sets the tier of a user, leaving the expiry untouched
    ///
    /// # Errors
    ///
    /// Returns [`AccountsError::NotFound`] if the user does not exist.
    pub async fn set_tier(pool: &PgPool, id: Uuid, tier: Tier) -> AccountsResult<()> {
        let result = sqlx::query("UPDATE users SET tier = $2 WHERE id = $1")
            .bind(id)
            .bind(tier)
            .execute(pool)
            .await
            .map_err(|e| AccountsError::storage("store user tier", e))?;

        if result.rows_affected() == 0 {
            return Err(AccountsError::NotFound(format!("user {}", id)));
        }
        Ok(())
    }

    /// Conditionally replaces tier and expiry
    ///
    /// The write only happens when the stored values still equal `expected`.
    ///
    /// # Returns
    ///
    /// `true` if the row was updated, `false` if it changed in the meantime
    /// (or no longer exists)
    pub async fn update_subscription(
        pool: &PgPool,
        id: Uuid,
        expected: SubscriptionSnapshot,
        next: SubscriptionSnapshot,
    ) -> AccountsResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET tier = $2, subscribed_until = $3
            WHERE id = $1
              AND tier = $4
              AND subscribed_until IS NOT DISTINCT FROM $5
            "#,
        )
        .bind(id)
        .bind(next.tier)
        .bind(next.subscribed_until)
        .bind(expected.tier)
        .bind(expected.subscribed_until)
        .execute(pool)
        .await
        .map_err(|e| AccountsError::storage("update user subscription", e))?;

        Ok(result.rows_affected() == 1)
    }
}
