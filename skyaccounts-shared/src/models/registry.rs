/// Registry activity
///
/// Registry reads and writes are recorded per user for usage statistics.

use crate::context::OpContext;
use crate::db::aggregate::count;
use crate::db::pipeline::Filter;
use crate::db::schema::Collection;
use crate::error::{AccountsError, AccountsResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Kind of registry access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryAccess {
    Read,
    Write,
}

impl RegistryAccess {
    pub fn collection(&self) -> Collection {
        match self {
            RegistryAccess::Read => Collection::RegistryReads,
            RegistryAccess::Write => Collection::RegistryWrites,
        }
    }
}

/// A recorded registry access
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RegistryEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl RegistryEntry {
    /// Records one registry access by `user_id`
    pub async fn create(
        pool: &PgPool,
        access: RegistryAccess,
        user_id: Uuid,
    ) -> AccountsResult<Self> {
        let query = format!(
            r#"INSERT INTO {} (user_id) VALUES ($1) RETURNING id, user_id, "timestamp""#,
            access.collection().as_str()
        );

        sqlx::query_as::<_, RegistryEntry>(&query)
            .bind(user_id)
            .fetch_one(pool)
            .await
            .map_err(|e| AccountsError::storage(format!("record registry {:?}", access), e))
    }

    /// Number of registry accesses of one kind by `user_id`
    pub async fn count_by_user(
        pool: &PgPool,
        ctx: &OpContext,
        access: RegistryAccess,
        user_id: Uuid,
    ) -> AccountsResult<i64> {
        count(pool, ctx, access.collection(), Filter::eq("user_id", user_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_collections() {
        assert_eq!(RegistryAccess::Read.collection(), Collection::RegistryReads);
        assert_eq!(RegistryAccess::Write.collection(), Collection::RegistryWrites);
    }
}
