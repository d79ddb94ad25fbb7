/// Download records and the enriched download listing
///
/// A download may be partial; `bytes` then holds the number of bytes
/// actually served and overrides the skylink's full size in listings.

use crate::context::OpContext;
use crate::db::aggregate::{aggregate, count};
use crate::db::pipeline::{downloads_pipeline, Filter, Pagination};
use crate::db::schema::Collection;
use crate::error::{AccountsError, AccountsResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// A stored download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Download {
    pub id: Uuid,
    pub user_id: Uuid,
    pub skylink_id: Uuid,

    /// Bytes served for a partial download, 0 for a full one
    pub bytes: i64,

    pub timestamp: DateTime<Utc>,
}

/// One entry of a user's download history
///
/// `size` is the effective size: the partial byte count when positive,
/// otherwise the skylink's size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadResponse {
    pub id: Uuid,
    pub skylink: Option<String>,
    pub name: Option<String>,
    pub user_id: Uuid,
    pub skylink_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub size: Option<i64>,
}

impl Download {
    /// Records that `user_id` downloaded `skylink_id`
    ///
    /// # Errors
    ///
    /// Returns [`AccountsError::InvalidInput`] if `bytes` is negative.
    pub async fn create(
        pool: &PgPool,
        user_id: Uuid,
        skylink_id: Uuid,
        bytes: i64,
    ) -> AccountsResult<Self> {
        if bytes < 0 {
            return Err(AccountsError::InvalidInput(format!(
                "downloaded bytes must not be negative, got {}",
                bytes
            )));
        }

        sqlx::query_as::<_, Download>(
            r#"
            INSERT INTO downloads (user_id, skylink_id, bytes)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, skylink_id, bytes, "timestamp"
            "#,
        )
        .bind(user_id)
        .bind(skylink_id)
        .bind(bytes)
        .fetch_one(pool)
        .await
        .map_err(|e| AccountsError::storage("record download", e))
    }

    /// One page of a user's downloads, newest first
    pub async fn list_by_user(
        pool: &PgPool,
        ctx: &OpContext,
        user_id: Uuid,
        page: Pagination,
    ) -> AccountsResult<Vec<DownloadResponse>> {
        let pipeline =
            downloads_pipeline(Filter::eq("user_id", user_id), page.offset, page.page_size);
        aggregate(pool, ctx, &pipeline).await
    }

    /// Total number of a user's downloads
    pub async fn count_by_user(
        pool: &PgPool,
        ctx: &OpContext,
        user_id: Uuid,
    ) -> AccountsResult<i64> {
        count(pool, ctx, Collection::Downloads, Filter::eq("user_id", user_id)).await
    }
}
