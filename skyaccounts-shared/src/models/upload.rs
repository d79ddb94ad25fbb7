/// Upload records and the enriched upload listing
///
/// Each upload row links a user to a skylink. Listings return the upload
/// merged with its skylink's `skylink`, `name` and `size`; see
/// [`crate::db::pipeline::uploads_pipeline`].

use crate::context::OpContext;
use crate::db::aggregate::{aggregate, count};
use crate::db::pipeline::{uploads_pipeline, Filter, Pagination};
use crate::db::schema::Collection;
use crate::error::{AccountsError, AccountsResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// A stored upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Upload {
    pub id: Uuid,
    pub user_id: Uuid,
    pub skylink_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

/// One entry of a user's upload history
///
/// Skylink fields are absent when the skylink row is missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub id: Uuid,
    pub skylink: Option<String>,
    pub name: Option<String>,
    pub user_id: Uuid,
    pub skylink_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub size: Option<i64>,
}

impl Upload {
    /// Records that `user_id` uploaded `skylink_id`
    pub async fn create(pool: &PgPool, user_id: Uuid, skylink_id: Uuid) -> AccountsResult<Self> {
        sqlx::query_as::<_, Upload>(
            r#"
            INSERT INTO uploads (user_id, skylink_id)
            VALUES ($1, $2)
            RETURNING id, user_id, skylink_id, "timestamp"
            "#,
        )
        .bind(user_id)
        .bind(skylink_id)
        .fetch_one(pool)
        .await
        .map_err(|e| AccountsError::storage("record upload", e))
    }

    /// One page of a user's uploads, newest first
    pub async fn list_by_user(
        pool: &PgPool,
        ctx: &OpContext,
        user_id: Uuid,
        page: Pagination,
    ) -> AccountsResult<Vec<UploadResponse>> {
        let pipeline =
            uploads_pipeline(Filter::eq("user_id", user_id), page.offset, page.page_size);
        aggregate(pool, ctx, &pipeline).await
    }

    /// Total number of a user's uploads
    pub async fn count_by_user(
        pool: &PgPool,
        ctx: &OpContext,
        user_id: Uuid,
    ) -> AccountsResult<i64> {
        count(pool, ctx, Collection::Uploads, Filter::eq("user_id", user_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upload_response_decodes_merged_document() {
        let doc = json!({
            "id": "6f1c1c1e-8f0e-4a38-9e5e-0d6f4f3a9b10",
            "skylink": "AACDPHoC2DCV_kLGUdpdRJr3CcxCmKadLGPi6OAMl7d48w",
            "name": "cat.png",
            "size": 1024,
            "user_id": "0b6f3f0c-2f1e-4e8e-9f67-1c2d3e4f5a6b",
            "skylink_id": "9a8b7c6d-5e4f-4a3b-8c2d-1e0f9a8b7c6d",
            "timestamp": "2024-03-01T12:00:00.123456+00:00"
        });
        let upload: UploadResponse = serde_json::from_value(doc).unwrap();
        assert_eq!(upload.name.as_deref(), Some("cat.png"));
        assert_eq!(upload.size, Some(1024));
    }

    #[test]
    fn test_upload_response_without_skylink() {
        let doc = json!({
            "id": "6f1c1c1e-8f0e-4a38-9e5e-0d6f4f3a9b10",
            "user_id": "0b6f3f0c-2f1e-4e8e-9f67-1c2d3e4f5a6b",
            "skylink_id": "9a8b7c6d-5e4f-4a3b-8c2d-1e0f9a8b7c6d",
            "timestamp": "2024-03-01T12:00:00+00:00"
        });
        let upload: UploadResponse = serde_json::from_value(doc).unwrap();
        assert_eq!(upload.skylink, None);
        assert_eq!(upload.size, None);
    }
}
