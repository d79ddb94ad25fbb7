/// Activity history endpoints
///
/// # Endpoints
///
/// - `GET /v1/user/uploads?offset=0&pageSize=10` - Uploads, newest first
/// - `GET /v1/user/downloads?offset=0&pageSize=10` - Downloads, newest first
/// - `GET /v1/user/stats` - Activity counts
///
/// List responses carry the page and the user's total:
///
/// ```json
/// {
///   "items": [{ "id": "uuid", "skylink": "AAC...", "name": "a.txt", "size": 42, "timestamp": "..." }],
///   "offset": 0,
///   "pageSize": 10,
///   "count": 1
/// }
/// ```

use crate::{
    app::{AppState, CurrentUser},
    error::ApiResult,
};
use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use skyaccounts_shared::{
    db::pipeline::Pagination,
    models::{
        download::{Download, DownloadResponse},
        registry::{RegistryAccess, RegistryEntry},
        upload::{Upload, UploadResponse},
    },
};

/// Pagination query parameters
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub offset: Option<i64>,
    pub page_size: Option<i64>,
}

/// One page of activity plus the total count
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityPage<T> {
    pub items: Vec<T>,
    pub offset: i64,
    pub page_size: i64,
    pub count: i64,
}

/// Activity counts
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityStats {
    pub uploads: i64,
    pub downloads: i64,
    pub registry_reads: i64,
    pub registry_writes: i64,
}

/// Lists the authenticated user's uploads
pub async fn list_uploads(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<ActivityPage<UploadResponse>>> {
    let page = Pagination::new(query.offset, query.page_size)?;
    let ctx = state.request_context();

    let (items, count) = tokio::try_join!(
        Upload::list_by_user(&state.db, &ctx, user.id, page),
        Upload::count_by_user(&state.db, &ctx, user.id),
    )?;

    Ok(Json(ActivityPage {
        items,
        offset: page.offset,
        page_size: page.page_size,
        count,
    }))
}

/// Lists the authenticated user's downloads
pub async fn list_downloads(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<ActivityPage<DownloadResponse>>> {
    let page = Pagination::new(query.offset, query.page_size)?;
    let ctx = state.request_context();

    let (items, count) = tokio::try_join!(
        Download::list_by_user(&state.db, &ctx, user.id, page),
        Download::count_by_user(&state.db, &ctx, user.id),
    )?;

    Ok(Json(ActivityPage {
        items,
        offset: page.offset,
        page_size: page.page_size,
        count,
    }))
}

/// Counts the authenticated user's activity
pub async fn stats(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResult<Json<ActivityStats>> {
    let ctx = state.request_context();

    let (uploads, downloads, registry_reads, registry_writes) = tokio::try_join!(
        Upload::count_by_user(&state.db, &ctx, user.id),
        Download::count_by_user(&state.db, &ctx, user.id),
        RegistryEntry::count_by_user(&state.db, &ctx, RegistryAccess::Read, user.id),
        RegistryEntry::count_by_user(&state.db, &ctx, RegistryAccess::Write, user.id),
    )?;

    Ok(Json(ActivityStats {
        uploads,
        downloads,
        registry_reads,
        registry_writes,
    }))
}
