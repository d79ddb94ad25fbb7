/// Activity tracking endpoints
///
/// Called by portal servers to record what an authenticated user did.
///
/// # Endpoints
///
/// - `POST /v1/track/upload/:skylink?name=a.txt&size=42` - Record an upload
/// - `POST /v1/track/download/:skylink?bytes=1024` - Record a download
/// - `POST /v1/track/registry/read` - Record a registry read
/// - `POST /v1/track/registry/write` - Record a registry write
///
/// All respond with `204 No Content`.

use crate::{
    app::{AppState, CurrentUser},
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension,
};
use serde::Deserialize;
use skyaccounts_shared::models::{
    download::Download,
    registry::{RegistryAccess, RegistryEntry},
    skylink::{parse_skylink, Skylink},
    upload::Upload,
};
use tracing::debug;

/// Content metadata reported with an upload
#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    pub name: Option<String>,
    pub size: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DownloadQuery {
    /// Bytes served; 0 when unknown
    pub bytes: Option<i64>,
}

/// Records an upload of `skylink`
pub async fn track_upload(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(raw): Path<String>,
    Query(query): Query<UploadQuery>,
) -> ApiResult<StatusCode> {
    let skylink = parse_skylink(&raw)?;
    let ctx = state.request_context();

    let record = ctx
        .run("upsert skylink", Skylink::find_or_create(&state.db, &skylink))
        .await?;

    match (query.name, query.size) {
        (Some(name), Some(size)) => {
            ctx.run(
                "store skylink metadata",
                Skylink::update_metadata(&state.db, record.id, &name, size),
            )
            .await?;
        }
        (None, None) => {}
        _ => {
            return Err(ApiError::BadRequest(
                "name and size must be given together".to_string(),
            ))
        }
    }

    ctx.run("record upload", Upload::create(&state.db, user.id, record.id))
        .await?;

    debug!(user_id = %user.id, skylink = %skylink, "Recorded upload");
    Ok(StatusCode::NO_CONTENT)
}

/// Records a download of `skylink`
pub async fn track_download(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(raw): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> ApiResult<StatusCode> {
    let skylink = parse_skylink(&raw)?;
    let bytes = query.bytes.unwrap_or(0);
    let ctx = state.request_context();

    let record = ctx
        .run("upsert skylink", Skylink::find_or_create(&state.db, &skylink))
        .await?;
    ctx.run(
        "record download",
        Download::create(&state.db, user.id, record.id, bytes),
    )
    .await?;

    debug!(user_id = %user.id, skylink = %skylink, bytes, "Recorded download");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn track_registry_read(
    state: State<AppState>,
    user: Extension<CurrentUser>,
) -> ApiResult<StatusCode> {
    track_registry(state, user, RegistryAccess::Read).await
}

pub async fn track_registry_write(
    state: State<AppState>,
    user: Extension<CurrentUser>,
) -> ApiResult<StatusCode> {
    track_registry(state, user, RegistryAccess::Write).await
}

async fn track_registry(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    access: RegistryAccess,
) -> ApiResult<StatusCode> {
    let ctx = state.request_context();
    ctx.run(
        "record registry access",
        RegistryEntry::create(&state.db, access, user.id),
    )
    .await?;

    debug!(user_id = %user.id, ?access, "Recorded registry access");
    Ok(StatusCode::NO_CONTENT)
}
