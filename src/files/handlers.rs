use axum::{
    body::Bytes,
    debug_handler,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{auth::CurrentUser, AppError, AppResult, AppState};

use super::{FileStore, UploadUrl};

/// Session-guarded file operations, nested under `/api/files`.
pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/upload-url", post(upload_url))
        .route("/{id}", axum::routing::delete(delete))
        .route("/{id}/url", get(url))
}

/// Token-guarded upload and public download, nested under `/files`.
pub(crate) fn public_router(max_bytes: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/upload/{token}",
            post(upload).layer(DefaultBodyLimit::max(max_bytes)),
        )
        .route("/{id}", get(download))
}

#[debug_handler(state = AppState)]
async fn upload_url(
    State(db_pool): State<SqlitePool>,
    State(store): State<FileStore>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<UploadUrl>> {
    Ok(Json(super::generate_upload_url(&db_pool, &store, user.id).await?))
}

#[debug_handler(state = AppState)]
async fn upload(
    State(db_pool): State<SqlitePool>,
    State(store): State<FileStore>,
    Path(token): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream");
    let file = super::store_upload(&db_pool, &store, &token, content_type, &body).await?;
    Ok(Json(json!({ "storageId": file.id })))
}

#[debug_handler(state = AppState)]
async fn download(
    State(db_pool): State<SqlitePool>,
    State(store): State<FileStore>,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let file = super::get_file(&db_pool, id).await?.ok_or(AppError::NotFound("File"))?;
    let bytes = store.read_bytes(id).await?;
    Ok(([(header::CONTENT_TYPE, file.content_type)], bytes).into_response())
}

#[debug_handler(state = AppState)]
async fn url(
    State(db_pool): State<SqlitePool>,
    State(store): State<FileStore>,
    CurrentUser(_): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let url = super::get_url(&db_pool, &store, id).await?;
    Ok(Json(json!({ "url": url })))
}

#[debug_handler(state = AppState)]
async fn delete(
    State(db_pool): State<SqlitePool>,
    State(store): State<FileStore>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    super::delete_file(&db_pool, &store, user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
