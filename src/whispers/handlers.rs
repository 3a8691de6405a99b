use axum::{
    debug_handler,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{auth::CurrentUser, pagination::{Page, PageRequest}, AppResult, AppState};

use super::{NewWhisper, ReceivedWhisper, Whisper};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(send))
        .route("/received", get(received))
        .route("/sent", get(sent))
        .route("/unread-count", get(unread_count))
        .route("/read-all", post(read_all))
        .route("/{id}", axum::routing::delete(delete))
        .route("/{id}/read", post(read))
}

#[debug_handler(state = AppState)]
async fn send(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Json(new): Json<NewWhisper>,
) -> AppResult<(StatusCode, Json<Whisper>)> {
    let whisper = super::send_whisper(&db_pool, &user, new).await?;
    Ok((StatusCode::CREATED, Json(whisper)))
}

#[debug_handler(state = AppState)]
async fn received(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Query(page): Query<PageRequest>,
) -> AppResult<Json<Page<ReceivedWhisper>>> {
    Ok(Json(super::list_received(&db_pool, user.id, &page).await?))
}

#[debug_handler(state = AppState)]
async fn sent(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Query(page): Query<PageRequest>,
) -> AppResult<Json<Page<Whisper>>> {
    Ok(Json(super::list_sent(&db_pool, user.id, &page).await?))
}

#[debug_handler(state = AppState)]
async fn unread_count(State(db_pool): State<SqlitePool>, CurrentUser(user): CurrentUser) -> AppResult<Json<Value>> {
    let count = super::unread_count(&db_pool, user.id).await?;
    Ok(Json(json!({ "count": count })))
}

#[debug_handler(state = AppState)]
async fn read_all(State(db_pool): State<SqlitePool>, CurrentUser(user): CurrentUser) -> AppResult<Json<Value>> {
    let updated = super::mark_all_read(&db_pool, user.id).await?;
    Ok(Json(json!({ "updated": updated })))
}

#[debug_handler(state = AppState)]
async fn read(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ReceivedWhisper>> {
    Ok(Json(super::mark_as_read(&db_pool, user.id, id).await?))
}

#[debug_handler(state = AppState)]
async fn delete(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    super::delete_whisper(&db_pool, user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
