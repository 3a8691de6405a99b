use axum::{
    debug_handler,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    auth::CurrentUser,
    chambers::ChamberEvents,
    users::{AdminRole, User},
    AppResult, AppState,
};

use super::AdminRequest;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/requests", get(pending).post(submit))
        .route("/requests/mine", get(mine))
        .route("/requests/{id}/approve", post(approve))
        .route("/requests/{id}/reject", post(reject))
        .route("/users/{user_id}/role", put(set_role))
        .route("/whispers/{id}", delete(delete_whisper))
        .route("/chamber-messages/{id}", delete(delete_chamber_message))
}

#[derive(Deserialize)]
struct RequestBody {
    reason: String,
}

#[derive(Deserialize)]
struct RoleBody {
    role: AdminRole,
}

#[debug_handler(state = AppState)]
async fn submit(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Json(RequestBody { reason }): Json<RequestBody>,
) -> AppResult<(StatusCode, Json<AdminRequest>)> {
    let request = super::submit_request(&db_pool, &user, &reason).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

#[debug_handler(state = AppState)]
async fn mine(State(db_pool): State<SqlitePool>, CurrentUser(user): CurrentUser) -> AppResult<Json<Vec<AdminRequest>>> {
    Ok(Json(super::my_requests(&db_pool, user.id).await?))
}

#[debug_handler(state = AppState)]
async fn pending(State(db_pool): State<SqlitePool>, CurrentUser(user): CurrentUser) -> AppResult<Json<Vec<AdminRequest>>> {
    Ok(Json(super::list_pending(&db_pool, &user).await?))
}

#[debug_handler(state = AppState)]
async fn approve(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<AdminRequest>> {
    Ok(Json(super::approve_request(&db_pool, &user, id).await?))
}

#[debug_handler(state = AppState)]
async fn reject(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<AdminRequest>> {
    Ok(Json(super::reject_request(&db_pool, &user, id).await?))
}

#[debug_handler(state = AppState)]
async fn set_role(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(user_id): Path<Uuid>,
    Json(RoleBody { role }): Json<RoleBody>,
) -> AppResult<Json<User>> {
    Ok(Json(super::set_role(&db_pool, &user, user_id, role).await?))
}

#[debug_handler(state = AppState)]
async fn delete_whisper(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    super::delete_whisper_as_admin(&db_pool, &user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler(state = AppState)]
async fn delete_chamber_message(
    State(db_pool): State<SqlitePool>,
    State(events): State<ChamberEvents>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    super::delete_chamber_message_as_admin(&db_pool, &events, &user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
