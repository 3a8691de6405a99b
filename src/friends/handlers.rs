use axum::{
    debug_handler,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{auth::CurrentUser, AppResult, AppState};

use super::{FriendEntry, Friendship};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(friends))
        .route("/requests", post(send_request))
        .route("/requests/incoming", get(incoming))
        .route("/requests/outgoing", get(outgoing))
        .route("/requests/{id}/accept", post(accept))
        .route("/requests/{id}/decline", post(decline))
        .route("/requests/{id}", axum::routing::delete(cancel))
        .route("/{user_id}", get(relation).delete(remove))
        .route("/{user_id}/block", post(block).delete(unblock))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendRequestBody {
    user_id: Uuid,
}

#[debug_handler(state = AppState)]
async fn friends(State(db_pool): State<SqlitePool>, CurrentUser(user): CurrentUser) -> AppResult<Json<Vec<FriendEntry>>> {
    Ok(Json(super::list_friends(&db_pool, user.id).await?))
}

#[debug_handler(state = AppState)]
async fn send_request(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Json(SendRequestBody { user_id }): Json<SendRequestBody>,
) -> AppResult<Json<Friendship>> {
    Ok(Json(super::send_request(&db_pool, user.id, user_id).await?))
}

#[debug_handler(state = AppState)]
async fn incoming(State(db_pool): State<SqlitePool>, CurrentUser(user): CurrentUser) -> AppResult<Json<Vec<FriendEntry>>> {
    Ok(Json(super::list_incoming(&db_pool, user.id).await?))
}

#[debug_handler(state = AppState)]
async fn outgoing(State(db_pool): State<SqlitePool>, CurrentUser(user): CurrentUser) -> AppResult<Json<Vec<FriendEntry>>> {
    Ok(Json(super::list_outgoing(&db_pool, user.id).await?))
}

#[debug_handler(state = AppState)]
async fn accept(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Friendship>> {
    Ok(Json(super::accept_request(&db_pool, user.id, id).await?))
}

#[debug_handler(state = AppState)]
async fn decline(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    super::decline_request(&db_pool, user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler(state = AppState)]
async fn cancel(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    super::cancel_request(&db_pool, user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler(state = AppState)]
async fn relation(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let relation = super::relation(&db_pool, user.id, user_id).await?;
    Ok(Json(json!({ "relation": relation })))
}

#[debug_handler(state = AppState)]
async fn remove(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    super::remove_friend(&db_pool, user.id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler(state = AppState)]
async fn block(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    super::block_user(&db_pool, user.id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler(state = AppState)]
async fn unblock(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    super::unblock_user(&db_pool, user.id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
