use axum::{
    debug_handler,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{auth::CurrentUser, files::FileStore, AppError, AppResult, AppState};

use super::{ProfileUpdate, User, UserSummary};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/me", get(me).patch(update_me).delete(delete_me))
        .route("/me/username", put(set_username))
        .route("/by-username/{username}", get(by_username))
}

#[debug_handler(state = AppState)]
async fn me(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}

#[debug_handler(state = AppState)]
async fn update_me(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Json(update): Json<ProfileUpdate>,
) -> AppResult<Json<User>> {
    Ok(Json(super::update_profile(&db_pool, user.id, update).await?))
}

#[derive(Deserialize)]
struct UsernameBody {
    username: String,
}

#[debug_handler(state = AppState)]
async fn set_username(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Json(UsernameBody { username }): Json<UsernameBody>,
) -> AppResult<Json<User>> {
    Ok(Json(super::set_username(&db_pool, user.id, &username).await?))
}

#[debug_handler(state = AppState)]
async fn delete_me(
    State(db_pool): State<SqlitePool>,
    State(files): State<FileStore>,
    CurrentUser(user): CurrentUser,
    session: Session,
) -> AppResult<StatusCode> {
    super::delete_user(&db_pool, &files, user.id).await?;
    session.flush().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler(state = AppState)]
async fn by_username(
    State(db_pool): State<SqlitePool>,
    CurrentUser(_): CurrentUser,
    Path(username): Path<String>,
) -> AppResult<Json<UserSummary>> {
    let user = super::get_by_username(&db_pool, &username)
        .await?
        .ok_or(AppError::NotFound("User"))?;
    Ok(Json(user.summary()))
}

#[derive(Deserialize)]
pub(crate) struct SearchQuery {
    q: String,
    limit: Option<i64>,
}

/// `GET /api/search`
#[debug_handler(state = AppState)]
pub(crate) async fn search(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Query(SearchQuery { q, limit }): Query<SearchQuery>,
) -> AppResult<Json<Vec<UserSummary>>> {
    Ok(Json(super::search(&db_pool, user.id, &q, limit).await?))
}
