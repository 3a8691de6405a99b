use axum::{
    debug_handler,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{auth::CurrentUser, pagination::{Page, PageRequest}, AppResult, AppState};

use super::{ConversationView, MessageView};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list))
        .route("/echo/{whisper_id}", post(echo))
        .route("/{id}", get(show))
        .route("/{id}/accept", post(accept))
        .route("/{id}/close", post(close))
        .route("/{id}/messages", get(messages).post(send))
        .route("/{id}/unmask", post(unmask).delete(withdraw_unmask))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageBody {
    content: String,
    image_storage_id: Option<Uuid>,
}

#[debug_handler(state = AppState)]
async fn list(State(db_pool): State<SqlitePool>, CurrentUser(user): CurrentUser) -> AppResult<Json<Vec<ConversationView>>> {
    Ok(Json(super::list_conversations(&db_pool, user.id).await?))
}

#[debug_handler(state = AppState)]
async fn echo(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(whisper_id): Path<Uuid>,
    Json(MessageBody { content, .. }): Json<MessageBody>,
) -> AppResult<(StatusCode, Json<ConversationView>)> {
    let conversation = super::echo_whisper(&db_pool, &user, whisper_id, &content).await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

#[debug_handler(state = AppState)]
async fn show(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ConversationView>> {
    Ok(Json(super::get_conversation(&db_pool, user.id, id).await?))
}

#[debug_handler(state = AppState)]
async fn accept(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ConversationView>> {
    Ok(Json(super::accept_conversation(&db_pool, user.id, id).await?))
}

#[debug_handler(state = AppState)]
async fn close(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ConversationView>> {
    Ok(Json(super::close_conversation(&db_pool, user.id, id).await?))
}

#[debug_handler(state = AppState)]
async fn messages(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Query(page): Query<PageRequest>,
) -> AppResult<Json<Page<MessageView>>> {
    Ok(Json(super::list_messages(&db_pool, user.id, id, &page).await?))
}

#[debug_handler(state = AppState)]
async fn send(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(MessageBody { content, image_storage_id }): Json<MessageBody>,
) -> AppResult<(StatusCode, Json<MessageView>)> {
    let message = super::send_message(&db_pool, user.id, id, &content, image_storage_id).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[debug_handler(state = AppState)]
async fn unmask(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ConversationView>> {
    Ok(Json(super::request_unmask(&db_pool, user.id, id).await?))
}

#[debug_handler(state = AppState)]
async fn withdraw_unmask(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ConversationView>> {
    Ok(Json(super::withdraw_unmask(&db_pool, user.id, id).await?))
}
