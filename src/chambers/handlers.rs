use axum::{
    debug_handler,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{auth::CurrentUser, pagination::{Page, PageRequest}, AppResult, AppState};

use super::{ChamberEvents, ChamberMessageView, ChamberView, MemberView, NewChamber, TypingView};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(mine).post(create))
        .route("/public", get(public))
        .route("/join", post(join_by_code))
        .route("/{id}", get(show).delete(destroy))
        .route("/{id}/join", post(join_public))
        .route("/{id}/leave", post(leave))
        .route("/{id}/members", get(members))
        .route("/{id}/invite-code", post(regenerate_code))
        .route("/{id}/messages", get(messages).post(send))
        .route("/{id}/typing", get(typing).put(set_typing))
        .route("/{id}/ws", get(super::ws::ws))
        .route("/messages/{message_id}/reactions", post(react))
        .route("/messages/{message_id}", delete(delete_message))
}

#[derive(Deserialize)]
struct JoinBody {
    code: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageBody {
    content: String,
    audio_storage_id: Option<Uuid>,
}

#[derive(Deserialize)]
struct ReactionBody {
    emoji: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingBody {
    is_typing: bool,
}

#[debug_handler(state = AppState)]
async fn mine(State(db_pool): State<SqlitePool>, CurrentUser(user): CurrentUser) -> AppResult<Json<Vec<ChamberView>>> {
    Ok(Json(super::list_my_chambers(&db_pool, user.id).await?))
}

#[debug_handler(state = AppState)]
async fn create(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Json(new): Json<NewChamber>,
) -> AppResult<(StatusCode, Json<ChamberView>)> {
    let chamber = super::create_chamber(&db_pool, &user, new).await?;
    Ok((StatusCode::CREATED, Json(chamber)))
}

#[debug_handler(state = AppState)]
async fn public(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Query(page): Query<PageRequest>,
) -> AppResult<Json<Page<ChamberView>>> {
    Ok(Json(super::list_public_chambers(&db_pool, user.id, &page).await?))
}

#[debug_handler(state = AppState)]
async fn join_by_code(
    State(db_pool): State<SqlitePool>,
    State(events): State<ChamberEvents>,
    CurrentUser(user): CurrentUser,
    Json(JoinBody { code }): Json<JoinBody>,
) -> AppResult<Json<ChamberView>> {
    Ok(Json(super::join_by_code(&db_pool, &events, user.id, &code).await?))
}

#[debug_handler(state = AppState)]
async fn show(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ChamberView>> {
    Ok(Json(super::get_chamber(&db_pool, user.id, id).await?))
}

#[debug_handler(state = AppState)]
async fn destroy(
    State(db_pool): State<SqlitePool>,
    State(events): State<ChamberEvents>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    super::delete_chamber(&db_pool, &events, &user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler(state = AppState)]
async fn join_public(
    State(db_pool): State<SqlitePool>,
    State(events): State<ChamberEvents>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ChamberView>> {
    Ok(Json(super::join_public(&db_pool, &events, user.id, id).await?))
}

#[debug_handler(state = AppState)]
async fn leave(
    State(db_pool): State<SqlitePool>,
    State(events): State<ChamberEvents>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    super::leave_chamber(&db_pool, &events, user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler(state = AppState)]
async fn members(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<MemberView>>> {
    Ok(Json(super::list_members(&db_pool, user.id, id).await?))
}

#[debug_handler(state = AppState)]
async fn regenerate_code(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ChamberView>> {
    Ok(Json(super::regenerate_invite_code(&db_pool, user.id, id).await?))
}

#[debug_handler(state = AppState)]
async fn messages(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Query(page): Query<PageRequest>,
) -> AppResult<Json<Page<ChamberMessageView>>> {
    Ok(Json(super::list_messages(&db_pool, user.id, id, &page).await?))
}

#[debug_handler(state = AppState)]
async fn send(
    State(db_pool): State<SqlitePool>,
    State(events): State<ChamberEvents>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(MessageBody { content, audio_storage_id }): Json<MessageBody>,
) -> AppResult<(StatusCode, Json<ChamberMessageView>)> {
    let message = super::send_message(&db_pool, &events, user.id, id, &content, audio_storage_id).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[debug_handler(state = AppState)]
async fn typing(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<TypingView>>> {
    Ok(Json(super::list_typing(&db_pool, user.id, id).await?))
}

#[debug_handler(state = AppState)]
async fn set_typing(
    State(db_pool): State<SqlitePool>,
    State(events): State<ChamberEvents>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(TypingBody { is_typing }): Json<TypingBody>,
) -> AppResult<StatusCode> {
    super::set_typing(&db_pool, &events, user.id, id, is_typing).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler(state = AppState)]
async fn react(
    State(db_pool): State<SqlitePool>,
    State(events): State<ChamberEvents>,
    CurrentUser(user): CurrentUser,
    Path(message_id): Path<Uuid>,
    Json(ReactionBody { emoji }): Json<ReactionBody>,
) -> AppResult<Json<ChamberMessageView>> {
    Ok(Json(super::toggle_reaction(&db_pool, &events, user.id, message_id, &emoji).await?))
}

/// Senders may take back their own messages; admins may remove any.
#[debug_handler(state = AppState)]
async fn delete_message(
    State(db_pool): State<SqlitePool>,
    State(events): State<ChamberEvents>,
    CurrentUser(user): CurrentUser,
    Path(message_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    super::delete_message(&db_pool, &events, &user, message_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
