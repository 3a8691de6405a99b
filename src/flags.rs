//! Runtime feature flags stored in the database.

use axum::{
    debug_handler,
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;

use crate::{auth::CurrentUser, db::now_ms, AppError, AppResult};

pub const ECHO_CHAMBERS: &str = "echo_chambers";
pub const RESONANCE_MATCHING: &str = "resonance_matching";
pub const VOICE_MESSAGES: &str = "voice_messages";
pub const UNMASKING: &str = "unmasking";

const DEFAULTS: [(&str, &str); 4] = [
    (ECHO_CHAMBERS, "Anonymous group chats joined by invite code"),
    (RESONANCE_MATCHING, "Pair users by mood, life phase and interests"),
    (VOICE_MESSAGES, "Audio attachments on whispers and chamber messages"),
    (UNMASKING, "Mutual identity reveal inside a conversation"),
];

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlag {
    pub name: String,
    pub enabled: bool,
    pub description: String,
    pub updated_at: i64,
}

pub(crate) async fn seed_defaults(db_pool: &SqlitePool) -> AppResult<()> {
    for (name, description) in DEFAULTS {
        sqlx::query("INSERT OR IGNORE INTO feature_flags (name,enabled,description,updated_at) VALUES (?,1,?,?)")
            .bind(name)
            .bind(description)
            .bind(now_ms())
            .execute(db_pool)
            .await?;
    }
    Ok(())
}

pub async fn list_flags(db_pool: &SqlitePool) -> AppResult<Vec<FeatureFlag>> {
    Ok(sqlx::query_as("SELECT name,enabled,description,updated_at FROM feature_flags ORDER BY name")
        .fetch_all(db_pool)
        .await?)
}

/// Unknown flags read as disabled.
pub async fn is_enabled(db_pool: &SqlitePool, name: &str) -> AppResult<bool> {
    let enabled: Option<(bool,)> = sqlx::query_as("SELECT enabled FROM feature_flags WHERE name=?")
        .bind(name)
        .fetch_optional(db_pool)
        .await?;
    Ok(enabled.is_some_and(|(on,)| on))
}

pub async fn require_enabled(db_pool: &SqlitePool, name: &str) -> AppResult<()> {
    if is_enabled(db_pool, name).await? {
        Ok(())
    } else {
        Err(AppError::forbidden(format!("Feature {name} is disabled")))
    }
}

pub async fn set_flag(
    db_pool: &SqlitePool,
    actor: &crate::users::User,
    name: &str,
    enabled: bool,
    description: Option<&str>,
) -> AppResult<FeatureFlag> {
    actor.require_admin()?;
    let name = name.trim();
    if name.is_empty() || name.len() > 64 {
        return Err(AppError::invalid("Flag name must be 1-64 characters"));
    }

    sqlx::query(
        "INSERT INTO feature_flags (name,enabled,description,updated_at) VALUES (?,?,?,?)
         ON CONFLICT(name) DO UPDATE SET enabled=excluded.enabled,
            description=COALESCE(?, feature_flags.description), updated_at=excluded.updated_at",
    )
    .bind(name)
    .bind(enabled)
    .bind(description.unwrap_or(""))
    .bind(now_ms())
    .bind(description)
    .execute(db_pool)
    .await?;

    info!("flag {name} set to {enabled} by {}", actor.id);

    sqlx::query_as("SELECT name,enabled,description,updated_at FROM feature_flags WHERE name=?")
        .bind(name)
        .fetch_optional(db_pool)
        .await?
        .ok_or(AppError::NotFound("Feature flag"))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SetFlagBody {
    enabled: bool,
    description: Option<String>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn flags_index(State(db_pool): State<SqlitePool>) -> AppResult<Json<Vec<FeatureFlag>>> {
    Ok(Json(list_flags(&db_pool).await?))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn flag_update(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user): CurrentUser,
    Path(name): Path<String>,
    Json(SetFlagBody { enabled, description }): Json<SetFlagBody>,
) -> AppResult<Json<FeatureFlag>> {
    Ok(Json(set_flag(&db_pool, &user, &name, enabled, description.as_deref()).await?))
}
