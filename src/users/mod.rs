mod handlers;

use serde::{Deserialize, Serialize};
use sqlx::{types::Json, SqlitePool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    db::{new_id, now_ms},
    error::is_unique_violation,
    files::FileStore,
    AppError, AppResult,
};

pub(crate) use handlers::{router, search as search_route};

pub const MAX_INTERESTS: usize = 10;
const MAX_INTEREST_LEN: usize = 30;
const MAX_TEXT_FIELD: usize = 50;
const MAX_SEARCH_RESULTS: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum AdminRole {
    None,
    Admin,
    SuperAdmin,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub subject: String,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub career: Option<String>,
    pub mood: Option<String>,
    pub life_phase: Option<String>,
    pub interests: Json<Vec<String>>,
    pub preferences: Json<serde_json::Value>,
    pub resonance_opt_in: bool,
    pub role: AdminRole,
    pub created_at: i64,
    pub updated_at: i64,
}

impl User {
    pub fn is_admin(&self) -> bool {
        matches!(self.role, AdminRole::Admin | AdminRole::SuperAdmin)
    }

    pub fn require_admin(&self) -> AppResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::forbidden("Not authorized: admin access required"))
        }
    }

    pub fn require_super_admin(&self) -> AppResult<()> {
        if self.role == AdminRole::SuperAdmin {
            Ok(())
        } else {
            Err(AppError::forbidden("Not authorized: super admin access required"))
        }
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            username: self.username.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

/// What other users may see of someone they know.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub username: Option<String>,
    pub display_name: Option<String>,
}

/// Claims handed over by the identity provider.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityProfile {
    pub username: Option<String>,
    pub display_name: Option<String>,
}

/// Profile patch. `None` leaves a field alone; an empty string clears it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub career: Option<String>,
    pub mood: Option<String>,
    pub life_phase: Option<String>,
    pub interests: Option<Vec<String>>,
    pub preferences: Option<serde_json::Value>,
    pub resonance_opt_in: Option<bool>,
}

const USER_COLUMNS: &str = "id,subject,username,display_name,career,mood,life_phase,interests,preferences,resonance_opt_in,role,created_at,updated_at";

pub async fn get_by_id(db_pool: &SqlitePool, id: Uuid) -> AppResult<Option<User>> {
    Ok(sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id=?"))
        .bind(id)
        .fetch_optional(db_pool)
        .await?)
}

pub async fn require(db_pool: &SqlitePool, id: Uuid) -> AppResult<User> {
    get_by_id(db_pool, id).await?.ok_or(AppError::NotFound("User"))
}

pub async fn get_by_subject(db_pool: &SqlitePool, subject: &str) -> AppResult<Option<User>> {
    Ok(sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE subject=?"))
        .bind(subject)
        .fetch_optional(db_pool)
        .await?)
}

pub async fn get_by_username(db_pool: &SqlitePool, username: &str) -> AppResult<Option<User>> {
    Ok(sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE username=?"))
        .bind(username.trim())
        .fetch_optional(db_pool)
        .await?)
}

/// Creates the local record for an identity subject, or refreshes it.
pub async fn upsert_from_identity(
    db_pool: &SqlitePool,
    subject: &str,
    profile: &IdentityProfile,
    super_admin: bool,
) -> AppResult<User> {
    let display_name = profile
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| truncate(s, MAX_TEXT_FIELD));

    let user = match get_by_subject(db_pool, subject).await? {
        Some(user) => {
            if display_name.is_some() {
                sqlx::query("UPDATE users SET display_name=?,updated_at=? WHERE id=?")
                    .bind(&display_name)
                    .bind(now_ms())
                    .bind(user.id)
                    .execute(db_pool)
                    .await?;
            }
            user
        }
        None => {
            let id = new_id();
            let now = now_ms();
            let role = if super_admin { AdminRole::SuperAdmin } else { AdminRole::None };
            let inserted = sqlx::query(
                "INSERT INTO users (id,subject,display_name,role,created_at,updated_at) VALUES (?,?,?,?,?,?)",
            )
            .bind(id)
            .bind(subject)
            .bind(&display_name)
            .bind(role)
            .bind(now)
            .bind(now)
            .execute(db_pool)
            .await;

            match inserted {
                Ok(_) => info!("created user {id} for {subject}"),
                // lost a race with another first login
                Err(e) if is_unique_violation(&e) => {}
                Err(e) => return Err(e.into()),
            }
            get_by_subject(db_pool, subject).await?.ok_or(AppError::NotFound("User"))?
        }
    };

    if user.username.is_none() {
        if let Some(wanted) = &profile.username {
            try_claim_username(db_pool, user.id, wanted).await?;
        }
    }

    require(db_pool, user.id).await
}

async fn try_claim_username(db_pool: &SqlitePool, user_id: Uuid, wanted: &str) -> AppResult<()> {
    let Ok(username) = validate_username(wanted) else {
        return Ok(());
    };
    let claimed = sqlx::query("UPDATE users SET username=?,updated_at=? WHERE id=? AND username IS NULL")
        .bind(&username)
        .bind(now_ms())
        .bind(user_id)
        .execute(db_pool)
        .await;
    match claimed {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => {
            warn!("provider username {username} already taken, leaving {user_id} without one");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub fn validate_username(raw: &str) -> AppResult<String> {
    let username = raw.trim().to_lowercase();
    if !(3..=20).contains(&username.chars().count()) {
        return Err(AppError::invalid("Username must be 3-20 characters"));
    }
    if !username.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return Err(AppError::invalid("Username may only contain letters, digits and underscores"));
    }
    Ok(username)
}

pub async fn set_username(db_pool: &SqlitePool, user_id: Uuid, raw: &str) -> AppResult<User> {
    let username = validate_username(raw)?;
    let result = sqlx::query("UPDATE users SET username=?,updated_at=? WHERE id=?")
        .bind(&username)
        .bind(now_ms())
        .bind(user_id)
        .execute(db_pool)
        .await;

    match result {
        Ok(done) if done.rows_affected() == 0 => Err(AppError::NotFound("User")),
        Ok(_) => require(db_pool, user_id).await,
        Err(e) if is_unique_violation(&e) => Err(AppError::conflict("Username already taken")),
        Err(e) => Err(e.into()),
    }
}

fn patch_text(field: &mut Option<String>, value: Option<String>, name: &str) -> AppResult<()> {
    let Some(value) = value else {
        return Ok(());
    };
    let value = value.trim();
    if value.chars().count() > MAX_TEXT_FIELD {
        return Err(AppError::invalid(format!("{name} must be at most {MAX_TEXT_FIELD} characters")));
    }
    *field = (!value.is_empty()).then(|| value.to_owned());
    Ok(())
}

fn normalize_interests(interests: Vec<String>) -> AppResult<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    for interest in interests {
        let interest = interest.trim();
        if interest.is_empty() {
            continue;
        }
        if interest.chars().count() > MAX_INTEREST_LEN {
            return Err(AppError::invalid(format!("Interests must be at most {MAX_INTEREST_LEN} characters")));
        }
        if !out.iter().any(|seen| seen.eq_ignore_ascii_case(interest)) {
            out.push(interest.to_owned());
        }
    }
    if out.len() > MAX_INTERESTS {
        return Err(AppError::invalid(format!("At most {MAX_INTERESTS} interests")));
    }
    Ok(out)
}

pub async fn update_profile(db_pool: &SqlitePool, user_id: Uuid, update: ProfileUpdate) -> AppResult<User> {
    let mut user = require(db_pool, user_id).await?;

    patch_text(&mut user.display_name, update.display_name, "Display name")?;
    patch_text(&mut user.career, update.career, "Career")?;
    patch_text(&mut user.mood, update.mood, "Mood")?;
    patch_text(&mut user.life_phase, update.life_phase, "Life phase")?;
    if let Some(interests) = update.interests {
        user.interests = Json(normalize_interests(interests)?);
    }
    if let Some(preferences) = update.preferences {
        if !preferences.is_object() {
            return Err(AppError::invalid("Preferences must be an object"));
        }
        user.preferences = Json(preferences);
    }
    if let Some(opt_in) = update.resonance_opt_in {
        user.resonance_opt_in = opt_in;
    }

    sqlx::query(
        "UPDATE users SET display_name=?,career=?,mood=?,life_phase=?,interests=?,preferences=?,resonance_opt_in=?,updated_at=? WHERE id=?",
    )
    .bind(&user.display_name)
    .bind(&user.career)
    .bind(&user.mood)
    .bind(&user.life_phase)
    .bind(&user.interests)
    .bind(&user.preferences)
    .bind(user.resonance_opt_in)
    .bind(now_ms())
    .bind(user_id)
    .execute(db_pool)
    .await?;

    require(db_pool, user_id).await
}

/// Substring search over usernames and display names, never returning the viewer.
pub async fn search(db_pool: &SqlitePool, viewer_id: Uuid, query: &str, limit: Option<i64>) -> AppResult<Vec<UserSummary>> {
    let needle = query.trim().to_lowercase();
    if needle.chars().count() < 2 {
        return Err(AppError::invalid("Search query must be at least 2 characters"));
    }
    let limit = limit.unwrap_or(10).clamp(1, MAX_SEARCH_RESULTS);

    Ok(sqlx::query_as(
        "SELECT id,username,display_name FROM users
         WHERE id != ? AND (instr(lower(COALESCE(username,'')), ?) > 0 OR instr(lower(COALESCE(display_name,'')), ?) > 0)
         ORDER BY username IS NULL, username, display_name
         LIMIT ?",
    )
    .bind(viewer_id)
    .bind(&needle)
    .bind(&needle)
    .bind(limit)
    .fetch_all(db_pool)
    .await?)
}

/// Removes a user and everything that hangs off them.
pub async fn delete_user(db_pool: &SqlitePool, files: &FileStore, user_id: Uuid) -> AppResult<bool> {
    let storage_ids: Vec<(Uuid,)> = sqlx::query_as("SELECT id FROM stored_files WHERE owner_id=?")
        .bind(user_id)
        .fetch_all(db_pool)
        .await?;

    let mut tx = db_pool.begin().await?;
    // memberships in other people's chambers vanish with the user
    sqlx::query(
        "UPDATE echo_chambers SET member_count=member_count-1
         WHERE creator_id != ? AND id IN (SELECT chamber_id FROM echo_chamber_members WHERE user_id=?)",
    )
    .bind(user_id)
    .bind(user_id)
    .execute(&mut *tx)
    .await?;
    let deleted = sqlx::query("DELETE FROM users WHERE id=?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    tx.commit().await?;

    for (storage_id,) in storage_ids {
        files.remove_bytes(storage_id).await;
    }

    if deleted > 0 {
        info!("deleted user {user_id}");
    }
    Ok(deleted > 0)
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
