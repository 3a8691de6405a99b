//! Admin applications, role management and moderation.

mod handlers;

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::{
    chambers::{self, ChamberEvents},
    db::{new_id, now_ms},
    error::is_unique_violation,
    users::{self, AdminRole, User},
    whispers, AppError, AppResult,
};

pub(crate) use handlers::router;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum AdminRequestStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AdminRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub reason: String,
    pub status: AdminRequestStatus,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<i64>,
    pub created_at: i64,
}

const REQUEST_COLUMNS: &str = "id,user_id,reason,status,reviewed_by,reviewed_at,created_at";

pub async fn get_request(db_pool: &SqlitePool, id: Uuid) -> AppResult<Option<AdminRequest>> {
    Ok(sqlx::query_as(&format!("SELECT {REQUEST_COLUMNS} FROM admin_requests WHERE id=?"))
        .bind(id)
        .fetch_optional(db_pool)
        .await?)
}

pub async fn submit_request(db_pool: &SqlitePool, user: &User, reason: &str) -> AppResult<AdminRequest> {
    if user.is_admin() {
        return Err(AppError::conflict("You are already an admin"));
    }
    let reason = reason.trim();
    if !(10..=500).contains(&reason.chars().count()) {
        return Err(AppError::invalid("Reason must be 10-500 characters"));
    }

    let request = AdminRequest {
        id: new_id(),
        user_id: user.id,
        reason: reason.to_owned(),
        status: AdminRequestStatus::Pending,
        reviewed_by: None,
        reviewed_at: None,
        created_at: now_ms(),
    };
    let inserted = sqlx::query(&format!("INSERT INTO admin_requests ({REQUEST_COLUMNS}) VALUES (?,?,?,?,?,?,?)"))
        .bind(request.id)
        .bind(request.user_id)
        .bind(&request.reason)
        .bind(request.status)
        .bind(request.reviewed_by)
        .bind(request.reviewed_at)
        .bind(request.created_at)
        .execute(db_pool)
        .await;
    match inserted {
        Ok(_) => {
            info!("admin request {} submitted by {}", request.id, user.id);
            Ok(request)
        }
        Err(e) if is_unique_violation(&e) => Err(AppError::conflict("You already have a pending request")),
        Err(e) => Err(e.into()),
    }
}

pub async fn my_requests(db_pool: &SqlitePool, user_id: Uuid) -> AppResult<Vec<AdminRequest>> {
    Ok(sqlx::query_as(&format!("SELECT {REQUEST_COLUMNS} FROM admin_requests WHERE user_id=? ORDER BY id DESC"))
        .bind(user_id)
        .fetch_all(db_pool)
        .await?)
}

pub async fn list_pending(db_pool: &SqlitePool, actor: &User) -> AppResult<Vec<AdminRequest>> {
    actor.require_admin()?;
    Ok(sqlx::query_as(&format!("SELECT {REQUEST_COLUMNS} FROM admin_requests WHERE status=? ORDER BY id"))
        .bind(AdminRequestStatus::Pending)
        .fetch_all(db_pool)
        .await?)
}

async fn review(db_pool: &SqlitePool, actor: &User, request_id: Uuid, outcome: AdminRequestStatus) -> AppResult<AdminRequest> {
    actor.require_super_admin()?;
    let request = get_request(db_pool, request_id).await?.ok_or(AppError::NotFound("Admin request"))?;

    let mut tx = db_pool.begin().await?;
    let reviewed = sqlx::query("UPDATE admin_requests SET status=?,reviewed_by=?,reviewed_at=? WHERE id=? AND status=?")
        .bind(outcome)
        .bind(actor.id)
        .bind(now_ms())
        .bind(request_id)
        .bind(AdminRequestStatus::Pending)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if reviewed == 0 {
        return Err(AppError::conflict("Request has already been reviewed"));
    }
    if outcome == AdminRequestStatus::Approved {
        // never demote a super admin through an old application
        sqlx::query("UPDATE users SET role=?,updated_at=? WHERE id=? AND role=?")
            .bind(AdminRole::Admin)
            .bind(now_ms())
            .bind(request.user_id)
            .bind(AdminRole::None)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    info!("admin request {request_id} {outcome:?} by {}", actor.id);
    get_request(db_pool, request_id).await?.ok_or(AppError::NotFound("Admin request"))
}

pub async fn approve_request(db_pool: &SqlitePool, actor: &User, request_id: Uuid) -> AppResult<AdminRequest> {
    review(db_pool, actor, request_id, AdminRequestStatus::Approved).await
}

pub async fn reject_request(db_pool: &SqlitePool, actor: &User, request_id: Uuid) -> AppResult<AdminRequest> {
    review(db_pool, actor, request_id, AdminRequestStatus::Rejected).await
}

pub async fn set_role(db_pool: &SqlitePool, actor: &User, user_id: Uuid, role: AdminRole) -> AppResult<User> {
    actor.require_super_admin()?;
    if actor.id == user_id {
        return Err(AppError::forbidden("Not authorized to change your own role"));
    }
    let updated = sqlx::query("UPDATE users SET role=?,updated_at=? WHERE id=?")
        .bind(role)
        .bind(now_ms())
        .bind(user_id)
        .execute(db_pool)
        .await?
        .rows_affected();
    if updated == 0 {
        return Err(AppError::NotFound("User"));
    }

    info!("role of {user_id} set to {role:?} by {}", actor.id);
    users::require(db_pool, user_id).await
}

pub async fn delete_whisper_as_admin(db_pool: &SqlitePool, actor: &User, whisper_id: Uuid) -> AppResult<()> {
    actor.require_admin()?;
    whispers::remove(db_pool, whisper_id).await?;
    info!("whisper {whisper_id} removed by admin {}", actor.id);
    Ok(())
}

pub async fn delete_chamber_message_as_admin(
    db_pool: &SqlitePool,
    events: &ChamberEvents,
    actor: &User,
    message_id: Uuid,
) -> AppResult<()> {
    actor.require_admin()?;
    chambers::remove_message(db_pool, events, message_id).await?;
    info!("chamber message {message_id} removed by admin {}", actor.id);
    Ok(())
}
