//! Friend requests, friendships and blocks between two users.

mod handlers;

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::{
    conversations::canonical_key,
    db::{new_id, now_ms},
    error::is_unique_violation,
    rate_limit,
    users::{self, UserSummary},
    AppError, AppResult,
};

pub(crate) use handlers::router;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum FriendshipStatus {
    Pending,
    Accepted,
    Blocked,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Friendship {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub recipient_id: Uuid,
    #[serde(skip_serializing)]
    pub pair_key: String,
    pub status: FriendshipStatus,
    #[serde(skip_serializing)]
    pub blocked_by: Option<Uuid>,
    /// Set when the second user of the pair also blocked the first.
    #[serde(skip_serializing)]
    pub blocked_by_other: Option<Uuid>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Friendship {
    fn involves(&self, user_id: Uuid) -> bool {
        self.requester_id == user_id || self.recipient_id == user_id
    }

    fn is_blocked_by(&self, user_id: Uuid) -> bool {
        self.status == FriendshipStatus::Blocked
            && (self.blocked_by == Some(user_id) || self.blocked_by_other == Some(user_id))
    }
}

/// How `user` relates to someone else, from `user`'s side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    None,
    Outgoing,
    Incoming,
    Friends,
    Blocked,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendEntry {
    pub friendship_id: Uuid,
    pub user: UserSummary,
    pub since: i64,
}

const FRIENDSHIP_COLUMNS: &str = "id,requester_id,recipient_id,pair_key,status,blocked_by,blocked_by_other,created_at,updated_at";

pub async fn get(db_pool: &SqlitePool, id: Uuid) -> AppResult<Option<Friendship>> {
    Ok(sqlx::query_as(&format!("SELECT {FRIENDSHIP_COLUMNS} FROM friendships WHERE id=?"))
        .bind(id)
        .fetch_optional(db_pool)
        .await?)
}

pub async fn get_between(db_pool: &SqlitePool, a: Uuid, b: Uuid) -> AppResult<Option<Friendship>> {
    Ok(sqlx::query_as(&format!("SELECT {FRIENDSHIP_COLUMNS} FROM friendships WHERE pair_key=?"))
        .bind(canonical_key(a, b))
        .fetch_optional(db_pool)
        .await?)
}

/// True when either side blocked the other.
pub async fn is_blocked(db_pool: &SqlitePool, a: Uuid, b: Uuid) -> AppResult<bool> {
    Ok(get_between(db_pool, a, b)
        .await?
        .is_some_and(|f| f.status == FriendshipStatus::Blocked))
}

pub async fn are_friends(db_pool: &SqlitePool, a: Uuid, b: Uuid) -> AppResult<bool> {
    Ok(get_between(db_pool, a, b)
        .await?
        .is_some_and(|f| f.status == FriendshipStatus::Accepted))
}

async fn set_status(db_pool: &SqlitePool, id: Uuid, status: FriendshipStatus, blocked_by: Option<Uuid>) -> AppResult<Friendship> {
    sqlx::query("UPDATE friendships SET status=?,blocked_by=?,blocked_by_other=NULL,updated_at=? WHERE id=?")
        .bind(status)
        .bind(blocked_by)
        .bind(now_ms())
        .bind(id)
        .execute(db_pool)
        .await?;
    get(db_pool, id).await?.ok_or(AppError::NotFound("Friendship"))
}

async fn insert(db_pool: &SqlitePool, requester_id: Uuid, recipient_id: Uuid, status: FriendshipStatus) -> AppResult<Friendship> {
    let now = now_ms();
    let friendship = Friendship {
        id: new_id(),
        requester_id,
        recipient_id,
        pair_key: canonical_key(requester_id, recipient_id),
        status,
        blocked_by: (status == FriendshipStatus::Blocked).then_some(requester_id),
        blocked_by_other: None,
        created_at: now,
        updated_at: now,
    };

    let inserted = sqlx::query(
        "INSERT INTO friendships (id,requester_id,recipient_id,pair_key,status,blocked_by,created_at,updated_at) VALUES (?,?,?,?,?,?,?,?)",
    )
    .bind(friendship.id)
    .bind(friendship.requester_id)
    .bind(friendship.recipient_id)
    .bind(&friendship.pair_key)
    .bind(friendship.status)
    .bind(friendship.blocked_by)
    .bind(friendship.created_at)
    .bind(friendship.updated_at)
    .execute(db_pool)
    .await;

    match inserted {
        Ok(_) => Ok(friendship),
        Err(e) if is_unique_violation(&e) => Err(AppError::conflict("A relationship with this user already exists")),
        Err(e) => Err(e.into()),
    }
}

async fn require_other(db_pool: &SqlitePool, user_id: Uuid, other_id: Uuid) -> AppResult<()> {
    if user_id == other_id {
        return Err(AppError::invalid("You cannot do that to yourself"));
    }
    users::require(db_pool, other_id).await?;
    Ok(())
}

/// Sends a request; if `other` already asked `user`, that request is accepted instead.
pub async fn send_request(db_pool: &SqlitePool, user_id: Uuid, other_id: Uuid) -> AppResult<Friendship> {
    require_other(db_pool, user_id, other_id).await?;

    if let Some(existing) = get_between(db_pool, user_id, other_id).await? {
        return match existing.status {
            FriendshipStatus::Blocked => Err(AppError::forbidden("Cannot send friend request to this user")),
            FriendshipStatus::Accepted => Err(AppError::conflict("Already friends")),
            FriendshipStatus::Pending if existing.requester_id == user_id => {
                Err(AppError::conflict("Friend request already sent"))
            }
            FriendshipStatus::Pending => {
                info!("crossed friend requests {} accepted", existing.id);
                set_status(db_pool, existing.id, FriendshipStatus::Accepted, None).await
            }
        };
    }

    rate_limit::check(db_pool, &format!("friend_request:{user_id}"), rate_limit::FRIEND_REQUESTS).await?;
    let friendship = insert(db_pool, user_id, other_id, FriendshipStatus::Pending).await?;
    info!("friend request {} sent", friendship.id);
    Ok(friendship)
}

async fn pending_for(db_pool: &SqlitePool, friendship_id: Uuid) -> AppResult<Friendship> {
    let friendship = get(db_pool, friendship_id).await?.ok_or(AppError::NotFound("Friend request"))?;
    if friendship.status != FriendshipStatus::Pending {
        return Err(AppError::conflict("Friend request is no longer pending"));
    }
    Ok(friendship)
}

async fn delete(db_pool: &SqlitePool, id: Uuid) -> AppResult<()> {
    sqlx::query("DELETE FROM friendships WHERE id=?")
        .bind(id)
        .execute(db_pool)
        .await?;
    Ok(())
}

pub async fn accept_request(db_pool: &SqlitePool, user_id: Uuid, friendship_id: Uuid) -> AppResult<Friendship> {
    let friendship = pending_for(db_pool, friendship_id).await?;
    if friendship.recipient_id != user_id {
        return Err(AppError::forbidden("Not authorized to accept this request"));
    }
    set_status(db_pool, friendship_id, FriendshipStatus::Accepted, None).await
}

pub async fn decline_request(db_pool: &SqlitePool, user_id: Uuid, friendship_id: Uuid) -> AppResult<()> {
    let friendship = pending_for(db_pool, friendship_id).await?;
    if friendship.recipient_id != user_id {
        return Err(AppError::forbidden("Not authorized to decline this request"));
    }
    delete(db_pool, friendship_id).await
}

pub async fn cancel_request(db_pool: &SqlitePool, user_id: Uuid, friendship_id: Uuid) -> AppResult<()> {
    let friendship = pending_for(db_pool, friendship_id).await?;
    if friendship.requester_id != user_id {
        return Err(AppError::forbidden("Not authorized to cancel this request"));
    }
    delete(db_pool, friendship_id).await
}

pub async fn remove_friend(db_pool: &SqlitePool, user_id: Uuid, other_id: Uuid) -> AppResult<()> {
    match get_between(db_pool, user_id, other_id).await? {
        Some(f) if f.status == FriendshipStatus::Accepted && f.involves(user_id) => delete(db_pool, f.id).await,
        _ => Err(AppError::NotFound("Friendship")),
    }
}

pub async fn block_user(db_pool: &SqlitePool, user_id: Uuid, other_id: Uuid) -> AppResult<Friendship> {
    require_other(db_pool, user_id, other_id).await?;
    let friendship = match get_between(db_pool, user_id, other_id).await? {
        Some(f) if f.is_blocked_by(user_id) => f,
        Some(f) if f.status == FriendshipStatus::Blocked => set_blocked_by_other(db_pool, f.id, user_id).await?,
        Some(f) => set_status(db_pool, f.id, FriendshipStatus::Blocked, Some(user_id)).await?,
        None => insert(db_pool, user_id, other_id, FriendshipStatus::Blocked).await?,
    };
    info!("{user_id} blocked {other_id}");
    Ok(friendship)
}

async fn set_blocked_by_other(db_pool: &SqlitePool, id: Uuid, blocker: Uuid) -> AppResult<Friendship> {
    sqlx::query("UPDATE friendships SET blocked_by_other=?,updated_at=? WHERE id=?")
        .bind(blocker)
        .bind(now_ms())
        .bind(id)
        .execute(db_pool)
        .await?;
    get(db_pool, id).await?.ok_or(AppError::NotFound("Friendship"))
}

/// Lifts only the caller's block; the pair stays blocked while the other side's block remains.
pub async fn unblock_user(db_pool: &SqlitePool, user_id: Uuid, other_id: Uuid) -> AppResult<()> {
    let Some(f) = get_between(db_pool, user_id, other_id).await? else {
        return Err(AppError::NotFound("Block"));
    };
    if f.status != FriendshipStatus::Blocked {
        return Err(AppError::NotFound("Block"));
    }
    if !f.is_blocked_by(user_id) {
        return Err(AppError::forbidden("Not authorized to unblock this user"));
    }

    let remaining = [f.blocked_by, f.blocked_by_other]
        .into_iter()
        .flatten()
        .find(|&blocker| blocker != user_id);
    match remaining {
        Some(blocker) => {
            set_status(db_pool, f.id, FriendshipStatus::Blocked, Some(blocker)).await?;
        }
        None => delete(db_pool, f.id).await?,
    }
    info!("{user_id} unblocked {other_id}");
    Ok(())
}

pub async fn relation(db_pool: &SqlitePool, user_id: Uuid, other_id: Uuid) -> AppResult<Relation> {
    let Some(f) = get_between(db_pool, user_id, other_id).await? else {
        return Ok(Relation::None);
    };
    Ok(match f.status {
        FriendshipStatus::Accepted => Relation::Friends,
        FriendshipStatus::Blocked if f.is_blocked_by(user_id) => Relation::Blocked,
        // being blocked is not disclosed
        FriendshipStatus::Blocked => Relation::None,
        FriendshipStatus::Pending if f.requester_id == user_id => Relation::Outgoing,
        FriendshipStatus::Pending => Relation::Incoming,
    })
}

type EntryRow = (Uuid, Uuid, Option<String>, Option<String>, i64);

fn entries(rows: Vec<EntryRow>) -> Vec<FriendEntry> {
    rows.into_iter()
        .map(|(friendship_id, id, username, display_name, since)| FriendEntry {
            friendship_id,
            user: UserSummary { id, username, display_name },
            since,
        })
        .collect()
}

pub async fn list_friends(db_pool: &SqlitePool, user_id: Uuid) -> AppResult<Vec<FriendEntry>> {
    let rows: Vec<EntryRow> = sqlx::query_as(
        "SELECT f.id, u.id, u.username, u.display_name, f.updated_at FROM friendships f
         JOIN users u ON u.id = CASE WHEN f.requester_id = ? THEN f.recipient_id ELSE f.requester_id END
         WHERE f.status='accepted' AND (f.requester_id=? OR f.recipient_id=?)
         ORDER BY u.username IS NULL, u.username",
    )
    .bind(user_id)
    .bind(user_id)
    .bind(user_id)
    .fetch_all(db_pool)
    .await?;
    Ok(entries(rows))
}

/// Pending requests addressed to `user_id`.
pub async fn list_incoming(db_pool: &SqlitePool, user_id: Uuid) -> AppResult<Vec<FriendEntry>> {
    let rows: Vec<EntryRow> = sqlx::query_as(
        "SELECT f.id, u.id, u.username, u.display_name, f.created_at FROM friendships f
         JOIN users u ON u.id = f.requester_id
         WHERE f.status='pending' AND f.recipient_id=?
         ORDER BY f.id DESC",
    )
    .bind(user_id)
    .fetch_all(db_pool)
    .await?;
    Ok(entries(rows))
}

/// Pending requests `user_id` sent.
pub async fn list_outgoing(db_pool: &SqlitePool, user_id: Uuid) -> AppResult<Vec<FriendEntry>> {
    let rows: Vec<EntryRow> = sqlx::query_as(
        "SELECT f.id, u.id, u.username, u.display_name, f.created_at FROM friendships f
         JOIN users u ON u.id = f.recipient_id
         WHERE f.status='pending' AND f.requester_id=?
         ORDER BY f.id DESC",
    )
    .bind(user_id)
    .fetch_all(db_pool)
    .await?;
    Ok(entries(rows))
}
