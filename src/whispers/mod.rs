//! One-way anonymous whispers.

mod handlers;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::{
    db::{new_id, now_ms},
    files::{self, AttachmentKind},
    flags, friends,
    pagination::{Page, PageRequest},
    rate_limit,
    users::{self, User},
    AppError, AppResult,
};

pub(crate) use handlers::router;

pub const MAX_WHISPER_LEN: usize = 280;
const MIN_TTL_SECS: i64 = 60;
const MAX_TTL_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Whisper {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub content: String,
    pub is_read: bool,
    pub read_at: Option<i64>,
    pub image_storage_id: Option<Uuid>,
    pub audio_storage_id: Option<Uuid>,
    pub conversation_id: Option<Uuid>,
    pub expires_at: Option<i64>,
    pub created_at: i64,
}

/// A whisper as its recipient sees it: no sender.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedWhisper {
    pub id: Uuid,
    pub content: String,
    pub is_read: bool,
    pub read_at: Option<i64>,
    pub image_storage_id: Option<Uuid>,
    pub audio_storage_id: Option<Uuid>,
    pub conversation_id: Option<Uuid>,
    pub expires_at: Option<i64>,
    pub created_at: i64,
}

impl From<Whisper> for ReceivedWhisper {
    fn from(w: Whisper) -> Self {
        ReceivedWhisper {
            id: w.id,
            content: w.content,
            is_read: w.is_read,
            read_at: w.read_at,
            image_storage_id: w.image_storage_id,
            audio_storage_id: w.audio_storage_id,
            conversation_id: w.conversation_id,
            expires_at: w.expires_at,
            created_at: w.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWhisper {
    pub recipient_id: Uuid,
    pub content: String,
    pub image_storage_id: Option<Uuid>,
    pub audio_storage_id: Option<Uuid>,
    pub expires_in_seconds: Option<i64>,
}

impl NewWhisper {
    pub fn text(recipient_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            recipient_id,
            content: content.into(),
            image_storage_id: None,
            audio_storage_id: None,
            expires_in_seconds: None,
        }
    }
}

const WHISPER_COLUMNS: &str = "id,sender_id,recipient_id,content,is_read,read_at,image_storage_id,audio_storage_id,conversation_id,expires_at,created_at";

/// Trims and bounds message text.
pub(crate) fn validate_content(content: &str, max: usize) -> AppResult<String> {
    let content = content.trim();
    if content.is_empty() {
        return Err(AppError::invalid("Message cannot be empty"));
    }
    if content.chars().count() > max {
        return Err(AppError::invalid(format!("Message must be at most {max} characters")));
    }
    Ok(content.to_owned())
}

pub async fn send_whisper(db_pool: &SqlitePool, sender: &User, new: NewWhisper) -> AppResult<Whisper> {
    let content = validate_content(&new.content, MAX_WHISPER_LEN)?;
    if new.recipient_id == sender.id {
        return Err(AppError::invalid("You cannot whisper to yourself"));
    }
    users::get_by_id(db_pool, new.recipient_id)
        .await?
        .ok_or(AppError::NotFound("Recipient"))?;
    if friends::is_blocked(db_pool, sender.id, new.recipient_id).await? {
        return Err(AppError::forbidden("Cannot send whisper to this user"));
    }

    if let Some(image) = new.image_storage_id {
        files::require_attachment(db_pool, sender.id, image, AttachmentKind::Image).await?;
    }
    if let Some(audio) = new.audio_storage_id {
        flags::require_enabled(db_pool, flags::VOICE_MESSAGES).await?;
        files::require_attachment(db_pool, sender.id, audio, AttachmentKind::Audio).await?;
    }

    let now = now_ms();
    let expires_at = match new.expires_in_seconds {
        None => None,
        Some(secs) if (MIN_TTL_SECS..=MAX_TTL_SECS).contains(&secs) => Some(now + secs * 1000),
        Some(_) => return Err(AppError::invalid("Expiry must be between one minute and seven days")),
    };

    rate_limit::check(db_pool, &format!("whisper:{}", sender.id), rate_limit::WHISPERS).await?;

    let whisper = Whisper {
        id: new_id(),
        sender_id: sender.id,
        recipient_id: new.recipient_id,
        content,
        is_read: false,
        read_at: None,
        image_storage_id: new.image_storage_id,
        audio_storage_id: new.audio_storage_id,
        conversation_id: None,
        expires_at,
        created_at: now,
    };

    sqlx::query(
        "INSERT INTO whispers (id,sender_id,recipient_id,content,image_storage_id,audio_storage_id,expires_at,created_at)
         VALUES (?,?,?,?,?,?,?,?)",
    )
    .bind(whisper.id)
    .bind(whisper.sender_id)
    .bind(whisper.recipient_id)
    .bind(&whisper.content)
    .bind(whisper.image_storage_id)
    .bind(whisper.audio_storage_id)
    .bind(whisper.expires_at)
    .bind(whisper.created_at)
    .execute(db_pool)
    .await?;

    info!("whisper {} sent", whisper.id);
    Ok(whisper)
}

pub async fn get(db_pool: &SqlitePool, id: Uuid) -> AppResult<Option<Whisper>> {
    Ok(sqlx::query_as(&format!("SELECT {WHISPER_COLUMNS} FROM whispers WHERE id=?"))
        .bind(id)
        .fetch_optional(db_pool)
        .await?)
}

/// A whisper that has not expired by `now`; expired ones read as missing until the sweep removes them.
pub async fn get_live(db_pool: &SqlitePool, id: Uuid, now: i64) -> AppResult<Whisper> {
    get(db_pool, id)
        .await?
        .filter(|w| w.expires_at.is_none_or(|at| at > now))
        .ok_or(AppError::NotFound("Whisper"))
}

async fn list_by(db_pool: &SqlitePool, column: &str, user_id: Uuid, page: &PageRequest) -> AppResult<Page<Whisper>> {
    let rows: Vec<Whisper> = sqlx::query_as(&format!(
        "SELECT {WHISPER_COLUMNS} FROM whispers
         WHERE {column}=? AND (expires_at IS NULL OR expires_at > ?) AND (? IS NULL OR id < ?)
         ORDER BY id DESC LIMIT ?"
    ))
    .bind(user_id)
    .bind(now_ms())
    .bind(page.cursor)
    .bind(page.cursor)
    .bind(page.fetch_limit())
    .fetch_all(db_pool)
    .await?;

    Ok(Page::from_rows(rows, page, |w| w.id))
}

pub async fn list_received(db_pool: &SqlitePool, user_id: Uuid, page: &PageRequest) -> AppResult<Page<ReceivedWhisper>> {
    Ok(list_by(db_pool, "recipient_id", user_id, page).await?.map(ReceivedWhisper::from))
}

pub async fn list_sent(db_pool: &SqlitePool, user_id: Uuid, page: &PageRequest) -> AppResult<Page<Whisper>> {
    list_by(db_pool, "sender_id", user_id, page).await
}

/// Marks a received whisper read. Reading twice keeps the first `read_at`.
pub async fn mark_as_read(db_pool: &SqlitePool, user_id: Uuid, whisper_id: Uuid) -> AppResult<ReceivedWhisper> {
    let whisper = get_live(db_pool, whisper_id, now_ms()).await?;
    if whisper.recipient_id != user_id {
        return Err(AppError::forbidden("Not authorized to mark this whisper as read"));
    }

    sqlx::query("UPDATE whispers SET is_read=1, read_at=COALESCE(read_at, ?) WHERE id=?")
        .bind(now_ms())
        .bind(whisper_id)
        .execute(db_pool)
        .await?;

    let whisper = get(db_pool, whisper_id).await?.ok_or(AppError::NotFound("Whisper"))?;
    Ok(whisper.into())
}

pub async fn mark_all_read(db_pool: &SqlitePool, user_id: Uuid) -> AppResult<u64> {
    Ok(sqlx::query("UPDATE whispers SET is_read=1, read_at=? WHERE recipient_id=? AND is_read=0")
        .bind(now_ms())
        .bind(user_id)
        .execute(db_pool)
        .await?
        .rows_affected())
}

pub async fn unread_count(db_pool: &SqlitePool, user_id: Uuid) -> AppResult<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM whispers WHERE recipient_id=? AND is_read=0 AND (expires_at IS NULL OR expires_at > ?)",
    )
    .bind(user_id)
    .bind(now_ms())
    .fetch_one(db_pool)
    .await?;
    Ok(count)
}

pub async fn delete_whisper(db_pool: &SqlitePool, user_id: Uuid, whisper_id: Uuid) -> AppResult<()> {
    let whisper = get(db_pool, whisper_id).await?.ok_or(AppError::NotFound("Whisper"))?;
    if whisper.sender_id != user_id && whisper.recipient_id != user_id {
        return Err(AppError::forbidden("Not authorized to delete this whisper"));
    }
    remove(db_pool, whisper_id).await
}

pub(crate) async fn remove(db_pool: &SqlitePool, whisper_id: Uuid) -> AppResult<()> {
    let deleted = sqlx::query("DELETE FROM whispers WHERE id=?")
        .bind(whisper_id)
        .execute(db_pool)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(AppError::NotFound("Whisper"));
    }
    info!("whisper {whisper_id} deleted");
    Ok(())
}

/// Sweeps expired whispers that never grew into a conversation.
pub async fn process_whispers(db_pool: &SqlitePool, now: i64) -> AppResult<u64> {
    Ok(sqlx::query("DELETE FROM whispers WHERE expires_at IS NOT NULL AND expires_at <= ? AND conversation_id IS NULL")
        .bind(now)
        .execute(db_pool)
        .await?
        .rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_is_trimmed_and_bounded() {
        assert_eq!(validate_content("  hi  ", 10).unwrap(), "hi");
        assert!(validate_content("   ", 10).is_err());
        assert!(validate_content(&"é".repeat(11), 10).is_err());
        assert!(validate_content(&"é".repeat(10), 10).is_ok());
    }
}
