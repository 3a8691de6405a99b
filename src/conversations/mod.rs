//! Two-way conversations that grow out of echoed whispers.
//!
//! A conversation starts `initiated` when a whisper's recipient echoes it,
//! turns `active` once the whisper's sender accepts, and ends `closed` when
//! either side leaves. Each pair of users shares at most one conversation,
//! keyed by their sorted ids. Participants stay anonymous to each other
//! until both consent to unmasking.

mod handlers;

use serde::Serialize;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::info;
use uuid::Uuid;

use crate::{
    db::{new_id, now_ms},
    error::is_unique_violation,
    files::{self, AttachmentKind},
    flags, friends,
    pagination::{Page, PageRequest},
    users::{self, User, UserSummary},
    whispers::{self, validate_content},
    AppError, AppResult,
};

pub(crate) use handlers::router;

pub const MAX_MESSAGE_LEN: usize = 1000;

/// Order-independent key for a pair of users.
pub fn canonical_key(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}:{hi}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ConversationStatus {
    Initiated,
    Active,
    Closed,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Conversation {
    pub id: Uuid,
    pub participant_a: Uuid,
    pub participant_b: Uuid,
    pub participant_key: String,
    pub initiator_id: Uuid,
    pub status: ConversationStatus,
    pub initial_whisper_id: Uuid,
    pub unmask_a: bool,
    pub unmask_b: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Conversation {
    fn is_participant(&self, user_id: Uuid) -> bool {
        self.participant_a == user_id || self.participant_b == user_id
    }

    fn other(&self, user_id: Uuid) -> Uuid {
        if self.participant_a == user_id { self.participant_b } else { self.participant_a }
    }

    /// (mine, theirs)
    fn unmask_flags(&self, user_id: Uuid) -> (bool, bool) {
        if self.participant_a == user_id {
            (self.unmask_a, self.unmask_b)
        } else {
            (self.unmask_b, self.unmask_a)
        }
    }

    pub fn is_unmasked(&self) -> bool {
        self.unmask_a && self.unmask_b
    }
}

/// A conversation as one participant sees it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub id: Uuid,
    pub status: ConversationStatus,
    pub initial_whisper_id: Uuid,
    pub is_initiator: bool,
    pub i_unmasked: bool,
    pub they_unmasked: bool,
    /// Filled in only after both sides unmasked.
    pub other: Option<UserSummary>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub image_storage_id: Option<Uuid>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub is_mine: bool,
    pub content: String,
    pub image_storage_id: Option<Uuid>,
    pub created_at: i64,
}

impl Message {
    fn view(self, viewer: Uuid) -> MessageView {
        MessageView {
            id: self.id,
            conversation_id: self.conversation_id,
            is_mine: self.sender_id == viewer,
            content: self.content,
            image_storage_id: self.image_storage_id,
            created_at: self.created_at,
        }
    }
}

const CONVERSATION_COLUMNS: &str = "id,participant_a,participant_b,participant_key,initiator_id,status,initial_whisper_id,unmask_a,unmask_b,created_at,updated_at";

pub async fn get(db_pool: &SqlitePool, id: Uuid) -> AppResult<Option<Conversation>> {
    Ok(sqlx::query_as(&format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id=?"))
        .bind(id)
        .fetch_optional(db_pool)
        .await?)
}

pub async fn get_between(db_pool: &SqlitePool, a: Uuid, b: Uuid) -> AppResult<Option<Conversation>> {
    Ok(sqlx::query_as(&format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE participant_key=?"))
        .bind(canonical_key(a, b))
        .fetch_optional(db_pool)
        .await?)
}

async fn require_participant(db_pool: &SqlitePool, user_id: Uuid, id: Uuid) -> AppResult<Conversation> {
    let conversation = get(db_pool, id).await?.ok_or(AppError::NotFound("Conversation"))?;
    if !conversation.is_participant(user_id) {
        return Err(AppError::forbidden("Not authorized to access this conversation"));
    }
    Ok(conversation)
}

async fn view(db_pool: &SqlitePool, conversation: Conversation, viewer: Uuid) -> AppResult<ConversationView> {
    let (mine, theirs) = conversation.unmask_flags(viewer);
    let other = if conversation.is_unmasked() {
        users::get_by_id(db_pool, conversation.other(viewer))
            .await?
            .map(|u| u.summary())
    } else {
        None
    };

    Ok(ConversationView {
        id: conversation.id,
        status: conversation.status,
        initial_whisper_id: conversation.initial_whisper_id,
        is_initiator: conversation.initiator_id == viewer,
        i_unmasked: mine,
        they_unmasked: theirs,
        other,
        created_at: conversation.created_at,
        updated_at: conversation.updated_at,
    })
}

async fn insert_message(
    tx: &mut Transaction<'_, Sqlite>,
    conversation_id: Uuid,
    sender_id: Uuid,
    content: &str,
    image_storage_id: Option<Uuid>,
    now: i64,
) -> AppResult<Message> {
    let message = Message {
        id: new_id(),
        conversation_id,
        sender_id,
        content: content.to_owned(),
        image_storage_id,
        created_at: now,
    };
    sqlx::query("INSERT INTO messages (id,conversation_id,sender_id,content,image_storage_id,created_at) VALUES (?,?,?,?,?,?)")
        .bind(message.id)
        .bind(message.conversation_id)
        .bind(message.sender_id)
        .bind(&message.content)
        .bind(message.image_storage_id)
        .bind(message.created_at)
        .execute(&mut **tx)
        .await?;
    sqlx::query("UPDATE conversations SET updated_at=? WHERE id=?")
        .bind(now)
        .bind(conversation_id)
        .execute(&mut **tx)
        .await?;
    Ok(message)
}

/// The recipient replies to a whisper, opening (or reopening) the pair's conversation.
pub async fn echo_whisper(db_pool: &SqlitePool, user: &User, whisper_id: Uuid, content: &str) -> AppResult<ConversationView> {
    let now = now_ms();
    let whisper = whispers::get_live(db_pool, whisper_id, now).await?;
    if whisper.recipient_id != user.id {
        return Err(AppError::forbidden("Not authorized to echo this whisper"));
    }
    if whisper.conversation_id.is_some() {
        return Err(AppError::conflict("This whisper has already been echoed"));
    }
    let content = validate_content(content, MAX_MESSAGE_LEN)?;
    if friends::is_blocked(db_pool, whisper.sender_id, user.id).await? {
        return Err(AppError::forbidden("Cannot echo this whisper"));
    }

    let key = canonical_key(whisper.sender_id, user.id);
    let mut tx = db_pool.begin().await?;

    let existing: Option<Conversation> =
        sqlx::query_as(&format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE participant_key=?"))
            .bind(&key)
            .fetch_optional(&mut *tx)
            .await?;

    let conversation_id = match existing {
        Some(conversation) if conversation.status == ConversationStatus::Closed => {
            sqlx::query(
                "UPDATE conversations SET status=?,initiator_id=?,initial_whisper_id=?,unmask_a=0,unmask_b=0,updated_at=? WHERE id=?",
            )
            .bind(ConversationStatus::Initiated)
            .bind(whisper.sender_id)
            .bind(whisper.id)
            .bind(now)
            .bind(conversation.id)
            .execute(&mut *tx)
            .await?;
            info!("conversation {} reopened by echo", conversation.id);
            conversation.id
        }
        Some(conversation) => conversation.id,
        None => {
            let id = new_id();
            let (a, b) = if whisper.sender_id <= user.id { (whisper.sender_id, user.id) } else { (user.id, whisper.sender_id) };
            let inserted = sqlx::query(
                "INSERT INTO conversations (id,participant_a,participant_b,participant_key,initiator_id,status,initial_whisper_id,created_at,updated_at)
                 VALUES (?,?,?,?,?,?,?,?,?)",
            )
            .bind(id)
            .bind(a)
            .bind(b)
            .bind(&key)
            .bind(whisper.sender_id)
            .bind(ConversationStatus::Initiated)
            .bind(whisper.id)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await;
            match inserted {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    return Err(AppError::conflict("Conversation was created concurrently, try again"));
                }
                Err(e) => return Err(e.into()),
            }
            info!("conversation {id} initiated from whisper {}", whisper.id);
            id
        }
    };

    let linked = sqlx::query(
        "UPDATE whispers SET conversation_id=?, is_read=1, read_at=COALESCE(read_at, ?)
         WHERE id=? AND conversation_id IS NULL AND (expires_at IS NULL OR expires_at > ?)",
    )
    .bind(conversation_id)
    .bind(now)
    .bind(whisper.id)
    .bind(now)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    if linked == 0 {
        return Err(AppError::conflict("This whisper has already been echoed"));
    }

    insert_message(&mut tx, conversation_id, user.id, &content, None, now).await?;
    tx.commit().await?;

    let conversation = get(db_pool, conversation_id).await?.ok_or(AppError::NotFound("Conversation"))?;
    view(db_pool, conversation, user.id).await
}

async fn set_status(db_pool: &SqlitePool, id: Uuid, status: ConversationStatus) -> AppResult<()> {
    sqlx::query("UPDATE conversations SET status=?,updated_at=? WHERE id=?")
        .bind(status)
        .bind(now_ms())
        .bind(id)
        .execute(db_pool)
        .await?;
    Ok(())
}

/// The whisper's original sender accepts the echo.
pub async fn accept_conversation(db_pool: &SqlitePool, user_id: Uuid, id: Uuid) -> AppResult<ConversationView> {
    let conversation = require_participant(db_pool, user_id, id).await?;
    if conversation.status != ConversationStatus::Initiated {
        return Err(AppError::conflict("Conversation is not awaiting acceptance"));
    }
    if conversation.initiator_id != user_id {
        return Err(AppError::forbidden("Not authorized: only the whisper's sender can accept"));
    }
    set_status(db_pool, id, ConversationStatus::Active).await?;
    info!("conversation {id} active");
    get_conversation(db_pool, user_id, id).await
}

pub async fn close_conversation(db_pool: &SqlitePool, user_id: Uuid, id: Uuid) -> AppResult<ConversationView> {
    let conversation = require_participant(db_pool, user_id, id).await?;
    if conversation.status == ConversationStatus::Closed {
        return Err(AppError::conflict("Conversation is already closed"));
    }
    set_status(db_pool, id, ConversationStatus::Closed).await?;
    info!("conversation {id} closed");
    get_conversation(db_pool, user_id, id).await
}

pub async fn get_conversation(db_pool: &SqlitePool, user_id: Uuid, id: Uuid) -> AppResult<ConversationView> {
    let conversation = require_participant(db_pool, user_id, id).await?;
    view(db_pool, conversation, user_id).await
}

/// The viewer's conversations, most recently active first.
pub async fn list_conversations(db_pool: &SqlitePool, user_id: Uuid) -> AppResult<Vec<ConversationView>> {
    let rows: Vec<Conversation> = sqlx::query_as(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE participant_a=? OR participant_b=? ORDER BY updated_at DESC, id DESC"
    ))
    .bind(user_id)
    .bind(user_id)
    .fetch_all(db_pool)
    .await?;

    let mut views = Vec::with_capacity(rows.len());
    for conversation in rows {
        views.push(view(db_pool, conversation, user_id).await?);
    }
    Ok(views)
}

pub async fn send_message(
    db_pool: &SqlitePool,
    user_id: Uuid,
    id: Uuid,
    content: &str,
    image_storage_id: Option<Uuid>,
) -> AppResult<MessageView> {
    let conversation = require_participant(db_pool, user_id, id).await?;
    if conversation.status != ConversationStatus::Active {
        return Err(AppError::conflict("Conversation is not active"));
    }
    let content = validate_content(content, MAX_MESSAGE_LEN)?;
    if let Some(image) = image_storage_id {
        files::require_attachment(db_pool, user_id, image, AttachmentKind::Image).await?;
    }

    let mut tx = db_pool.begin().await?;
    let message = insert_message(&mut tx, id, user_id, &content, image_storage_id, now_ms()).await?;
    tx.commit().await?;
    Ok(message.view(user_id))
}

pub async fn list_messages(db_pool: &SqlitePool, user_id: Uuid, id: Uuid, page: &PageRequest) -> AppResult<Page<MessageView>> {
    require_participant(db_pool, user_id, id).await?;
    let rows: Vec<Message> = sqlx::query_as(
        "SELECT id,conversation_id,sender_id,content,image_storage_id,created_at FROM messages
         WHERE conversation_id=? AND (? IS NULL OR id < ?)
         ORDER BY id DESC LIMIT ?",
    )
    .bind(id)
    .bind(page.cursor)
    .bind(page.cursor)
    .bind(page.fetch_limit())
    .fetch_all(db_pool)
    .await?;

    Ok(Page::from_rows(rows, page, |m| m.id).map(|m| m.view(user_id)))
}

async fn set_unmask(db_pool: &SqlitePool, conversation: &Conversation, user_id: Uuid, consent: bool) -> AppResult<()> {
    let column = if conversation.participant_a == user_id { "unmask_a" } else { "unmask_b" };
    sqlx::query(&format!("UPDATE conversations SET {column}=?,updated_at=? WHERE id=?"))
        .bind(consent)
        .bind(now_ms())
        .bind(conversation.id)
        .execute(db_pool)
        .await?;
    Ok(())
}

/// Records the caller's consent to reveal identities.
pub async fn request_unmask(db_pool: &SqlitePool, user_id: Uuid, id: Uuid) -> AppResult<ConversationView> {
    flags::require_enabled(db_pool, flags::UNMASKING).await?;
    let conversation = require_participant(db_pool, user_id, id).await?;
    if conversation.status == ConversationStatus::Closed {
        return Err(AppError::conflict("Conversation is closed"));
    }
    set_unmask(db_pool, &conversation, user_id, true).await?;

    let view = get_conversation(db_pool, user_id, id).await?;
    if view.other.is_some() {
        info!("conversation {id} unmasked");
    }
    Ok(view)
}

/// Takes consent back, possible only until both sides agreed.
pub async fn withdraw_unmask(db_pool: &SqlitePool, user_id: Uuid, id: Uuid) -> AppResult<ConversationView> {
    let conversation = require_participant(db_pool, user_id, id).await?;
    if conversation.is_unmasked() {
        return Err(AppError::conflict("Identities have already been revealed"));
    }
    set_unmask(db_pool, &conversation, user_id, false).await?;
    get_conversation(db_pool, user_id, id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_key_is_symmetric() {
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        assert_eq!(canonical_key(a, b), canonical_key(b, a));
        assert!(canonical_key(a, b).starts_with(&a.to_string()));
        assert_ne!(canonical_key(a, a), canonical_key(a, b));
    }
}
