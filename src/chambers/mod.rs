//! Echo chambers: anonymous group chats joined by invite code.

pub mod alias;
mod events;
mod handlers;
pub mod invite;
mod ws;

use serde::{Deserialize, Serialize};
use sqlx::{types::Json, SqlitePool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    db::{new_id, now_ms},
    error::is_unique_violation,
    files::{self, AttachmentKind},
    flags,
    pagination::{Page, PageRequest},
    rate_limit,
    users::User,
    whispers::validate_content,
    AppError, AppResult,
};

pub use events::{ChamberEvent, ChamberEvents, OutboundEvent};
pub use ws::ChamberFeed;
pub(crate) use handlers::router;

pub const MAX_CHAMBER_MESSAGE_LEN: usize = 1000;
pub const DEFAULT_MAX_MEMBERS: i64 = 50;
const MEMBER_CAP_RANGE: std::ops::RangeInclusive<i64> = 2..=100;
/// Typing indicators older than this are not shown.
pub const TYPING_TTL_MS: i64 = 5_000;
const MAX_EMOJI_LEN: usize = 32;
const REACTION_RETRIES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum MemberRole {
    Creator,
    Member,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EchoChamber {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub name: String,
    pub topic: Option<String>,
    pub description: Option<String>,
    pub invite_code: String,
    pub is_public: bool,
    pub max_members: i64,
    pub member_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ChamberRow {
    #[sqlx(flatten)]
    chamber: EchoChamber,
    my_alias: Option<String>,
    my_color: Option<String>,
}

/// A chamber as one user sees it. Only members learn the invite code.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChamberView {
    pub id: Uuid,
    pub name: String,
    pub topic: Option<String>,
    pub description: Option<String>,
    pub is_public: bool,
    pub max_members: i64,
    pub member_count: i64,
    pub invite_code: Option<String>,
    pub is_member: bool,
    pub is_creator: bool,
    pub my_alias: Option<String>,
    pub my_color: Option<String>,
    pub created_at: i64,
}

impl ChamberRow {
    fn view(self, viewer: Uuid) -> ChamberView {
        let c = self.chamber;
        let is_member = self.my_alias.is_some();
        ChamberView {
            id: c.id,
            name: c.name,
            topic: c.topic,
            description: c.description,
            is_public: c.is_public,
            max_members: c.max_members,
            member_count: c.member_count,
            invite_code: is_member.then_some(c.invite_code),
            is_member,
            is_creator: c.creator_id == viewer,
            my_alias: self.my_alias,
            my_color: self.my_color,
            created_at: c.created_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Member {
    pub chamber_id: Uuid,
    pub user_id: Uuid,
    pub alias: String,
    pub color: String,
    pub role: MemberRole,
    pub joined_at: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    pub alias: String,
    pub color: String,
    pub role: MemberRole,
    pub is_me: bool,
    pub joined_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub emoji: String,
    pub user_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChamberMessage {
    pub id: Uuid,
    pub chamber_id: Uuid,
    pub sender_id: Uuid,
    pub alias: String,
    pub color: String,
    pub content: String,
    pub reactions: Json<Vec<Reaction>>,
    pub audio_storage_id: Option<Uuid>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionView {
    pub emoji: String,
    pub count: usize,
    pub reacted_by_me: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChamberMessageView {
    pub id: Uuid,
    pub chamber_id: Uuid,
    pub alias: String,
    pub color: String,
    pub content: String,
    pub reactions: Vec<ReactionView>,
    pub audio_storage_id: Option<Uuid>,
    pub is_mine: bool,
    pub created_at: i64,
}

impl ChamberMessage {
    pub fn view(&self, viewer: Uuid) -> ChamberMessageView {
        ChamberMessageView {
            id: self.id,
            chamber_id: self.chamber_id,
            alias: self.alias.clone(),
            color: self.color.clone(),
            content: self.content.clone(),
            reactions: self
                .reactions
                .iter()
                .map(|r| ReactionView {
                    emoji: r.emoji.clone(),
                    count: r.user_ids.len(),
                    reacted_by_me: r.user_ids.contains(&viewer),
                })
                .collect(),
            audio_storage_id: self.audio_storage_id,
            is_mine: self.sender_id == viewer,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TypingView {
    pub alias: String,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChamber {
    pub name: String,
    pub topic: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    pub max_members: Option<i64>,
}

impl NewChamber {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topic: None,
            description: None,
            is_public: false,
            max_members: None,
        }
    }
}

const CHAMBER_COLUMNS: &str = "c.id,c.creator_id,c.name,c.topic,c.description,c.invite_code,c.is_public,c.max_members,c.member_count,c.created_at,c.updated_at";
const MESSAGE_COLUMNS: &str = "id,chamber_id,sender_id,alias,color,content,reactions,audio_storage_id,created_at";

fn optional_text(value: Option<String>, max: usize, name: &str) -> AppResult<Option<String>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let value = value.trim();
    if value.chars().count() > max {
        return Err(AppError::invalid(format!("{name} must be at most {max} characters")));
    }
    Ok((!value.is_empty()).then(|| value.to_owned()))
}

pub async fn get(db_pool: &SqlitePool, id: Uuid) -> AppResult<Option<EchoChamber>> {
    Ok(sqlx::query_as(&format!("SELECT {CHAMBER_COLUMNS} FROM echo_chambers c WHERE c.id=?"))
        .bind(id)
        .fetch_optional(db_pool)
        .await?)
}

pub async fn membership(db_pool: &SqlitePool, chamber_id: Uuid, user_id: Uuid) -> AppResult<Option<Member>> {
    Ok(sqlx::query_as("SELECT chamber_id,user_id,alias,color,role,joined_at FROM echo_chamber_members WHERE chamber_id=? AND user_id=?")
        .bind(chamber_id)
        .bind(user_id)
        .fetch_optional(db_pool)
        .await?)
}

async fn require_member(db_pool: &SqlitePool, chamber_id: Uuid, user_id: Uuid) -> AppResult<Member> {
    get(db_pool, chamber_id).await?.ok_or(AppError::NotFound("Echo chamber"))?;
    membership(db_pool, chamber_id, user_id)
        .await?
        .ok_or(AppError::forbidden("Not a member of this echo chamber"))
}

async fn view_for(db_pool: &SqlitePool, viewer: Uuid, chamber_id: Uuid) -> AppResult<Option<ChamberView>> {
    let row: Option<ChamberRow> = sqlx::query_as(&format!(
        "SELECT {CHAMBER_COLUMNS}, m.alias AS my_alias, m.color AS my_color FROM echo_chambers c
         LEFT JOIN echo_chamber_members m ON m.chamber_id=c.id AND m.user_id=?
         WHERE c.id=?"
    ))
    .bind(viewer)
    .bind(chamber_id)
    .fetch_optional(db_pool)
    .await?;
    Ok(row.map(|row| row.view(viewer)))
}

pub async fn create_chamber(db_pool: &SqlitePool, creator: &User, new: NewChamber) -> AppResult<ChamberView> {
    create_chamber_with_codes(db_pool, creator, new, invite::generate_code).await
}

/// Inserts the chamber, drawing invite codes from `next_code` until one is unused.
async fn create_chamber_with_codes(
    db_pool: &SqlitePool,
    creator: &User,
    new: NewChamber,
    mut next_code: impl FnMut() -> String,
) -> AppResult<ChamberView> {
    flags::require_enabled(db_pool, flags::ECHO_CHAMBERS).await?;

    let name = new.name.trim().to_owned();
    if !(3..=50).contains(&name.chars().count()) {
        return Err(AppError::invalid("Chamber name must be 3-50 characters"));
    }
    let topic = optional_text(new.topic, 50, "Topic")?;
    let description = optional_text(new.description, 200, "Description")?;
    let max_members = new.max_members.unwrap_or(DEFAULT_MAX_MEMBERS);
    if !MEMBER_CAP_RANGE.contains(&max_members) {
        return Err(AppError::invalid(format!(
            "Member limit must be between {} and {}",
            MEMBER_CAP_RANGE.start(),
            MEMBER_CAP_RANGE.end()
        )));
    }

    let id = new_id();
    let now = now_ms();
    let (alias, color) = alias::fresh_alias(&[]);
    let mut tx = db_pool.begin().await?;

    let mut inserted = false;
    for attempt in 1..=invite::MAX_ATTEMPTS {
        let code = next_code();
        let result = sqlx::query(
            "INSERT INTO echo_chambers (id,creator_id,name,topic,description,invite_code,is_public,max_members,member_count,created_at,updated_at)
             VALUES (?,?,?,?,?,?,?,?,1,?,?)",
        )
        .bind(id)
        .bind(creator.id)
        .bind(&name)
        .bind(&topic)
        .bind(&description)
        .bind(&code)
        .bind(new.is_public)
        .bind(max_members)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await;

        match result {
            Ok(_) => {
                inserted = true;
                break;
            }
            Err(e) if is_unique_violation(&e) => warn!("invite code collision on attempt {attempt}"),
            Err(e) => return Err(e.into()),
        }
    }
    if !inserted {
        return Err(AppError::from("could not generate a unique invite code"));
    }

    sqlx::query("INSERT INTO echo_chamber_members (chamber_id,user_id,alias,color,role,joined_at) VALUES (?,?,?,?,?,?)")
        .bind(id)
        .bind(creator.id)
        .bind(&alias)
        .bind(&color)
        .bind(MemberRole::Creator)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!("echo chamber {id} created by {}", creator.id);
    view_for(db_pool, creator.id, id).await?.ok_or(AppError::NotFound("Echo chamber"))
}

async fn join(db_pool: &SqlitePool, events: &ChamberEvents, user_id: Uuid, chamber: &EchoChamber) -> AppResult<ChamberView> {
    if membership(db_pool, chamber.id, user_id).await?.is_none() {
        let mut tx = db_pool.begin().await?;

        // the guard keeps member_count <= max_members under concurrent joins
        let claimed = sqlx::query(
            "UPDATE echo_chambers SET member_count=member_count+1, updated_at=? WHERE id=? AND member_count < max_members",
        )
        .bind(now_ms())
        .bind(chamber.id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if claimed == 0 {
            return Err(AppError::conflict("Echo chamber is full"));
        }

        let taken: Vec<String> = sqlx::query_scalar("SELECT alias FROM echo_chamber_members WHERE chamber_id=?")
            .bind(chamber.id)
            .fetch_all(&mut *tx)
            .await?;
        let (alias, color) = alias::fresh_alias(&taken);

        let inserted = sqlx::query("INSERT INTO echo_chamber_members (chamber_id,user_id,alias,color,role,joined_at) VALUES (?,?,?,?,?,?)")
            .bind(chamber.id)
            .bind(user_id)
            .bind(&alias)
            .bind(&color)
            .bind(MemberRole::Member)
            .bind(now_ms())
            .execute(&mut *tx)
            .await;
        match inserted {
            Ok(_) => {
                tx.commit().await?;
                info!("{user_id} joined echo chamber {} as {alias}", chamber.id);
                events.publish(ChamberEvent::MemberJoined { chamber_id: chamber.id, alias, color });
            }
            // joined concurrently; dropping tx gives the seat back
            Err(e) if is_unique_violation(&e) => {}
            Err(e) => return Err(e.into()),
        }
    }

    view_for(db_pool, user_id, chamber.id).await?.ok_or(AppError::NotFound("Echo chamber"))
}

pub async fn join_by_code(db_pool: &SqlitePool, events: &ChamberEvents, user_id: Uuid, code: &str) -> AppResult<ChamberView> {
    flags::require_enabled(db_pool, flags::ECHO_CHAMBERS).await?;
    let code = invite::normalize(code).ok_or(AppError::NotFound("Echo chamber"))?;
    let chamber: EchoChamber = sqlx::query_as(&format!("SELECT {CHAMBER_COLUMNS} FROM echo_chambers c WHERE c.invite_code=?"))
        .bind(&code)
        .fetch_optional(db_pool)
        .await?
        .ok_or(AppError::NotFound("Echo chamber"))?;
    join(db_pool, events, user_id, &chamber).await
}

pub async fn join_public(db_pool: &SqlitePool, events: &ChamberEvents, user_id: Uuid, chamber_id: Uuid) -> AppResult<ChamberView> {
    flags::require_enabled(db_pool, flags::ECHO_CHAMBERS).await?;
    let chamber = get(db_pool, chamber_id).await?.ok_or(AppError::NotFound("Echo chamber"))?;
    if !chamber.is_public && membership(db_pool, chamber_id, user_id).await?.is_none() {
        return Err(AppError::forbidden("This echo chamber is invite only"));
    }
    join(db_pool, events, user_id, &chamber).await
}

pub async fn leave_chamber(db_pool: &SqlitePool, events: &ChamberEvents, user_id: Uuid, chamber_id: Uuid) -> AppResult<()> {
    let member = require_member(db_pool, chamber_id, user_id).await?;
    if member.role == MemberRole::Creator {
        return Err(AppError::conflict("The creator cannot leave; delete the chamber instead"));
    }

    let mut tx = db_pool.begin().await?;
    let removed = sqlx::query("DELETE FROM echo_chamber_members WHERE chamber_id=? AND user_id=?")
        .bind(chamber_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if removed > 0 {
        sqlx::query("UPDATE echo_chambers SET member_count=member_count-1, updated_at=? WHERE id=?")
            .bind(now_ms())
            .bind(chamber_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM typing_indicators WHERE chamber_id=? AND user_id=?")
            .bind(chamber_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    info!("{user_id} left echo chamber {chamber_id}");
    events.publish(ChamberEvent::MemberLeft { chamber_id, alias: member.alias });
    Ok(())
}

pub async fn get_chamber(db_pool: &SqlitePool, user_id: Uuid, chamber_id: Uuid) -> AppResult<ChamberView> {
    let view = view_for(db_pool, user_id, chamber_id).await?.ok_or(AppError::NotFound("Echo chamber"))?;
    if !view.is_member && !view.is_public {
        return Err(AppError::forbidden("Not authorized to view this echo chamber"));
    }
    Ok(view)
}

pub async fn list_my_chambers(db_pool: &SqlitePool, user_id: Uuid) -> AppResult<Vec<ChamberView>> {
    let rows: Vec<ChamberRow> = sqlx::query_as(&format!(
        "SELECT {CHAMBER_COLUMNS}, m.alias AS my_alias, m.color AS my_color FROM echo_chambers c
         JOIN echo_chamber_members m ON m.chamber_id=c.id AND m.user_id=?
         ORDER BY c.updated_at DESC, c.id DESC"
    ))
    .bind(user_id)
    .fetch_all(db_pool)
    .await?;
    Ok(rows.into_iter().map(|row| row.view(user_id)).collect())
}

pub async fn list_public_chambers(db_pool: &SqlitePool, user_id: Uuid, page: &PageRequest) -> AppResult<Page<ChamberView>> {
    let rows: Vec<ChamberRow> = sqlx::query_as(&format!(
        "SELECT {CHAMBER_COLUMNS}, m.alias AS my_alias, m.color AS my_color FROM echo_chambers c
         LEFT JOIN echo_chamber_members m ON m.chamber_id=c.id AND m.user_id=?
         WHERE c.is_public=1 AND (? IS NULL OR c.id < ?)
         ORDER BY c.id DESC LIMIT ?"
    ))
    .bind(user_id)
    .bind(page.cursor)
    .bind(page.cursor)
    .bind(page.fetch_limit())
    .fetch_all(db_pool)
    .await?;

    Ok(Page::from_rows(rows, page, |row| row.chamber.id).map(|row| row.view(user_id)))
}

pub async fn list_members(db_pool: &SqlitePool, user_id: Uuid, chamber_id: Uuid) -> AppResult<Vec<MemberView>> {
    require_member(db_pool, chamber_id, user_id).await?;
    let members: Vec<Member> = sqlx::query_as(
        "SELECT chamber_id,user_id,alias,color,role,joined_at FROM echo_chamber_members WHERE chamber_id=? ORDER BY joined_at, alias",
    )
    .bind(chamber_id)
    .fetch_all(db_pool)
    .await?;

    Ok(members
        .into_iter()
        .map(|m| MemberView {
            is_me: m.user_id == user_id,
            alias: m.alias,
            color: m.color,
            role: m.role,
            joined_at: m.joined_at,
        })
        .collect())
}

pub async fn send_message(
    db_pool: &SqlitePool,
    events: &ChamberEvents,
    user_id: Uuid,
    chamber_id: Uuid,
    content: &str,
    audio_storage_id: Option<Uuid>,
) -> AppResult<ChamberMessageView> {
    let member = require_member(db_pool, chamber_id, user_id).await?;
    let content = validate_content(content, MAX_CHAMBER_MESSAGE_LEN)?;
    if let Some(audio) = audio_storage_id {
        flags::require_enabled(db_pool, flags::VOICE_MESSAGES).await?;
        files::require_attachment(db_pool, user_id, audio, AttachmentKind::Audio).await?;
    }
    rate_limit::check(db_pool, &format!("chamber_message:{user_id}"), rate_limit::CHAMBER_MESSAGES).await?;

    let message = ChamberMessage {
        id: new_id(),
        chamber_id,
        sender_id: user_id,
        alias: member.alias,
        color: member.color,
        content,
        reactions: Json(Vec::new()),
        audio_storage_id,
        created_at: now_ms(),
    };
    sqlx::query(&format!("INSERT INTO echo_chamber_messages ({MESSAGE_COLUMNS}) VALUES (?,?,?,?,?,?,?,?,?)"))
        .bind(message.id)
        .bind(message.chamber_id)
        .bind(message.sender_id)
        .bind(&message.alias)
        .bind(&message.color)
        .bind(&message.content)
        .bind(&message.reactions)
        .bind(message.audio_storage_id)
        .bind(message.created_at)
        .execute(db_pool)
        .await?;
    sqlx::query("DELETE FROM typing_indicators WHERE chamber_id=? AND user_id=?")
        .bind(chamber_id)
        .bind(user_id)
        .execute(db_pool)
        .await?;

    let view = message.view(user_id);
    events.publish(ChamberEvent::Message(message));
    Ok(view)
}

pub async fn get_message(db_pool: &SqlitePool, message_id: Uuid) -> AppResult<Option<ChamberMessage>> {
    Ok(sqlx::query_as(&format!("SELECT {MESSAGE_COLUMNS} FROM echo_chamber_messages WHERE id=?"))
        .bind(message_id)
        .fetch_optional(db_pool)
        .await?)
}

pub async fn list_messages(db_pool: &SqlitePool, user_id: Uuid, chamber_id: Uuid, page: &PageRequest) -> AppResult<Page<ChamberMessageView>> {
    require_member(db_pool, chamber_id, user_id).await?;
    let rows: Vec<ChamberMessage> = sqlx::query_as(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM echo_chamber_messages
         WHERE chamber_id=? AND (? IS NULL OR id < ?)
         ORDER BY id DESC LIMIT ?"
    ))
    .bind(chamber_id)
    .bind(page.cursor)
    .bind(page.cursor)
    .bind(page.fetch_limit())
    .fetch_all(db_pool)
    .await?;

    Ok(Page::from_rows(rows, page, |m| m.id).map(|m| m.view(user_id)))
}

/// Adds `user_id` under `emoji`, or takes them out if already there.
pub(crate) fn toggle(reactions: &mut Vec<Reaction>, emoji: &str, user_id: Uuid) {
    match reactions.iter_mut().position(|r| r.emoji == emoji) {
        Some(i) => {
            let users = &mut reactions[i].user_ids;
            match users.iter().position(|u| *u == user_id) {
                Some(j) => {
                    users.remove(j);
                }
                None => users.push(user_id),
            }
            if reactions[i].user_ids.is_empty() {
                reactions.remove(i);
            }
        }
        None => reactions.push(Reaction {
            emoji: emoji.to_owned(),
            user_ids: vec![user_id],
        }),
    }
}

pub async fn toggle_reaction(
    db_pool: &SqlitePool,
    events: &ChamberEvents,
    user_id: Uuid,
    message_id: Uuid,
    emoji: &str,
) -> AppResult<ChamberMessageView> {
    let emoji = emoji.trim();
    if emoji.is_empty() || emoji.len() > MAX_EMOJI_LEN {
        return Err(AppError::invalid("Invalid reaction"));
    }

    for _ in 0..REACTION_RETRIES {
        let mut message = get_message(db_pool, message_id).await?.ok_or(AppError::NotFound("Message"))?;
        require_member(db_pool, message.chamber_id, user_id).await?;

        let before = serde_json::to_string(&message.reactions.0)?;
        toggle(&mut message.reactions.0, emoji, user_id);

        // compare-and-swap on the stored list
        let swapped = sqlx::query("UPDATE echo_chamber_messages SET reactions=? WHERE id=? AND reactions=?")
            .bind(&message.reactions)
            .bind(message_id)
            .bind(&before)
            .execute(db_pool)
            .await?
            .rows_affected();
        if swapped == 1 {
            let view = message.view(user_id);
            events.publish(ChamberEvent::Reaction(message));
            return Ok(view);
        }
    }
    Err(AppError::conflict("Message is busy, try again"))
}

pub async fn set_typing(
    db_pool: &SqlitePool,
    events: &ChamberEvents,
    user_id: Uuid,
    chamber_id: Uuid,
    is_typing: bool,
) -> AppResult<()> {
    let member = require_member(db_pool, chamber_id, user_id).await?;
    if is_typing {
        sqlx::query(
            "INSERT INTO typing_indicators (chamber_id,user_id,alias,updated_at) VALUES (?,?,?,?)
             ON CONFLICT(chamber_id,user_id) DO UPDATE SET updated_at=excluded.updated_at",
        )
        .bind(chamber_id)
        .bind(user_id)
        .bind(&member.alias)
        .bind(now_ms())
        .execute(db_pool)
        .await?;
    } else {
        sqlx::query("DELETE FROM typing_indicators WHERE chamber_id=? AND user_id=?")
            .bind(chamber_id)
            .bind(user_id)
            .execute(db_pool)
            .await?;
    }

    events.publish(ChamberEvent::Typing { chamber_id, alias: member.alias, is_typing });
    Ok(())
}

pub async fn clear_typing(db_pool: &SqlitePool, events: &ChamberEvents, user_id: Uuid, chamber_id: Uuid) -> AppResult<()> {
    set_typing(db_pool, events, user_id, chamber_id, false).await
}

/// Who else is typing right now.
pub async fn list_typing(db_pool: &SqlitePool, user_id: Uuid, chamber_id: Uuid) -> AppResult<Vec<TypingView>> {
    require_member(db_pool, chamber_id, user_id).await?;
    Ok(sqlx::query_as(
        "SELECT alias,updated_at FROM typing_indicators WHERE chamber_id=? AND user_id != ? AND updated_at > ? ORDER BY alias",
    )
    .bind(chamber_id)
    .bind(user_id)
    .bind(now_ms() - TYPING_TTL_MS)
    .fetch_all(db_pool)
    .await?)
}

pub async fn cleanup_typing(db_pool: &SqlitePool, now: i64) -> AppResult<u64> {
    Ok(sqlx::query("DELETE FROM typing_indicators WHERE updated_at <= ?")
        .bind(now - TYPING_TTL_MS)
        .execute(db_pool)
        .await?
        .rows_affected())
}

pub async fn regenerate_invite_code(db_pool: &SqlitePool, user_id: Uuid, chamber_id: Uuid) -> AppResult<ChamberView> {
    let chamber = get(db_pool, chamber_id).await?.ok_or(AppError::NotFound("Echo chamber"))?;
    if chamber.creator_id != user_id {
        return Err(AppError::forbidden("Not authorized: only the creator can change the invite code"));
    }

    for attempt in 1..=invite::MAX_ATTEMPTS {
        let code = invite::generate_code();
        let result = sqlx::query("UPDATE echo_chambers SET invite_code=?, updated_at=? WHERE id=?")
            .bind(&code)
            .bind(now_ms())
            .bind(chamber_id)
            .execute(db_pool)
            .await;
        match result {
            Ok(_) => return view_for(db_pool, user_id, chamber_id).await?.ok_or(AppError::NotFound("Echo chamber")),
            Err(e) if is_unique_violation(&e) => warn!("invite code collision on attempt {attempt}"),
            Err(e) => return Err(e.into()),
        }
    }
    Err(AppError::from("could not generate a unique invite code"))
}

/// Creator or admin only. Messages, members and typing indicators go with it.
pub async fn delete_chamber(db_pool: &SqlitePool, events: &ChamberEvents, user: &User, chamber_id: Uuid) -> AppResult<()> {
    let chamber = get(db_pool, chamber_id).await?.ok_or(AppError::NotFound("Echo chamber"))?;
    if chamber.creator_id != user.id && !user.is_admin() {
        return Err(AppError::forbidden("Not authorized to delete this echo chamber"));
    }

    sqlx::query("DELETE FROM echo_chambers WHERE id=?")
        .bind(chamber_id)
        .execute(db_pool)
        .await?;

    info!("echo chamber {chamber_id} deleted by {}", user.id);
    events.publish(ChamberEvent::Deleted { chamber_id });
    Ok(())
}

/// The sender may take a message back; admins may remove any.
pub async fn delete_message(db_pool: &SqlitePool, events: &ChamberEvents, user: &User, message_id: Uuid) -> AppResult<()> {
    let message = get_message(db_pool, message_id).await?.ok_or(AppError::NotFound("Message"))?;
    if message.sender_id != user.id && !user.is_admin() {
        return Err(AppError::forbidden("Not authorized to delete this message"));
    }
    remove_message(db_pool, events, message_id).await
}

pub(crate) async fn remove_message(db_pool: &SqlitePool, events: &ChamberEvents, message_id: Uuid) -> AppResult<()> {
    let message = get_message(db_pool, message_id).await?.ok_or(AppError::NotFound("Message"))?;
    sqlx::query("DELETE FROM echo_chamber_messages WHERE id=?")
        .bind(message_id)
        .execute(db_pool)
        .await?;
    events.publish(ChamberEvent::MessageDeleted { chamber_id: message.chamber_id, message_id });
    Ok(())
}
