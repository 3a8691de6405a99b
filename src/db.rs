use std::str::FromStr;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use tracing::info;
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id BLOB PRIMARY KEY,
    subject TEXT NOT NULL UNIQUE,
    username TEXT UNIQUE COLLATE NOCASE,
    display_name TEXT,
    career TEXT,
    mood TEXT,
    life_phase TEXT,
    interests TEXT NOT NULL DEFAULT '[]',
    preferences TEXT NOT NULL DEFAULT '{}',
    resonance_opt_in INTEGER NOT NULL DEFAULT 1,
    role TEXT NOT NULL DEFAULT 'none',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS stored_files (
    id BLOB PRIMARY KEY,
    owner_id BLOB NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    content_type TEXT NOT NULL,
    size INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS upload_tokens (
    token TEXT PRIMARY KEY,
    owner_id BLOB NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    expires_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS conversations (
    id BLOB PRIMARY KEY,
    participant_a BLOB NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    participant_b BLOB NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    participant_key TEXT NOT NULL UNIQUE,
    initiator_id BLOB NOT NULL,
    status TEXT NOT NULL,
    initial_whisper_id BLOB NOT NULL,
    unmask_a INTEGER NOT NULL DEFAULT 0,
    unmask_b INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id BLOB PRIMARY KEY,
    conversation_id BLOB NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
    sender_id BLOB NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    content TEXT NOT NULL,
    image_storage_id BLOB,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS messages_by_conversation ON messages (conversation_id, id);

CREATE TABLE IF NOT EXISTS whispers (
    id BLOB PRIMARY KEY,
    sender_id BLOB NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    recipient_id BLOB NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    content TEXT NOT NULL,
    is_read INTEGER NOT NULL DEFAULT 0,
    read_at INTEGER,
    image_storage_id BLOB,
    audio_storage_id BLOB,
    conversation_id BLOB REFERENCES conversations(id) ON DELETE SET NULL,
    expires_at INTEGER,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS whispers_by_recipient ON whispers (recipient_id, id);
CREATE INDEX IF NOT EXISTS whispers_by_sender ON whispers (sender_id, id);
CREATE INDEX IF NOT EXISTS whispers_by_expiry ON whispers (expires_at);

CREATE TABLE IF NOT EXISTS friendships (
    id BLOB PRIMARY KEY,
    requester_id BLOB NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    recipient_id BLOB NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    pair_key TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL,
    blocked_by BLOB,
    blocked_by_other BLOB,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS echo_chambers (
    id BLOB PRIMARY KEY,
    creator_id BLOB NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    topic TEXT,
    description TEXT,
    invite_code TEXT NOT NULL UNIQUE,
    is_public INTEGER NOT NULL,
    max_members INTEGER NOT NULL,
    member_count INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    CHECK (member_count <= max_members)
);

CREATE TABLE IF NOT EXISTS echo_chamber_members (
    chamber_id BLOB NOT NULL REFERENCES echo_chambers(id) ON DELETE CASCADE,
    user_id BLOB NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    alias TEXT NOT NULL,
    color TEXT NOT NULL,
    role TEXT NOT NULL,
    joined_at INTEGER NOT NULL,
    PRIMARY KEY (chamber_id, user_id),
    UNIQUE (chamber_id, alias)
);

CREATE TABLE IF NOT EXISTS echo_chamber_messages (
    id BLOB PRIMARY KEY,
    chamber_id BLOB NOT NULL REFERENCES echo_chambers(id) ON DELETE CASCADE,
    sender_id BLOB NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    alias TEXT NOT NULL,
    color TEXT NOT NULL,
    content TEXT NOT NULL,
    reactions TEXT NOT NULL DEFAULT '[]',
    audio_storage_id BLOB,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS chamber_messages_by_chamber ON echo_chamber_messages (chamber_id, id);

CREATE TABLE IF NOT EXISTS typing_indicators (
    chamber_id BLOB NOT NULL REFERENCES echo_chambers(id) ON DELETE CASCADE,
    user_id BLOB NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    alias TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (chamber_id, user_id)
);

CREATE TABLE IF NOT EXISTS admin_requests (
    id BLOB PRIMARY KEY,
    user_id BLOB NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    reason TEXT NOT NULL,
    status TEXT NOT NULL,
    reviewed_by BLOB,
    reviewed_at INTEGER,
    created_at INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS one_pending_admin_request ON admin_requests (user_id) WHERE status = 'pending';

CREATE TABLE IF NOT EXISTS feature_flags (
    name TEXT PRIMARY KEY,
    enabled INTEGER NOT NULL,
    description TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS rate_limits (
    key TEXT NOT NULL,
    window_start INTEGER NOT NULL,
    count INTEGER NOT NULL,
    PRIMARY KEY (key, window_start)
);
"#;

/// Opens the pool behind `url`, creating the database file and schema if needed.
pub async fn connect(url: &str, max_connections: u32) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    init(&pool).await?;
    info!("database ready at {url}");
    Ok(pool)
}

/// A private in-memory database. It lives as long as its single connection,
/// so the pool never lets that connection go.
pub async fn connect_in_memory() -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    init(&pool).await?;
    Ok(pool)
}

pub async fn init(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    crate::flags::seed_defaults(pool).await?;
    Ok(())
}

pub fn new_id() -> Uuid {
    Uuid::now_v7()
}

/// Unix time in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
