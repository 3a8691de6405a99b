//! Upload and serve whisper and chamber attachments from a local directory.

mod handlers;

use std::{io::ErrorKind, path::PathBuf};

use rand::{distr::Alphanumeric, Rng};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    db::{new_id, now_ms},
    AppError, AppResult,
};

pub(crate) use handlers::{public_router, router};

const UPLOAD_TOKEN_TTL_MS: i64 = 60 * 60 * 1000;
const TOKEN_LEN: usize = 32;

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    public_url: String,
    max_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    Audio,
}

impl AttachmentKind {
    fn accepts(self, content_type: &str) -> bool {
        match self {
            AttachmentKind::Image => content_type.starts_with("image/"),
            AttachmentKind::Audio => content_type.starts_with("audio/"),
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub content_type: String,
    pub size: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrl {
    pub upload_url: String,
    pub expires_at: i64,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>, public_url: impl Into<String>, max_bytes: usize) -> Self {
        Self {
            dir: dir.into(),
            public_url: public_url.into(),
            max_bytes,
        }
    }

    pub async fn ensure_dir(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    fn path(&self, id: Uuid) -> PathBuf {
        self.dir.join(id.simple().to_string())
    }

    pub fn file_url(&self, id: Uuid) -> String {
        format!("{}/files/{id}", self.public_url)
    }

    async fn write_bytes(&self, id: Uuid, bytes: &[u8]) -> std::io::Result<()> {
        self.ensure_dir().await?;
        tokio::fs::write(self.path(id), bytes).await
    }

    pub(crate) async fn read_bytes(&self, id: Uuid) -> AppResult<Vec<u8>> {
        Ok(tokio::fs::read(self.path(id)).await?)
    }

    pub(crate) async fn remove_bytes(&self, id: Uuid) {
        if let Err(e) = tokio::fs::remove_file(self.path(id)).await {
            if e.kind() != ErrorKind::NotFound {
                warn!("could not remove stored file {id}: {e}");
            }
        }
    }
}

pub async fn generate_upload_url(db_pool: &SqlitePool, store: &FileStore, owner_id: Uuid) -> AppResult<UploadUrl> {
    let token: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect();
    let expires_at = now_ms() + UPLOAD_TOKEN_TTL_MS;

    sqlx::query("INSERT INTO upload_tokens (token,owner_id,expires_at) VALUES (?,?,?)")
        .bind(&token)
        .bind(owner_id)
        .bind(expires_at)
        .execute(db_pool)
        .await?;

    Ok(UploadUrl {
        upload_url: format!("{}/files/upload/{token}", store.public_url),
        expires_at,
    })
}

/// Consumes an upload token and stores the body under a fresh storage id.
pub async fn store_upload(
    db_pool: &SqlitePool,
    store: &FileStore,
    token: &str,
    content_type: &str,
    bytes: &[u8],
) -> AppResult<StoredFile> {
    if bytes.is_empty() {
        return Err(AppError::invalid("Upload is empty"));
    }
    if bytes.len() > store.max_bytes {
        return Err(AppError::invalid(format!("File exceeds {} bytes", store.max_bytes)));
    }
    let content_type = content_type.trim().to_ascii_lowercase();
    if !(AttachmentKind::Image.accepts(&content_type) || AttachmentKind::Audio.accepts(&content_type)) {
        return Err(AppError::invalid("Only image and audio uploads are supported"));
    }

    // the token is only spent if both the row and the bytes land
    let mut tx = db_pool.begin().await?;
    let owner: Option<(Uuid,)> = sqlx::query_as("DELETE FROM upload_tokens WHERE token=? AND expires_at > ? RETURNING owner_id")
        .bind(token)
        .bind(now_ms())
        .fetch_optional(&mut *tx)
        .await?;
    let Some((owner_id,)) = owner else {
        return Err(AppError::forbidden("Upload URL is invalid or expired"));
    };

    let file = StoredFile {
        id: new_id(),
        owner_id,
        content_type,
        size: bytes.len() as i64,
        created_at: now_ms(),
    };
    sqlx::query("INSERT INTO stored_files (id,owner_id,content_type,size,created_at) VALUES (?,?,?,?,?)")
        .bind(file.id)
        .bind(file.owner_id)
        .bind(&file.content_type)
        .bind(file.size)
        .bind(file.created_at)
        .execute(&mut *tx)
        .await?;

    if let Err(e) = store.write_bytes(file.id, bytes).await {
        store.remove_bytes(file.id).await;
        return Err(e.into());
    }
    if let Err(e) = tx.commit().await {
        store.remove_bytes(file.id).await;
        return Err(e.into());
    }

    info!("stored {} ({} bytes) for {owner_id}", file.id, file.size);
    Ok(file)
}

pub async fn get_file(db_pool: &SqlitePool, id: Uuid) -> AppResult<Option<StoredFile>> {
    Ok(sqlx::query_as("SELECT id,owner_id,content_type,size,created_at FROM stored_files WHERE id=?")
        .bind(id)
        .fetch_optional(db_pool)
        .await?)
}

pub async fn get_url(db_pool: &SqlitePool, store: &FileStore, id: Uuid) -> AppResult<Option<String>> {
    Ok(get_file(db_pool, id).await?.map(|file| store.file_url(file.id)))
}

pub async fn delete_file(db_pool: &SqlitePool, store: &FileStore, user_id: Uuid, id: Uuid) -> AppResult<()> {
    let file = get_file(db_pool, id).await?.ok_or(AppError::NotFound("File"))?;
    if file.owner_id != user_id {
        return Err(AppError::forbidden("Not authorized to delete this file"));
    }
    sqlx::query("DELETE FROM stored_files WHERE id=?")
        .bind(id)
        .execute(db_pool)
        .await?;
    store.remove_bytes(id).await;
    Ok(())
}

/// Attachments must be the sender's own upload of the right kind.
pub async fn require_attachment(db_pool: &SqlitePool, owner_id: Uuid, id: Uuid, kind: AttachmentKind) -> AppResult<()> {
    let file = get_file(db_pool, id).await?.ok_or(AppError::NotFound("Attachment"))?;
    if file.owner_id != owner_id {
        return Err(AppError::forbidden("Not authorized to attach this file"));
    }
    if !kind.accepts(&file.content_type) {
        return Err(AppError::invalid(format!("Attachment must be {kind:?}").to_lowercase()));
    }
    Ok(())
}

pub async fn cleanup_expired_tokens(db_pool: &SqlitePool, now: i64) -> AppResult<u64> {
    Ok(sqlx::query("DELETE FROM upload_tokens WHERE expires_at <= ?")
        .bind(now)
        .execute(db_pool)
        .await?
        .rows_affected())
}
