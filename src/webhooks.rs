//! Identity provider webhooks keeping local users in step with the provider.

use std::sync::Arc;

use axum::{
    debug_handler,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    files::FileStore,
    users::{self, IdentityProfile},
    AppError, AppResult, GetField,
};

pub const SECRET_HEADER: &str = "x-webhook-secret";

#[derive(Debug, Deserialize)]
pub struct IdentityEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

fn profile_from(data: &Value) -> IdentityProfile {
    let field = |name: &str| data.get_str_field(name).ok().filter(|s| !s.trim().is_empty());
    let display_name = match (field("first_name"), field("last_name")) {
        (Some(first), Some(last)) => Some(format!("{first} {last}")),
        (first, last) => first.or(last),
    };
    IdentityProfile {
        username: field("username"),
        display_name,
    }
}

fn authorized(config: &Config, headers: &HeaderMap) -> bool {
    let Some(secret) = config.webhook_secret.as_deref() else {
        return false;
    };
    headers
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|given| secrets_match(given, secret))
}

/// Equal-time comparison over the SHA-256 digests of both values.
fn secrets_match(given: &str, secret: &str) -> bool {
    let given = Sha256::digest(given.as_bytes());
    let secret = Sha256::digest(secret.as_bytes());
    given.iter().zip(secret.iter()).fold(0u8, |diff, (a, b)| diff | (a ^ b)) == 0
}

/// Applies one event. Unknown event types are ignored.
pub async fn apply(db_pool: &SqlitePool, config: &Config, files: &FileStore, event: &IdentityEvent) -> AppResult<()> {
    match event.kind.as_str() {
        "user.created" | "user.updated" => {
            let subject = event.data.get_str_field("id").map_err(|_| AppError::invalid("Event data has no id"))?;
            let profile = profile_from(&event.data);
            let user = users::upsert_from_identity(db_pool, &subject, &profile, config.is_super_admin_subject(&subject)).await?;
            info!("identity {} synced to user {}", event.kind, user.id);
        }
        "user.deleted" => {
            let subject = event.data.get_str_field("id").map_err(|_| AppError::invalid("Event data has no id"))?;
            if let Some(user) = users::get_by_subject(db_pool, &subject).await? {
                users::delete_user(db_pool, files, user.id).await?;
            }
        }
        other => debug!("ignoring identity event {other}"),
    }
    Ok(())
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn identity(
    State(db_pool): State<SqlitePool>,
    State(config): State<Arc<Config>>,
    State(files): State<FileStore>,
    headers: HeaderMap,
    Json(event): Json<IdentityEvent>,
) -> AppResult<StatusCode> {
    if !authorized(&config, &headers) {
        warn!("rejected identity webhook without a valid secret");
        return Err(AppError::NotAuthenticated);
    }
    apply(&db_pool, &config, &files, &event).await?;
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn display_name_joins_first_and_last() {
        let profile = profile_from(&json!({ "id": "u1", "username": "fox", "first_name": "Ada", "last_name": "Lovelace" }));
        assert_eq!(profile.display_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(profile.username.as_deref(), Some("fox"));

        let profile = profile_from(&json!({ "id": "u1", "last_name": "Lovelace", "username": null }));
        assert_eq!(profile.display_name.as_deref(), Some("Lovelace"));
        assert_eq!(profile.username, None);
    }

    #[test]
    fn missing_secret_rejects_everything() {
        let mut headers = HeaderMap::new();
        headers.insert(SECRET_HEADER, "s3cret".parse().unwrap());

        let mut config = Config::default();
        assert!(!authorized(&config, &headers));

        config.webhook_secret = Some("s3cret".into());
        assert!(authorized(&config, &headers));

        config.webhook_secret = Some("other".into());
        assert!(!authorized(&config, &headers));
    }

    #[test]
    fn secrets_match_exactly() {
        assert!(secrets_match("s3cret", "s3cret"));
        assert!(!secrets_match("s3cre", "s3cret"));
        assert!(!secrets_match("s3cret!", "s3cret"));
        assert!(!secrets_match("", "s3cret"));
        assert!(!secrets_match("S3CRET", "s3cret"));
    }
}
