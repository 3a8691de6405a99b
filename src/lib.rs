pub mod admin;
pub mod auth;
pub mod chambers;
pub mod config;
pub mod conversations;
pub mod db;
pub mod error;
pub mod files;
pub mod flags;
pub mod friends;
pub mod pagination;
pub mod rate_limit;
pub mod resonance;
pub mod scheduler;
pub mod session;
pub mod users;
pub mod webhooks;
pub mod whispers;

use std::sync::Arc;

use axum::{
    extract::FromRef,
    routing::{get, post, put},
    Router,
};
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, SessionManagerLayer};

pub use error::{AppError, AppResult};

use chambers::ChamberEvents;
use config::Config;
use files::FileStore;

/// Buffered chamber events per subscriber before it starts lagging.
const EVENT_CAPACITY: usize = 256;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub clients: auth::Clients,
    pub config: Arc<Config>,
    pub files: FileStore,
    pub events: ChamberEvents,
}

impl AppState {
    pub fn new(db_pool: SqlitePool, clients: auth::Clients, config: Config) -> Self {
        let files = FileStore::new(&config.storage_dir, &config.public_url, config.max_upload_bytes);
        Self {
            db_pool,
            clients,
            config: Arc::new(config),
            files,
            events: ChamberEvents::new(EVENT_CAPACITY),
        }
    }
}

pub trait GetField {
    fn get_str_field(&self, field: &str) -> AppResult<String>;
}

/// String lookups on loosely typed provider payloads.
impl GetField for serde_json::Value {
    fn get_str_field(&self, field: &str) -> AppResult<String> {
        Ok(
            self.get(field)
            .ok_or(format!("expected {field} in {self}"))?
            .as_str()
            .ok_or(format!("expected {field} in {self} to be string"))?
            .to_owned()
        )
    }
}

async fn health() -> &'static str {
    "OK"
}

/// The whole HTTP surface, sessions and layers included.
pub fn app(state: AppState) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(state.config.public_url.starts_with("https://"))
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(state.config.session_idle_minutes)));

    let api = Router::new()
        .nest("/users", users::router())
        .nest("/whispers", whispers::router())
        .nest("/conversations", conversations::router())
        .nest("/friends", friends::router())
        .nest("/chambers", chambers::router())
        .nest("/admin", admin::router())
        .nest("/files", files::router())
        .route("/flags", get(flags::flags_index))
        .route("/flags/{name}", put(flags::flag_update))
        .route("/resonance", get(resonance::find))
        .route("/search", get(users::search_route));

    Router::new()
        .merge(auth::router())
        .nest("/api", api)
        .nest("/files", files::public_router(state.files.max_bytes()))
        .route("/webhooks/identity", post(webhooks::identity))
        .route("/health", get(health))
        .with_state(state)
        .layer(session_layer)
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
}
