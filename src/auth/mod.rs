mod clients;
mod login;
mod lockin;

use axum::{
    debug_handler,
    extract::{FromRequestParts, Query},
    http::request::Parts,
    response::Redirect,
    routing::get,
    Router,
};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::info;

use crate::{session::SUBJECT, users::{self, User}, AppError, AppResult, AppState};

pub use clients::{ClientProvider, Clients};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login/{provider}", get(login::login))
        .route("/lockin/{provider}", get(lockin::lockin))
        .route("/logout", get(logout))
}

/// The signed-in user, resolved from the session's identity subject.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|_| AppError::NotAuthenticated)?;

        let Some(subject) = session.get::<String>(SUBJECT).await? else {
            return Err(AppError::NotAuthenticated);
        };

        let user = users::get_by_subject(&state.db_pool, &subject)
            .await?
            .ok_or(AppError::NotFound("User"))?;
        Ok(CurrentUser(user))
    }
}

/// Keeps `url` only when it is a path on this site; `//host` and `/\host` point elsewhere.
pub(crate) fn local_path(url: String) -> Option<String> {
    let local = url.starts_with('/') && !url.starts_with("//") && !url.starts_with("/\\");
    local.then_some(url)
}

#[derive(Deserialize)]
struct LogoutQuery {
    return_url: Option<String>,
}

/// Drops the whole session, then sends the browser to a local page.
#[debug_handler]
async fn logout(Query(LogoutQuery { return_url }): Query<LogoutQuery>, session: Session) -> AppResult<Redirect> {
    if let Some(subject) = session.get::<String>(SUBJECT).await? {
        info!("{subject} signed out");
    }
    session.flush().await?;

    let target = return_url.and_then(local_path).unwrap_or_else(|| "/".to_owned());
    Ok(Redirect::to(&target))
}

#[cfg(test)]
mod tests {
    use super::local_path;

    #[test]
    fn only_same_site_paths_are_kept() {
        assert_eq!(local_path("/chambers/1".into()).as_deref(), Some("/chambers/1"));
        assert_eq!(local_path("/".into()).as_deref(), Some("/"));
        assert_eq!(local_path("https://evil.example".into()), None);
        assert_eq!(local_path("//evil.example".into()), None);
        assert_eq!(local_path("/\\evil.example".into()), None);
        assert_eq!(local_path("chambers".into()), None);
    }
}
