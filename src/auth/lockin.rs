use std::sync::Arc;

use axum::{debug_handler, extract::{Path, Query, State}, response::Redirect};
use oauth2::{AuthorizationCode, CsrfToken, PkceCodeVerifier, TokenResponse};
use serde::Deserialize;
use serde_json::Value;
use sqlx::SqlitePool;
use tower_sessions::Session;
use tracing::info;

use crate::{
    config::Config,
    session::{CSRF_STATE, PKCE_VERIFIER, RETURN_URL, SUBJECT},
    users::{self, IdentityProfile},
    AppError, AppResult, AppState,
};

use super::{clients::ClientProvider, Clients};

#[derive(Deserialize)]
pub struct LockinQuery {
    pub state: Option<String>,
    pub code: Option<String>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn lockin(
    Path(provider): Path<ClientProvider>,
    Query(LockinQuery { state, code }): Query<LockinQuery>,
    State(db_pool): State<SqlitePool>,
    State(clients): State<Clients>,
    State(config): State<Arc<Config>>,
    session: Session,
) -> AppResult<Redirect> {
    let state = CsrfToken::new(state.ok_or(AppError::invalid("OAuth: without state"))?);
    let code = AuthorizationCode::new(code.ok_or(AppError::invalid("OAuth: without code"))?);

    let Some(stored_state) = session.remove::<String>(CSRF_STATE).await? else {
        return Err(AppError::invalid("no csrf_state"));
    };

    if state.secret().as_str() != stored_state.as_str() {
        return Err(AppError::forbidden("csrf tokens don't match"));
    }

    let Some(pkce_verifier) = session.remove::<String>(PKCE_VERIFIER).await? else {
        return Err(AppError::invalid("no pkce_verifier"));
    };

    let client = clients.get_client(provider)?;
    let http_client = reqwest::ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;
    let token_result = client
        .exchange_code(code)
        .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier))
        .request_async(&http_client)
        .await?;

    let access_token = token_result.access_token().secret();
    let body: Value = http_client.get(provider.userinfo_url())
        .bearer_auth(access_token)
        .header(reqwest::header::USER_AGENT, "echoinwhispr")
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let (subject, profile) = identity_from_userinfo(provider, &body)?;
    let user = users::upsert_from_identity(&db_pool, &subject, &profile, config.is_super_admin_subject(&subject)).await?;

    session.cycle_id().await?;
    session.insert(SUBJECT, subject.clone()).await?;

    info!("welcome u/{} ({subject})", user.id);

    let return_url: String = session.remove(RETURN_URL).await?.unwrap_or("/".to_string());
    Ok(Redirect::to(return_url.as_str()))
}

/// Subject and profile claims out of a provider userinfo document.
fn identity_from_userinfo(provider: ClientProvider, body: &Value) -> AppResult<(String, IdentityProfile)> {
    let id = match body.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => Err(format!("expected id in {body}"))?,
    };
    let text = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_owned);

    Ok((
        format!("{}|{id}", provider.id()),
        IdentityProfile {
            username: text("login"),
            display_name: text("name"),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn github_ids_are_numbers() {
        let (subject, profile) =
            identity_from_userinfo(ClientProvider::Github, &json!({ "id": 42, "login": "octo", "name": "Octo Cat" })).unwrap();
        assert_eq!(subject, "github.com|42");
        assert_eq!(profile.username.as_deref(), Some("octo"));
        assert_eq!(profile.display_name.as_deref(), Some("Octo Cat"));
    }

    #[test]
    fn userinfo_without_id_is_rejected() {
        assert!(identity_from_userinfo(ClientProvider::Google, &json!({ "name": "x" })).is_err());
    }
}
