mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use echoinwhispr::{auth::Clients, config::Config, users, AppState};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower::ServiceExt;

const SECRET: &str = "test-secret";

async fn app() -> (Router, SqlitePool, tempfile::TempDir) {
    let db_pool = common::pool().await;
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        storage_dir: dir.path().to_path_buf(),
        webhook_secret: Some(SECRET.to_owned()),
        ..Default::default()
    };
    let state = AppState::new(db_pool.clone(), Clients::default(), config);
    (echoinwhispr::app(state), db_pool, dir)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn webhook(secret: Option<&str>, event: Value) -> Request<Body> {
    let mut builder = Request::post("/webhooks/identity").header("content-type", "application/json");
    if let Some(secret) = secret {
        builder = builder.header("x-webhook-secret", secret);
    }
    builder.body(Body::from(event.to_string())).unwrap()
}

#[tokio::test]
async fn health_answers() {
    let (app, _db_pool, _dir) = app().await;
    let response = app.oneshot(Request::get("/health").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn api_requires_a_session() {
    let (app, _db_pool, _dir) = app().await;
    let response = app
        .oneshot(Request::get("/api/search?q=echo").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await, json!({ "error": { "message": "Not authenticated" } }));
}

#[tokio::test]
async fn flags_are_listed_publicly() {
    let (app, _db_pool, _dir) = app().await;
    let response = app.oneshot(Request::get("/api/flags").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await.as_array().map(Vec::len), Some(4));
}

#[tokio::test]
async fn webhook_needs_the_shared_secret() {
    let (app, db_pool, _dir) = app().await;
    let event = json!({ "type": "user.created", "data": { "id": "idp_1", "username": "webby" } });

    let missing = app.clone().oneshot(webhook(None, event.clone())).await.unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    let wrong = app.clone().oneshot(webhook(Some("nope"), event.clone())).await.unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    assert!(users::get_by_subject(&db_pool, "idp_1").await.unwrap().is_none());

    let ok = app.oneshot(webhook(Some(SECRET), event)).await.unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
    let user = users::get_by_subject(&db_pool, "idp_1").await.unwrap().unwrap();
    assert_eq!(user.username.as_deref(), Some("webby"));
}

#[tokio::test]
async fn webhook_syncs_the_user_lifecycle() {
    let (app, db_pool, _dir) = app().await;

    let created = json!({ "type": "user.created", "data": { "id": "idp_2", "first_name": "Ada" } });
    app.clone().oneshot(webhook(Some(SECRET), created)).await.unwrap();

    let updated = json!({ "type": "user.updated", "data": { "id": "idp_2", "first_name": "Ada", "last_name": "L" } });
    app.clone().oneshot(webhook(Some(SECRET), updated)).await.unwrap();
    let user = users::get_by_subject(&db_pool, "idp_2").await.unwrap().unwrap();
    assert_eq!(user.display_name.as_deref(), Some("Ada L"));

    let unknown = json!({ "type": "session.created", "data": {} });
    let ignored = app.clone().oneshot(webhook(Some(SECRET), unknown)).await.unwrap();
    assert_eq!(ignored.status(), StatusCode::OK);

    let deleted = json!({ "type": "user.deleted", "data": { "id": "idp_2" } });
    let gone = app.oneshot(webhook(Some(SECRET), deleted)).await.unwrap();
    assert_eq!(gone.status(), StatusCode::OK);
    assert!(users::get_by_subject(&db_pool, "idp_2").await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_files_are_not_found() {
    let (app, _db_pool, _dir) = app().await;
    let response = app
        .oneshot(Request::get(format!("/files/{}", uuid::Uuid::now_v7())).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"]["message"], "File not found");
}

#[tokio::test]
async fn logout_only_redirects_to_local_paths() {
    let (app, _db_pool, _dir) = app().await;
    for (return_url, expected) in [("/chambers", "/chambers"), ("//evil.example", "/"), ("/%5Cevil.example", "/")] {
        let response = app
            .clone()
            .oneshot(Request::get(format!("/logout?return_url={return_url}")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()["location"], expected);
    }
}
