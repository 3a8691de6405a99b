mod common;

use echoinwhispr::{
    chambers::{self, ChamberEvents, NewChamber},
    files::FileStore,
    users::{self, ProfileUpdate},
    AppError,
};

#[tokio::test]
async fn usernames_are_unique_ignoring_case() {
    let db_pool = common::pool().await;
    let ada = common::user(&db_pool, "ada").await;
    let bob = common::user(&db_pool, "bob").await;

    let renamed = users::set_username(&db_pool, bob.id, "Bobby_2").await.unwrap();
    assert_eq!(renamed.username.as_deref(), Some("bobby_2"));

    let taken = users::set_username(&db_pool, bob.id, "ADA").await;
    assert!(matches!(taken, Err(AppError::Conflict(_))));
    assert_eq!(users::require(&db_pool, ada.id).await.unwrap().username.as_deref(), Some("ada"));
}

#[tokio::test]
async fn concurrent_claims_leave_one_winner() {
    let db_pool = common::pool().await;
    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(common::user(&db_pool, &format!("user{i}")).await.id);
    }

    let handles: Vec<_> = ids
        .iter()
        .map(|&id| {
            let db_pool = db_pool.clone();
            tokio::spawn(async move { users::set_username(&db_pool, id, "wanted").await })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(AppError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error {other}"),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn identity_upsert_keeps_existing_username() {
    let db_pool = common::pool().await;
    let first = common::user(&db_pool, "carol").await;
    let again = common::user(&db_pool, "carol").await;
    assert_eq!(first.id, again.id);
    assert_eq!(again.username.as_deref(), Some("carol"));
}

#[tokio::test]
async fn profile_updates_validate_fields() {
    let db_pool = common::pool().await;
    let user = common::user(&db_pool, "dora").await;

    let updated = users::update_profile(
        &db_pool,
        user.id,
        ProfileUpdate {
            mood: Some("Hopeful".into()),
            interests: Some(vec!["Music".into(), "music".into()]),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(updated.mood.as_deref(), Some("Hopeful"));
    assert_eq!(updated.interests.0, vec!["Music"]);

    let bad = users::update_profile(
        &db_pool,
        user.id,
        ProfileUpdate {
            preferences: Some(serde_json::json!([1, 2])),
            ..Default::default()
        },
    )
    .await;
    assert!(matches!(bad, Err(AppError::Invalid(_))));
}

#[tokio::test]
async fn search_never_returns_the_viewer() {
    let db_pool = common::pool().await;
    let echo = common::user(&db_pool, "echo_one").await;
    common::user(&db_pool, "echo_two").await;
    common::user(&db_pool, "other").await;

    let found = users::search(&db_pool, echo.id, "ECHO", None).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].username.as_deref(), Some("echo_two"));

    assert!(matches!(users::search(&db_pool, echo.id, "e", None).await, Err(AppError::Invalid(_))));
}

#[tokio::test]
async fn deleting_a_user_frees_their_chamber_seats() {
    let db_pool = common::pool().await;
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path(), "http://localhost:8080", 1024);
    let events = ChamberEvents::new(16);

    let host = common::user(&db_pool, "host").await;
    let guest = common::user(&db_pool, "guest").await;
    let chamber = chambers::create_chamber(&db_pool, &host, NewChamber::named("Late night"))
        .await
        .unwrap();
    let code = chamber.invite_code.clone().unwrap();
    let joined = chambers::join_by_code(&db_pool, &events, guest.id, &code).await.unwrap();
    assert_eq!(joined.member_count, 2);

    assert!(users::delete_user(&db_pool, &store, guest.id).await.unwrap());
    assert!(users::get_by_id(&db_pool, guest.id).await.unwrap().is_none());

    let after = chambers::get_chamber(&db_pool, host.id, chamber.id).await.unwrap();
    assert_eq!(after.member_count, 1);
}
