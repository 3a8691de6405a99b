mod common;

use echoinwhispr::{
    flags, friends, resonance,
    users::{self, ProfileUpdate},
    AppError,
};
use sqlx::SqlitePool;
use uuid::Uuid;

async fn describe(db_pool: &SqlitePool, id: Uuid, mood: &str, life_phase: &str, interests: &[&str]) {
    users::update_profile(
        db_pool,
        id,
        ProfileUpdate {
            mood: Some(mood.into()),
            life_phase: Some(life_phase.into()),
            interests: Some(interests.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn best_match_is_anonymous() {
    let db_pool = common::pool().await;
    let me = common::user(&db_pool, "seeker").await;
    let close = common::user(&db_pool, "close").await;
    let far = common::user(&db_pool, "far").await;
    describe(&db_pool, me.id, "Hopeful", "Student", &["Music", "Chess"]).await;
    describe(&db_pool, close.id, "hopeful", "Student", &["music"]).await;
    describe(&db_pool, far.id, "Tired", "Retired", &["Chess"]).await;

    let me = users::require(&db_pool, me.id).await.unwrap();
    let found = resonance::find_match(&db_pool, &me).await.unwrap().unwrap();
    assert_eq!(found.user_id, close.id);
    assert_eq!(found.score, 3 + 2 + 1);
    assert_eq!(found.shared_interests, vec!["music"]);

    let json = serde_json::to_value(&found).unwrap();
    assert!(json.get("username").is_none());
    assert!(json.get("displayName").is_none());
}

#[tokio::test]
async fn friends_blocked_and_opted_out_are_skipped() {
    let db_pool = common::pool().await;
    let me = common::user(&db_pool, "seeker").await;
    let friend = common::user(&db_pool, "friend").await;
    let blocked = common::user(&db_pool, "blocked").await;
    let shy = common::user(&db_pool, "shy").await;
    for id in [me.id, friend.id, blocked.id, shy.id] {
        describe(&db_pool, id, "Calm", "Parent", &["Gardening"]).await;
    }

    let request = friends::send_request(&db_pool, me.id, friend.id).await.unwrap();
    friends::accept_request(&db_pool, friend.id, request.id).await.unwrap();
    friends::block_user(&db_pool, blocked.id, me.id).await.unwrap();
    users::update_profile(
        &db_pool,
        shy.id,
        ProfileUpdate {
            resonance_opt_in: Some(false),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let me = users::require(&db_pool, me.id).await.unwrap();
    assert_eq!(resonance::find_match(&db_pool, &me).await.unwrap(), None);
}

#[tokio::test]
async fn matching_follows_its_flag() {
    let db_pool = common::pool().await;
    let root = common::super_admin(&db_pool, "root").await;
    flags::set_flag(&db_pool, &root, flags::RESONANCE_MATCHING, false, None).await.unwrap();

    let found = resonance::find_match(&db_pool, &root).await;
    assert!(matches!(found, Err(AppError::Forbidden(_))));
}
