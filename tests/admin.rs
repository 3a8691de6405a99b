mod common;

use echoinwhispr::{
    admin::{self, AdminRequestStatus},
    chambers::{self, ChamberEvents, NewChamber},
    flags,
    users::{self, AdminRole},
    whispers::{self, NewWhisper},
    AppError,
};

#[tokio::test]
async fn requests_are_reviewed_by_super_admins() {
    let db_pool = common::pool().await;
    let root = common::super_admin(&db_pool, "root").await;
    let ada = common::user(&db_pool, "ada").await;

    let short = admin::submit_request(&db_pool, &ada, "pls").await;
    assert!(matches!(short, Err(AppError::Invalid(_))));

    let request = admin::submit_request(&db_pool, &ada, "I moderate a large community").await.unwrap();
    let second = admin::submit_request(&db_pool, &ada, "Asking a second time here").await;
    assert!(matches!(second, Err(AppError::Conflict(_))));

    let self_review = admin::approve_request(&db_pool, &ada, request.id).await;
    assert!(matches!(self_review, Err(AppError::Forbidden(_))));

    let pending = admin::list_pending(&db_pool, &root).await.unwrap();
    assert_eq!(pending.len(), 1);

    let approved = admin::approve_request(&db_pool, &root, request.id).await.unwrap();
    assert_eq!(approved.status, AdminRequestStatus::Approved);
    assert_eq!(approved.reviewed_by, Some(root.id));
    assert!(approved.reviewed_at.is_some());

    let ada = users::require(&db_pool, ada.id).await.unwrap();
    assert_eq!(ada.role, AdminRole::Admin);

    let twice = admin::reject_request(&db_pool, &root, request.id).await;
    assert!(matches!(twice, Err(AppError::Conflict(_))));

    let already = admin::submit_request(&db_pool, &ada, "I would like to apply again").await;
    assert!(matches!(already, Err(AppError::Conflict(_))));
    assert_eq!(admin::my_requests(&db_pool, ada.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn rejection_allows_a_new_application() {
    let db_pool = common::pool().await;
    let root = common::super_admin(&db_pool, "root").await;
    let ada = common::user(&db_pool, "ada").await;

    let request = admin::submit_request(&db_pool, &ada, "First attempt at this").await.unwrap();
    admin::reject_request(&db_pool, &root, request.id).await.unwrap();
    assert_eq!(users::require(&db_pool, ada.id).await.unwrap().role, AdminRole::None);

    admin::submit_request(&db_pool, &ada, "Second attempt at this").await.unwrap();
}

#[tokio::test]
async fn roles_are_set_by_super_admins_on_others() {
    let db_pool = common::pool().await;
    let root = common::super_admin(&db_pool, "root").await;
    let ada = common::user(&db_pool, "ada").await;

    let own = admin::set_role(&db_pool, &root, root.id, AdminRole::None).await;
    assert!(matches!(own, Err(AppError::Forbidden(_))));

    let promoted = admin::set_role(&db_pool, &root, ada.id, AdminRole::Admin).await.unwrap();
    assert_eq!(promoted.role, AdminRole::Admin);

    let by_admin = admin::set_role(&db_pool, &promoted, root.id, AdminRole::None).await;
    assert!(matches!(by_admin, Err(AppError::Forbidden(_))));

    let ghost = admin::set_role(&db_pool, &root, uuid::Uuid::now_v7(), AdminRole::Admin).await;
    assert!(matches!(ghost, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn admins_moderate_content() {
    let db_pool = common::pool().await;
    let events = ChamberEvents::new(16);
    let root = common::super_admin(&db_pool, "root").await;
    let ada = common::user(&db_pool, "ada").await;
    let bob = common::user(&db_pool, "bob").await;

    let whisper = whispers::send_whisper(&db_pool, &ada, NewWhisper::text(bob.id, "something rude")).await.unwrap();
    let denied = admin::delete_whisper_as_admin(&db_pool, &bob, whisper.id).await;
    assert!(matches!(denied, Err(AppError::Forbidden(_))));
    admin::delete_whisper_as_admin(&db_pool, &root, whisper.id).await.unwrap();
    assert!(whispers::get(&db_pool, whisper.id).await.unwrap().is_none());

    let chamber = chambers::create_chamber(&db_pool, &ada, NewChamber::named("Rowdy room")).await.unwrap();
    let message = chambers::send_message(&db_pool, &events, ada.id, chamber.id, "spam spam", None).await.unwrap();
    admin::delete_chamber_message_as_admin(&db_pool, &events, &root, message.id).await.unwrap();
    assert!(chambers::get_message(&db_pool, message.id).await.unwrap().is_none());

    chambers::delete_chamber(&db_pool, &events, &root, chamber.id).await.unwrap();
}

#[tokio::test]
async fn flags_are_admin_only() {
    let db_pool = common::pool().await;
    let root = common::super_admin(&db_pool, "root").await;
    let ada = common::user(&db_pool, "ada").await;

    assert!(flags::is_enabled(&db_pool, flags::VOICE_MESSAGES).await.unwrap());
    assert!(!flags::is_enabled(&db_pool, "no_such_flag").await.unwrap());

    let denied = flags::set_flag(&db_pool, &ada, flags::VOICE_MESSAGES, false, None).await;
    assert!(matches!(denied, Err(AppError::Forbidden(_))));

    let flag = flags::set_flag(&db_pool, &root, flags::VOICE_MESSAGES, false, None).await.unwrap();
    assert!(!flag.enabled);
    assert!(!flag.description.is_empty());
    assert!(matches!(
        flags::require_enabled(&db_pool, flags::VOICE_MESSAGES).await,
        Err(AppError::Forbidden(_))
    ));
}
