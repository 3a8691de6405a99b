mod common;

use echoinwhispr::{
    chambers::{self, ChamberEvent, ChamberEvents, ChamberFeed, NewChamber, OutboundEvent},
    flags,
    pagination::PageRequest,
    AppError,
};
use std::time::Duration;
use tokio::time::timeout;

const FEED_WAIT: Duration = Duration::from_secs(2);

async fn next_event(feed: &mut ChamberFeed) -> Option<OutboundEvent> {
    timeout(FEED_WAIT, feed.next()).await.unwrap().unwrap()
}

#[tokio::test]
async fn creator_joins_with_a_code_others_can_use() {
    let db_pool = common::pool().await;
    let events = ChamberEvents::new(16);
    let host = common::user(&db_pool, "host").await;
    let guest = common::user(&db_pool, "guest").await;

    let chamber = chambers::create_chamber(&db_pool, &host, NewChamber::named("Night owls")).await.unwrap();
    assert!(chamber.is_creator);
    assert_eq!(chamber.member_count, 1);
    let code = chamber.invite_code.clone().unwrap();
    assert_eq!(code.len(), 8);

    let outsider_view = chambers::get_chamber(&db_pool, guest.id, chamber.id).await;
    assert!(matches!(outsider_view, Err(AppError::Forbidden(_))));

    let joined = chambers::join_by_code(&db_pool, &events, guest.id, &code.to_lowercase()).await.unwrap();
    assert_eq!(joined.member_count, 2);
    assert!(joined.my_alias.is_some());
    assert_eq!(joined.invite_code.as_deref(), Some(code.as_str()));

    let again = chambers::join_by_code(&db_pool, &events, guest.id, &code).await.unwrap();
    assert_eq!(again.member_count, 2);
    assert_eq!(again.my_alias, joined.my_alias);

    let unknown = chambers::join_by_code(&db_pool, &events, guest.id, "ZZZZZZZZ").await;
    assert!(matches!(unknown, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn member_count_never_exceeds_the_cap() {
    let db_pool = common::pool().await;
    let events = ChamberEvents::new(64);
    let host = common::user(&db_pool, "host").await;

    let mut new = NewChamber::named("Tiny room");
    new.max_members = Some(3);
    let chamber = chambers::create_chamber(&db_pool, &host, new).await.unwrap();
    let code = chamber.invite_code.clone().unwrap();

    let mut guests = Vec::new();
    for i in 0..6 {
        guests.push(common::user(&db_pool, &format!("guest{i}")).await.id);
    }

    let handles: Vec<_> = guests
        .into_iter()
        .map(|guest| {
            let (db_pool, events, code) = (db_pool.clone(), events.clone(), code.clone());
            tokio::spawn(async move { chambers::join_by_code(&db_pool, &events, guest, &code).await })
        })
        .collect();

    let mut joined = 0;
    let mut full = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => joined += 1,
            Err(AppError::Conflict(_)) => full += 1,
            Err(other) => panic!("unexpected error {other}"),
        }
    }
    assert_eq!((joined, full), (2, 4));

    let after = chambers::get_chamber(&db_pool, host.id, chamber.id).await.unwrap();
    assert_eq!(after.member_count, 3);
    assert_eq!(chambers::list_members(&db_pool, host.id, chamber.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn member_limits_are_validated() {
    let db_pool = common::pool().await;
    let host = common::user(&db_pool, "host").await;

    for bad in [1, 101] {
        let mut new = NewChamber::named("Bad limits");
        new.max_members = Some(bad);
        let created = chambers::create_chamber(&db_pool, &host, new).await;
        assert!(matches!(created, Err(AppError::Invalid(_))));
    }
    let short = chambers::create_chamber(&db_pool, &host, NewChamber::named("ab")).await;
    assert!(matches!(short, Err(AppError::Invalid(_))));
}

#[tokio::test]
async fn chambers_follow_their_flag() {
    let db_pool = common::pool().await;
    let admin = common::super_admin(&db_pool, "root").await;
    flags::set_flag(&db_pool, &admin, flags::ECHO_CHAMBERS, false, None).await.unwrap();

    let created = chambers::create_chamber(&db_pool, &admin, NewChamber::named("Closed club")).await;
    assert!(matches!(created, Err(AppError::Forbidden(_))));
}

#[tokio::test]
async fn members_see_aliases_only() {
    let db_pool = common::pool().await;
    let events = ChamberEvents::new(16);
    let host = common::user(&db_pool, "host").await;
    let guest = common::user(&db_pool, "guest").await;
    let chamber = chambers::create_chamber(&db_pool, &host, NewChamber::named("Masks on")).await.unwrap();
    chambers::join_by_code(&db_pool, &events, guest.id, chamber.invite_code.as_deref().unwrap())
        .await
        .unwrap();

    let members = chambers::list_members(&db_pool, guest.id, chamber.id).await.unwrap();
    assert_eq!(members.len(), 2);
    assert_eq!(members.iter().filter(|m| m.is_me).count(), 1);
    let json = serde_json::to_string(&members).unwrap();
    assert!(!json.contains(&host.id.to_string()));
    assert!(!json.contains("host"));
}

#[tokio::test]
async fn messages_reactions_and_live_events() {
    let db_pool = common::pool().await;
    let events = ChamberEvents::new(16);
    let host = common::user(&db_pool, "host").await;
    let guest = common::user(&db_pool, "guest").await;
    let chamber = chambers::create_chamber(&db_pool, &host, NewChamber::named("Loud room")).await.unwrap();
    chambers::join_by_code(&db_pool, &events, guest.id, chamber.invite_code.as_deref().unwrap())
        .await
        .unwrap();

    let mut rx = events.subscribe();
    let sent = chambers::send_message(&db_pool, &events, host.id, chamber.id, "hello all", None).await.unwrap();
    assert!(sent.is_mine);

    let event = rx.recv().await.unwrap();
    assert_eq!(event.chamber_id(), chamber.id);
    match event.render(guest.id) {
        OutboundEvent::Message { message } => {
            assert_eq!(message.content, "hello all");
            assert!(!message.is_mine);
        }
        other => panic!("unexpected event {other:?}"),
    }

    let reacted = chambers::toggle_reaction(&db_pool, &events, guest.id, sent.id, "🔥").await.unwrap();
    assert_eq!(reacted.reactions[0].count, 1);
    assert!(reacted.reactions[0].reacted_by_me);
    chambers::toggle_reaction(&db_pool, &events, host.id, sent.id, "🔥").await.unwrap();
    let undone = chambers::toggle_reaction(&db_pool, &events, guest.id, sent.id, "🔥").await.unwrap();
    assert_eq!(undone.reactions[0].count, 1);
    assert!(!undone.reactions[0].reacted_by_me);
    assert!(matches!(rx.recv().await.unwrap(), ChamberEvent::Reaction(_)));

    let page = chambers::list_messages(&db_pool, guest.id, chamber.id, &PageRequest::first(10)).await.unwrap();
    assert_eq!(page.page.len(), 1);
    assert!(page.is_done);

    let outsider = common::user(&db_pool, "outsider").await;
    let intrusion = chambers::send_message(&db_pool, &events, outsider.id, chamber.id, "hi", None).await;
    assert!(matches!(intrusion, Err(AppError::Forbidden(_))));
}

#[tokio::test]
async fn typing_is_visible_to_others_only() {
    let db_pool = common::pool().await;
    let events = ChamberEvents::new(16);
    let host = common::user(&db_pool, "host").await;
    let guest = common::user(&db_pool, "guest").await;
    let chamber = chambers::create_chamber(&db_pool, &host, NewChamber::named("Quiet room")).await.unwrap();
    chambers::join_by_code(&db_pool, &events, guest.id, chamber.invite_code.as_deref().unwrap())
        .await
        .unwrap();

    chambers::set_typing(&db_pool, &events, guest.id, chamber.id, true).await.unwrap();
    assert_eq!(chambers::list_typing(&db_pool, host.id, chamber.id).await.unwrap().len(), 1);
    assert!(chambers::list_typing(&db_pool, guest.id, chamber.id).await.unwrap().is_empty());

    chambers::send_message(&db_pool, &events, guest.id, chamber.id, "done typing", None).await.unwrap();
    assert!(chambers::list_typing(&db_pool, host.id, chamber.id).await.unwrap().is_empty());

    chambers::set_typing(&db_pool, &events, guest.id, chamber.id, true).await.unwrap();
    chambers::clear_typing(&db_pool, &events, guest.id, chamber.id).await.unwrap();
    assert!(chambers::list_typing(&db_pool, host.id, chamber.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn leaving_deleting_and_new_codes() {
    let db_pool = common::pool().await;
    let events = ChamberEvents::new(16);
    let host = common::user(&db_pool, "host").await;
    let guest = common::user(&db_pool, "guest").await;
    let chamber = chambers::create_chamber(&db_pool, &host, NewChamber::named("Short lived")).await.unwrap();
    let old_code = chamber.invite_code.clone().unwrap();
    chambers::join_by_code(&db_pool, &events, guest.id, &old_code).await.unwrap();

    let creator_leaves = chambers::leave_chamber(&db_pool, &events, host.id, chamber.id).await;
    assert!(matches!(creator_leaves, Err(AppError::Conflict(_))));
    chambers::leave_chamber(&db_pool, &events, guest.id, chamber.id).await.unwrap();
    assert_eq!(chambers::get_chamber(&db_pool, host.id, chamber.id).await.unwrap().member_count, 1);

    let not_creator = chambers::regenerate_invite_code(&db_pool, guest.id, chamber.id).await;
    assert!(matches!(not_creator, Err(AppError::Forbidden(_))));
    let renewed = chambers::regenerate_invite_code(&db_pool, host.id, chamber.id).await.unwrap();
    assert_ne!(renewed.invite_code.as_deref(), Some(old_code.as_str()));

    let denied = chambers::delete_chamber(&db_pool, &events, &guest, chamber.id).await;
    assert!(matches!(denied, Err(AppError::Forbidden(_))));
    chambers::delete_chamber(&db_pool, &events, &host, chamber.id).await.unwrap();
    assert!(chambers::get(&db_pool, chamber.id).await.unwrap().is_none());
}

#[tokio::test]
async fn public_chambers_are_listed_and_joinable() {
    let db_pool = common::pool().await;
    let events = ChamberEvents::new(16);
    let host = common::user(&db_pool, "host").await;
    let guest = common::user(&db_pool, "guest").await;

    let mut open = NewChamber::named("Open mic");
    open.is_public = true;
    let public = chambers::create_chamber(&db_pool, &host, open).await.unwrap();
    let private = chambers::create_chamber(&db_pool, &host, NewChamber::named("Back room")).await.unwrap();

    let listed = chambers::list_public_chambers(&db_pool, guest.id, &PageRequest::first(10)).await.unwrap();
    assert_eq!(listed.page.len(), 1);
    assert_eq!(listed.page[0].id, public.id);
    assert_eq!(listed.page[0].invite_code, None);

    let joined = chambers::join_public(&db_pool, &events, guest.id, public.id).await.unwrap();
    assert!(joined.is_member);
    let refused = chambers::join_public(&db_pool, &events, guest.id, private.id).await;
    assert!(matches!(refused, Err(AppError::Forbidden(_))));

    assert_eq!(chambers::list_my_chambers(&db_pool, guest.id).await.unwrap().len(), 1);
    assert_eq!(chambers::list_my_chambers(&db_pool, host.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn feed_is_for_members_and_stops_after_leaving() {
    let db_pool = common::pool().await;
    let events = ChamberEvents::new(16);
    let host = common::user(&db_pool, "host").await;
    let guest = common::user(&db_pool, "guest").await;
    let outsider = common::user(&db_pool, "outsider").await;
    let chamber = chambers::create_chamber(&db_pool, &host, NewChamber::named("Open mic")).await.unwrap();
    let other = chambers::create_chamber(&db_pool, &host, NewChamber::named("Next door")).await.unwrap();
    chambers::join_by_code(&db_pool, &events, guest.id, chamber.invite_code.as_deref().unwrap())
        .await
        .unwrap();

    let refused = ChamberFeed::open(&db_pool, &events, chamber.id, outsider.id).await;
    assert!(matches!(refused, Err(AppError::Forbidden(_))));

    let mut feed = ChamberFeed::open(&db_pool, &events, chamber.id, guest.id).await.unwrap();
    chambers::send_message(&db_pool, &events, host.id, other.id, "elsewhere", None).await.unwrap();
    chambers::send_message(&db_pool, &events, host.id, chamber.id, "welcome", None).await.unwrap();
    match next_event(&mut feed).await {
        Some(OutboundEvent::Message { message }) => {
            assert_eq!(message.content, "welcome");
            assert!(!message.is_mine);
        }
        other => panic!("unexpected event {other:?}"),
    }

    chambers::leave_chamber(&db_pool, &events, guest.id, chamber.id).await.unwrap();
    chambers::send_message(&db_pool, &events, host.id, chamber.id, "after you left", None).await.unwrap();
    chambers::set_typing(&db_pool, &events, host.id, chamber.id, true).await.unwrap();

    assert!(next_event(&mut feed).await.is_none());
    assert!(next_event(&mut feed).await.is_none());
}

#[tokio::test]
async fn feed_ends_when_the_chamber_is_deleted() {
    let db_pool = common::pool().await;
    let events = ChamberEvents::new(16);
    let host = common::user(&db_pool, "host").await;
    let guest = common::user(&db_pool, "guest").await;
    let chamber = chambers::create_chamber(&db_pool, &host, NewChamber::named("Last call")).await.unwrap();
    chambers::join_by_code(&db_pool, &events, guest.id, chamber.invite_code.as_deref().unwrap())
        .await
        .unwrap();

    let mut feed = ChamberFeed::open(&db_pool, &events, chamber.id, guest.id).await.unwrap();
    chambers::delete_chamber(&db_pool, &events, &host, chamber.id).await.unwrap();

    assert!(matches!(next_event(&mut feed).await, Some(OutboundEvent::Deleted)));
    assert!(next_event(&mut feed).await.is_none());
}

#[tokio::test]
async fn chamber_messages_are_rate_limited() {
    let db_pool = common::pool().await;
    let events = ChamberEvents::new(128);
    let host = common::user(&db_pool, "host").await;
    let chamber = chambers::create_chamber(&db_pool, &host, NewChamber::named("Chatty")).await.unwrap();

    for n in 0..30 {
        chambers::send_message(&db_pool, &events, host.id, chamber.id, &format!("message {n}"), None)
            .await
            .unwrap();
    }
    // a window boundary can fall inside the burst, so allow one refill
    let mut limited = false;
    for n in 30..61 {
        if let Err(e) = chambers::send_message(&db_pool, &events, host.id, chamber.id, &format!("message {n}"), None).await {
            assert!(matches!(e, AppError::RateLimited));
            limited = true;
            break;
        }
    }
    assert!(limited);
}
