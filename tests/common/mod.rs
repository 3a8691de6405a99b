#![allow(dead_code)]

use echoinwhispr::{
    db,
    users::{self, IdentityProfile, User},
};
use sqlx::SqlitePool;

pub async fn pool() -> SqlitePool {
    db::connect_in_memory().await.unwrap()
}

/// A fresh user whose username is `name`.
pub async fn user(db_pool: &SqlitePool, name: &str) -> User {
    let profile = IdentityProfile {
        username: Some(name.to_owned()),
        display_name: Some(format!("{name} display")),
    };
    users::upsert_from_identity(db_pool, &format!("test|{name}"), &profile, false)
        .await
        .unwrap()
}

pub async fn super_admin(db_pool: &SqlitePool, name: &str) -> User {
    let profile = IdentityProfile {
        username: Some(name.to_owned()),
        display_name: None,
    };
    users::upsert_from_identity(db_pool, &format!("test|{name}"), &profile, true)
        .await
        .unwrap()
}
