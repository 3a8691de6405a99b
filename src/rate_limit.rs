//! Fixed-window request counters kept in the `rate_limits` table.

use std::time::Duration;

use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::{db::now_ms, AppError, AppResult};

#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub limit: i64,
    pub window: Duration,
}

pub const WHISPERS: RateLimit = RateLimit { limit: 30, window: Duration::from_secs(60 * 60) };
pub const CHAMBER_MESSAGES: RateLimit = RateLimit { limit: 30, window: Duration::from_secs(60) };
pub const FRIEND_REQUESTS: RateLimit = RateLimit { limit: 50, window: Duration::from_secs(24 * 60 * 60) };

/// Records are swept once their window started longer ago than this.
pub const RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

fn window_start(now: i64, window: Duration) -> i64 {
    let width = window.as_millis().max(1) as i64;
    now - now.rem_euclid(width)
}

/// Counts one hit against `key`, failing with `RateLimited` once the
/// window's limit is spent.
pub async fn check(db_pool: &SqlitePool, key: &str, rate: RateLimit) -> AppResult<()> {
    let start = window_start(now_ms(), rate.window);

    let (count,): (i64,) = sqlx::query_as(
        "INSERT INTO rate_limits (key,window_start,count) VALUES (?,?,1)
         ON CONFLICT(key,window_start) DO UPDATE SET count=count+1
         RETURNING count",
    )
    .bind(key)
    .bind(start)
    .fetch_one(db_pool)
    .await?;

    if count > rate.limit {
        warn!("rate limit hit for {key} ({count}/{})", rate.limit);
        return Err(AppError::RateLimited);
    }
    debug!("rate {key}: {count}/{}", rate.limit);
    Ok(())
}

/// Deletes windows that started before `now - RETENTION`.
pub async fn cleanup(db_pool: &SqlitePool, now: i64) -> AppResult<u64> {
    let cutoff = now - RETENTION.as_millis() as i64;
    let result = sqlx::query("DELETE FROM rate_limits WHERE window_start < ?")
        .bind(cutoff)
        .execute(db_pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_align_to_width() {
        let minute = Duration::from_secs(60);
        assert_eq!(window_start(125_000, minute), 120_000);
        assert_eq!(window_start(120_000, minute), 120_000);
    }
}
