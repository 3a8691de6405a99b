//! Background jobs: the minutely whisper sweep and the nightly cleanup.

use std::time::Duration;

use chrono::{DateTime, Days, NaiveTime, Utc};
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::{chambers, db::now_ms, files, rate_limit, whispers, AppResult};

pub const WHISPER_INTERVAL: Duration = Duration::from_secs(60);
/// Hour of day (UTC) the cleanup job runs.
pub const CLEANUP_HOUR: u32 = 3;

/// The first `hour`:00 UTC strictly after `now`.
pub fn next_daily_run(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let at = NaiveTime::from_hms_opt(hour % 24, 0, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today.checked_add_days(Days::new(1)).unwrap_or(today)
    }
}

pub async fn run_whisper_job(db_pool: &SqlitePool) -> AppResult<()> {
    let now = now_ms();
    let expired = whispers::process_whispers(db_pool, now).await?;
    let typing = chambers::cleanup_typing(db_pool, now).await?;
    if expired > 0 {
        info!("swept {expired} expired whispers");
    }
    debug!("cleared {typing} stale typing indicators");
    Ok(())
}

pub async fn run_cleanup_job(db_pool: &SqlitePool) -> AppResult<()> {
    let now = now_ms();
    let windows = rate_limit::cleanup(db_pool, now).await?;
    let tokens = files::cleanup_expired_tokens(db_pool, now).await?;
    let typing = chambers::cleanup_typing(db_pool, now).await?;
    info!("daily cleanup removed {windows} rate-limit windows, {tokens} upload tokens and {typing} typing indicators");
    Ok(())
}

/// Spawns both jobs on the current runtime.
pub fn spawn(db_pool: SqlitePool) -> (JoinHandle<()>, JoinHandle<()>) {
    let whisper_pool = db_pool.clone();
    let whispers = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(WHISPER_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = run_whisper_job(&whisper_pool).await {
                error!("whisper job failed: {err}");
            }
        }
    });

    let cleanup = tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let next = next_daily_run(now, CLEANUP_HOUR);
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            debug!("next cleanup at {next}");
            tokio::time::sleep(wait).await;

            if let Err(err) = run_cleanup_job(&db_pool).await {
                error!("cleanup job failed: {err}");
            }
        }
    });

    (whispers, cleanup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn next_run_is_later_today_or_tomorrow() {
        let early = Utc.with_ymd_and_hms(2024, 5, 1, 1, 30, 0).unwrap();
        assert_eq!(next_daily_run(early, 3), Utc.with_ymd_and_hms(2024, 5, 1, 3, 0, 0).unwrap());

        let late = Utc.with_ymd_and_hms(2024, 5, 1, 3, 0, 0).unwrap();
        assert_eq!(next_daily_run(late, 3), Utc.with_ymd_and_hms(2024, 5, 2, 3, 0, 0).unwrap());

        let new_year = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(next_daily_run(new_year, 3), Utc.with_ymd_and_hms(2025, 1, 1, 3, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn jobs_run_against_an_empty_database() {
        let db_pool = crate::db::connect_in_memory().await.unwrap();
        run_whisper_job(&db_pool).await.unwrap();
        run_cleanup_job(&db_pool).await.unwrap();
    }
}
