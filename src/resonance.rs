//! Resonance matching: point a user at a stranger in a similar place in life.

use axum::{debug_handler, extract::State, Json};
use rand::{seq::IndexedRandom, Rng};
use serde::Serialize;
use sqlx::{types::Json as SqlJson, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::{auth::CurrentUser, flags, users::User, AppResult};

const MOOD_WEIGHT: u32 = 3;
const LIFE_PHASE_WEIGHT: u32 = 2;
const CAREER_WEIGHT: u32 = 1;
const INTEREST_WEIGHT: u32 = 1;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Candidate {
    pub id: Uuid,
    pub career: Option<String>,
    pub mood: Option<String>,
    pub life_phase: Option<String>,
    pub interests: SqlJson<Vec<String>>,
}

/// Enough to send a whisper, not enough to know who it is.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResonanceMatch {
    pub user_id: Uuid,
    pub score: u32,
    pub shared_interests: Vec<String>,
    pub mood: Option<String>,
    pub life_phase: Option<String>,
}

fn same(a: &Option<String>, b: &Option<String>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => !a.trim().is_empty() && a.trim().eq_ignore_ascii_case(b.trim()),
        _ => false,
    }
}

pub fn score(me: &User, candidate: &Candidate) -> ResonanceMatch {
    let shared_interests: Vec<String> = candidate
        .interests
        .iter()
        .filter(|theirs| me.interests.iter().any(|mine| mine.eq_ignore_ascii_case(theirs)))
        .cloned()
        .collect();

    let mut score = INTEREST_WEIGHT * shared_interests.len() as u32;
    if same(&me.mood, &candidate.mood) {
        score += MOOD_WEIGHT;
    }
    if same(&me.life_phase, &candidate.life_phase) {
        score += LIFE_PHASE_WEIGHT;
    }
    if same(&me.career, &candidate.career) {
        score += CAREER_WEIGHT;
    }

    ResonanceMatch {
        user_id: candidate.id,
        score,
        shared_interests,
        mood: candidate.mood.clone(),
        life_phase: candidate.life_phase.clone(),
    }
}

/// A random pick among the highest non-zero scores.
pub fn pick_best<R: Rng + ?Sized>(scored: Vec<ResonanceMatch>, rng: &mut R) -> Option<ResonanceMatch> {
    let best = scored.iter().map(|m| m.score).max().filter(|&s| s > 0)?;
    let top: Vec<ResonanceMatch> = scored.into_iter().filter(|m| m.score == best).collect();
    top.choose(rng).cloned()
}

/// Opted-in users other than `me` who are neither friends nor blocked with them.
async fn candidates(db_pool: &SqlitePool, me: Uuid) -> AppResult<Vec<Candidate>> {
    Ok(sqlx::query_as(
        "SELECT u.id,u.career,u.mood,u.life_phase,u.interests FROM users u
         WHERE u.resonance_opt_in=1 AND u.id != ?
           AND NOT EXISTS (
             SELECT 1 FROM friendships f
             WHERE f.status IN ('accepted','blocked')
               AND ((f.requester_id=? AND f.recipient_id=u.id) OR (f.recipient_id=? AND f.requester_id=u.id))
           )",
    )
    .bind(me)
    .bind(me)
    .bind(me)
    .fetch_all(db_pool)
    .await?)
}

pub async fn find_match(db_pool: &SqlitePool, me: &User) -> AppResult<Option<ResonanceMatch>> {
    flags::require_enabled(db_pool, flags::RESONANCE_MATCHING).await?;

    let scored: Vec<ResonanceMatch> = candidates(db_pool, me.id)
        .await?
        .iter()
        .map(|candidate| score(me, candidate))
        .collect();
    debug!("scored {} resonance candidates for {}", scored.len(), me.id);

    Ok(pick_best(scored, &mut rand::rng()))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn find(State(db_pool): State<SqlitePool>, CurrentUser(user): CurrentUser) -> AppResult<Json<Option<ResonanceMatch>>> {
    Ok(Json(find_match(&db_pool, &user).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::AdminRole;

    fn me() -> User {
        User {
            id: Uuid::now_v7(),
            subject: "test|me".into(),
            username: None,
            display_name: None,
            career: Some("Engineer".into()),
            mood: Some("Hopeful".into()),
            life_phase: Some("Student".into()),
            interests: SqlJson(vec!["Music".into(), "Hiking".into()]),
            preferences: SqlJson(serde_json::json!({})),
            resonance_opt_in: true,
            role: AdminRole::None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn candidate(mood: Option<&str>, life_phase: Option<&str>, career: Option<&str>, interests: &[&str]) -> Candidate {
        Candidate {
            id: Uuid::now_v7(),
            career: career.map(Into::into),
            mood: mood.map(Into::into),
            life_phase: life_phase.map(Into::into),
            interests: SqlJson(interests.iter().map(|s| s.to_string()).collect()),
        }
    }

    #[test]
    fn weights_add_up() {
        let full = score(&me(), &candidate(Some("hopeful"), Some("Student"), Some("Engineer"), &["music", "hiking", "chess"]));
        assert_eq!(full.score, 3 + 2 + 1 + 2);
        assert_eq!(full.shared_interests, vec!["music", "hiking"]);

        let none = score(&me(), &candidate(Some("Tired"), None, None, &["chess"]));
        assert_eq!(none.score, 0);
    }

    #[test]
    fn zero_scores_never_match() {
        let scored = vec![score(&me(), &candidate(None, None, None, &[]))];
        assert_eq!(pick_best(scored, &mut rand::rng()), None);
    }

    #[test]
    fn best_score_wins() {
        let me = me();
        let good = score(&me, &candidate(Some("Hopeful"), None, None, &[]));
        let weak = score(&me, &candidate(None, None, Some("Engineer"), &[]));
        let winner = pick_best(vec![weak, good.clone()], &mut rand::rng()).unwrap();
        assert_eq!(winner.user_id, good.user_id);
    }
}
