use axum::{
    debug_handler,
    extract::{ws::Message, Path, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use sqlx::SqlitePool;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{auth::CurrentUser, AppResult};

use super::{ChamberEvent, ChamberEvents, OutboundEvent};

/// One member's stream of a chamber's events, rendered for that member.
///
/// Ends after the chamber's `Deleted` event, or as soon as the viewer is no
/// longer a member (left, or their account was removed).
pub struct ChamberFeed {
    db_pool: SqlitePool,
    rx: broadcast::Receiver<ChamberEvent>,
    chamber_id: Uuid,
    viewer: Uuid,
    done: bool,
}

impl ChamberFeed {
    pub async fn open(db_pool: &SqlitePool, events: &ChamberEvents, chamber_id: Uuid, viewer: Uuid) -> AppResult<Self> {
        let rx = events.subscribe();
        super::require_member(db_pool, chamber_id, viewer).await?;
        Ok(Self {
            db_pool: db_pool.clone(),
            rx,
            chamber_id,
            viewer,
            done: false,
        })
    }

    /// The next event for the viewer, or `None` once the feed has ended.
    pub async fn next(&mut self) -> AppResult<Option<OutboundEvent>> {
        while !self.done {
            let event = match self.rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("chamber {} feed for {} skipped {skipped} events", self.chamber_id, self.viewer);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            if event.chamber_id() != self.chamber_id {
                continue;
            }

            if matches!(event, ChamberEvent::Deleted { .. }) {
                self.done = true;
                return Ok(Some(event.render(self.viewer)));
            }
            if super::membership(&self.db_pool, self.chamber_id, self.viewer).await?.is_none() {
                debug!("{} is no longer in chamber {}, ending feed", self.viewer, self.chamber_id);
                break;
            }
            return Ok(Some(event.render(self.viewer)));
        }
        self.done = true;
        Ok(None)
    }
}

#[derive(Deserialize)]
struct InboundFrame {
    content: String,
}

/// Live feed of one chamber. Members only; frames `{"content": ...}` post a message.
#[debug_handler(state = crate::AppState)]
pub async fn ws(
    Path(chamber_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    State(events): State<ChamberEvents>,
    CurrentUser(user): CurrentUser,

    ws: WebSocketUpgrade,
) -> AppResult<impl IntoResponse> {
    let mut feed = ChamberFeed::open(&db_pool, &events, chamber_id, user.id).await?;
    let user_id = user.id;

    Ok(ws.on_upgrade(move |stream| async move {
        let (mut sender, mut receiver) = stream.split();

        let mut broadcast_task = tokio::spawn(async move {
            loop {
                let event = match feed.next().await {
                    Ok(Some(event)) => event,
                    Ok(None) => break,
                    Err(err) => {
                        warn!("chamber {chamber_id} feed for {user_id} failed: {err}");
                        break;
                    }
                };

                let Ok(text) = serde_json::to_string(&event) else {
                    continue;
                };
                if sender.send(Message::text(text)).await.is_err() {
                    return;
                }
            }
            let _ = sender.close().await;
        });

        loop {
            tokio::select! {
                _ = &mut broadcast_task => break,
                frame = receiver.next() => {
                    let Some(Ok(frame)) = frame else { break };
                    let Message::Text(text) = frame else { continue };
                    let Ok(InboundFrame { content }) = serde_json::from_str(text.as_str()) else {
                        continue;
                    };

                    if let Err(err) = super::send_message(&db_pool, &events, user_id, chamber_id, &content, None).await {
                        debug!("ws message from {user_id} to {chamber_id} rejected: {err}");
                    }
                }
            }
        }

        broadcast_task.abort();
    }))
}
