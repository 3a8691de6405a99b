//! Live chamber updates fanned out to WebSocket subscribers.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{ChamberMessage, ChamberMessageView};

#[derive(Debug, Clone)]
pub enum ChamberEvent {
    Message(ChamberMessage),
    Reaction(ChamberMessage),
    MessageDeleted { chamber_id: Uuid, message_id: Uuid },
    Typing { chamber_id: Uuid, alias: String, is_typing: bool },
    MemberJoined { chamber_id: Uuid, alias: String, color: String },
    MemberLeft { chamber_id: Uuid, alias: String },
    Deleted { chamber_id: Uuid },
}

/// What a subscriber receives; message views are rendered per viewer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    Message { message: ChamberMessageView },
    Reaction { message: ChamberMessageView },
    #[serde(rename_all = "camelCase")]
    MessageDeleted { message_id: Uuid },
    #[serde(rename_all = "camelCase")]
    Typing { alias: String, is_typing: bool },
    MemberJoined { alias: String, color: String },
    MemberLeft { alias: String },
    Deleted,
}

impl ChamberEvent {
    pub fn chamber_id(&self) -> Uuid {
        use ChamberEvent::*;
        match self {
            Message(m) | Reaction(m) => m.chamber_id,
            MessageDeleted { chamber_id, .. }
            | Typing { chamber_id, .. }
            | MemberJoined { chamber_id, .. }
            | MemberLeft { chamber_id, .. }
            | Deleted { chamber_id } => *chamber_id,
        }
    }

    pub fn render(&self, viewer: Uuid) -> OutboundEvent {
        match self {
            ChamberEvent::Message(m) => OutboundEvent::Message { message: m.view(viewer) },
            ChamberEvent::Reaction(m) => OutboundEvent::Reaction { message: m.view(viewer) },
            ChamberEvent::MessageDeleted { message_id, .. } => OutboundEvent::MessageDeleted { message_id: *message_id },
            ChamberEvent::Typing { alias, is_typing, .. } => OutboundEvent::Typing {
                alias: alias.clone(),
                is_typing: *is_typing,
            },
            ChamberEvent::MemberJoined { alias, color, .. } => OutboundEvent::MemberJoined {
                alias: alias.clone(),
                color: color.clone(),
            },
            ChamberEvent::MemberLeft { alias, .. } => OutboundEvent::MemberLeft { alias: alias.clone() },
            ChamberEvent::Deleted { .. } => OutboundEvent::Deleted,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChamberEvents {
    tx: broadcast::Sender<ChamberEvent>,
}

impl ChamberEvents {
    pub fn new(capacity: usize) -> Self {
        Self { tx: broadcast::channel(capacity).0 }
    }

    /// Nobody listening is fine.
    pub fn publish(&self, event: ChamberEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChamberEvent> {
        self.tx.subscribe()
    }
}
