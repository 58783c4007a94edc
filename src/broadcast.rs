// src/broadcast.rs

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, broadcast};

use crate::models::{participant::VoteTally, quiz::PublicQuestion};

/// Events pushed to everyone watching a quiz's room.
///
/// Rooms are public, so payloads never carry participant ids.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum QuizEvent {
    ParticipantJoined {
        display_name: String,
        participant_count: u64,
    },
    ParticipantLeft {
        display_name: String,
        participant_count: u64,
    },
    ParticipantsCleared {
        removed: u64,
    },
    QuizStarted {
        started_at: DateTime<Utc>,
    },
    QuestionPushed {
        index: usize,
        question: PublicQuestion,
    },
    VotesUpdate(VoteTally),
    QuizEnded {
        ended_at: DateTime<Utc>,
    },
}

impl QuizEvent {
    /// Wire name clients dispatch on.
    pub fn name(&self) -> &'static str {
        match self {
            QuizEvent::ParticipantJoined { .. } => "participant:joined",
            QuizEvent::ParticipantLeft { .. } => "participant:left",
            QuizEvent::ParticipantsCleared { .. } => "participants:cleared",
            QuizEvent::QuizStarted { .. } => "quiz:started",
            QuizEvent::QuestionPushed { .. } => "question:pushed",
            QuizEvent::VotesUpdate(_) => "votes:update",
            QuizEvent::QuizEnded { .. } => "quiz:ended",
        }
    }
}

/// Frame delivered to room subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct RoomMessage {
    pub event: &'static str,
    pub payload: serde_json::Value,
}

impl From<QuizEvent> for RoomMessage {
    fn from(event: QuizEvent) -> Self {
        let name = event.name();
        let payload = serde_json::to_value(&event).unwrap_or_else(|e| {
            tracing::error!("Failed to encode {} payload: {:?}", name, e);
            serde_json::Value::Null
        });
        Self {
            event: name,
            payload,
        }
    }
}

/// Fan-out capability addressed by room name. Fire-and-forget: delivery
/// failures never surface to the operation that produced the event.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn publish(&self, room: &str, event: QuizEvent);

    /// Drops the room once nothing more will be published to it.
    async fn close_room(&self, _room: &str) {}
}

type Rooms = Arc<RwLock<HashMap<String, broadcast::Sender<RoomMessage>>>>;

/// In-process room hub: one broadcast channel per quiz room.
#[derive(Clone)]
pub struct RoomHub {
    rooms: Rooms,
    capacity: usize,
}

impl RoomHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Receiver for every message published to `room` from now on.
    pub async fn subscribe(&self, room: &str) -> broadcast::Receiver<RoomMessage> {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Drops the room's channel once its last subscriber is gone.
    /// Returns true when the room was removed.
    pub async fn prune(&self, room: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        let idle = rooms
            .get(room)
            .is_some_and(|tx| tx.receiver_count() == 0);
        if idle {
            rooms.remove(room);
            tracing::debug!("Pruned idle room {}", room);
        }
        idle
    }

    pub async fn subscriber_count(&self, room: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(room)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Broadcaster for RoomHub {
    async fn publish(&self, room: &str, event: QuizEvent) {
        let message = RoomMessage::from(event);
        let rooms = self.rooms.read().await;

        // No channel means nobody ever subscribed
        let Some(tx) = rooms.get(room) else {
            tracing::debug!("No subscribers for {} in room {}", message.event, room);
            return;
        };

        let event = message.event;
        match tx.send(message) {
            Ok(receivers) => tracing::debug!("Sent {} to {} subscribers of {}", event, receivers, room),
            Err(_) => tracing::debug!("Room {} has no live subscribers for {}", room, event),
        }
    }

    async fn close_room(&self, room: &str) {
        if self.rooms.write().await.remove(room).is_some() {
            tracing::debug!("Closed room {}", room);
        }
    }
}
