// src/handlers/live.rs

use axum::{
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use tokio::sync::broadcast::{Receiver, error::RecvError};

use crate::{
    broadcast::{RoomHub, RoomMessage},
    error::AppError,
    models::quiz::QuizStatus,
    services::SessionController,
};

/// Upgrades to a WebSocket subscribed to the quiz's room.
///
/// Each event arrives as a text frame `{"event": "...", "payload": {...}}`.
/// The subscription is taken before the status check, so an `end` racing
/// this request either is seen by the check or closes the new subscription.
pub async fn live_room(
    ws: WebSocketUpgrade,
    State(session): State<SessionController>,
    State(hub): State<RoomHub>,
    Path(quiz_id): Path<String>,
) -> Result<Response, AppError> {
    let rx = hub.subscribe(&quiz_id).await;

    let status = match session.quiz_status(&quiz_id).await {
        Ok(status) => status,
        Err(e) => {
            drop(rx);
            hub.prune(&quiz_id).await;
            return Err(e);
        }
    };
    if status == QuizStatus::Ended {
        drop(rx);
        hub.prune(&quiz_id).await;
        return Err(AppError::QuizEnded);
    }

    Ok(ws.on_upgrade(move |socket| forward_room(socket, hub, quiz_id, rx)))
}

async fn forward_room(
    mut socket: WebSocket,
    hub: RoomHub,
    quiz_id: String,
    mut rx: Receiver<RoomMessage>,
) {
    tracing::debug!("Live subscriber connected to {}", quiz_id);

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(message) => {
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!("Failed to encode room message: {:?}", e);
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Live subscriber of {} lagged, skipped {} events", quiz_id, skipped);
                }
                Err(RecvError::Closed) => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Clients only listen; anything else they send is ignored
                Some(Ok(_)) => {}
            },
        }
    }

    drop(rx);
    hub.prune(&quiz_id).await;
    tracing::debug!("Live subscriber left {}", quiz_id);
}
