use std::sync::Arc;

use crate::{broadcast::RoomHub, config::Config, services::SessionController};
use axum::extract::FromRef;

#[derive(Clone)]
pub struct AppState {
    pub session: SessionController,
    pub hub: RoomHub,
    pub config: Config,
}

impl AppState {
    /// State backed by the in-memory store, broadcasting through a fresh hub.
    pub fn in_memory(config: Config) -> Self {
        let hub = RoomHub::new(config.room_channel_capacity);
        let session = SessionController::in_memory(Arc::new(hub.clone()), config.id_generation_attempts);
        Self {
            session,
            hub,
            config,
        }
    }
}

impl FromRef<AppState> for SessionController {
    fn from_ref(state: &AppState) -> Self {
        state.session.clone()
    }
}

impl FromRef<AppState> for RoomHub {
    fn from_ref(state: &AppState) -> Self {
        state.hub.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
