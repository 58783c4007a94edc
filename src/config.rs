// src/config.rs

use std::env;
use dotenvy::dotenv;

/// Upper bound on the number of questions a quiz may hold.
pub const MAX_QUESTIONS_PER_QUIZ: u64 = 100;
pub const MIN_OPTIONS_PER_QUESTION: u64 = 2;
pub const MAX_OPTIONS_PER_QUESTION: u64 = 10;
pub const MIN_TIME_LIMIT_SECONDS: u32 = 5;
pub const MAX_TIME_LIMIT_SECONDS: u32 = 600;
pub const MIN_MAX_MARKS: u32 = 1;
pub const MAX_MAX_MARKS: u32 = 1000;

/// Owner-side transitions retry this many times when another request
/// committed a newer version of the quiz row in between.
pub const QUIZ_UPDATE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string. When absent the in-memory store is used.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub rust_log: String,
    pub port: u16,
    /// Bounded retries for id and join code generation.
    pub id_generation_attempts: u32,
    /// Per-room buffer of the broadcast hub.
    pub room_channel_capacity: usize,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());

        let jwt_secret = env::var("JWT_SECRET")
            .expect("JWT_SECRET must be set");

        let rust_log = env::var("RUST_LOG")
            .unwrap_or_else(|_| "info".to_string());

        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let id_generation_attempts = env::var("ID_GENERATION_ATTEMPTS")
            .ok()
            .and_then(|n| n.parse().ok())
            .unwrap_or(10);

        let room_channel_capacity = env::var("ROOM_CHANNEL_CAPACITY")
            .ok()
            .and_then(|n| n.parse().ok())
            .unwrap_or(256);

        Self {
            database_url,
            jwt_secret,
            rust_log,
            port,
            id_generation_attempts,
            room_channel_capacity,
        }
    }
}
