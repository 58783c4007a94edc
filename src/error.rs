// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use crate::models::quiz::QuizStatus;

/// Global Application Error Enum.
/// Centralizes error handling and mapping to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    // 500 Internal Server Error
    InternalServerError(String),

    // 400 Bad Request
    BadRequest(String),

    // 401 Unauthorized
    AuthError(String),

    // 403 Forbidden (not the quiz owner)
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict
    Conflict(String),

    /// A lifecycle operation was attempted from a state that does not allow it.
    /// The caller must resync its view of the quiz.
    InvalidTransition {
        attempted: &'static str,
        current: QuizStatus,
    },

    QuizEnded,
    QuizNotFound,
    ParticipantNotFound,
    QuestionNotFound,
    InvalidAnswer(String),

    /// The identity already holds a membership in another quiz that has not ended.
    AlreadyInActiveQuiz { quiz_id: String },

    /// Another quiz claimed the join code between generation and write.
    JoinCodeTaken,

    /// Every generated candidate collided with an existing id or join code.
    IdGenerationExhausted,
}

impl AppError {
    /// Stable machine-readable kind, sent alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InternalServerError(_) => "internal",
            AppError::BadRequest(_) => "bad_request",
            AppError::AuthError(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::QuizEnded => "quiz_ended",
            AppError::QuizNotFound => "quiz_not_found",
            AppError::ParticipantNotFound => "participant_not_found",
            AppError::QuestionNotFound => "question_not_found",
            AppError::InvalidAnswer(_) => "invalid_answer",
            AppError::AlreadyInActiveQuiz { .. } => "already_in_active_quiz",
            AppError::JoinCodeTaken => "join_code_taken",
            AppError::IdGenerationExhausted => "id_generation_exhausted",
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::InvalidTransition { attempted, current } => {
                write!(f, "cannot {} a quiz that is {}", attempted, current)
            }
            AppError::QuizEnded => write!(f, "quiz has ended"),
            AppError::QuizNotFound => write!(f, "quiz not found"),
            AppError::ParticipantNotFound => write!(f, "participant not found"),
            AppError::QuestionNotFound => write!(f, "question not found"),
            AppError::InvalidAnswer(msg) => write!(f, "invalid answer: {}", msg),
            AppError::AlreadyInActiveQuiz { quiz_id } => {
                write!(f, "already participating in active quiz {}", quiz_id)
            }
            AppError::JoinCodeTaken => write!(f, "join code is already in use"),
            AppError::IdGenerationExhausted => {
                write!(f, "could not generate a unique identifier, try again later")
            }
            AppError::InternalServerError(msg)
            | AppError::BadRequest(msg)
            | AppError::AuthError(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into a JSON response with appropriate HTTP status code.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let status = match &self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::BadRequest(_) | AppError::InvalidAnswer(_) => StatusCode::BAD_REQUEST,
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_)
            | AppError::QuizNotFound
            | AppError::ParticipantNotFound
            | AppError::QuestionNotFound => StatusCode::NOT_FOUND,
            AppError::Conflict(_)
            | AppError::JoinCodeTaken
            | AppError::InvalidTransition { .. }
            | AppError::AlreadyInActiveQuiz { .. } => StatusCode::CONFLICT,
            AppError::QuizEnded => StatusCode::GONE,
            AppError::IdGenerationExhausted => {
                tracing::error!("Identifier generation exhausted its retries");
                StatusCode::SERVICE_UNAVAILABLE
            }
        };

        let error_message = match &self {
            AppError::InternalServerError(_) => "Internal Server Error".to_string(),
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": error_message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

/// Converts `sqlx::Error` into `AppError::InternalServerError`.
/// Allows using `?` operator on database queries.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::BadRequest(err.to_string())
    }
}
