// src/handlers/quiz.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    error::AppError, models::quiz::QuizDraftRequest, services::SessionController,
    utils::jwt::Claims,
};

/// Creates a quiz in draft. The caller becomes its owner.
pub async fn create_quiz(
    State(session): State<SessionController>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<QuizDraftRequest>,
) -> Result<impl IntoResponse, AppError> {
    let quiz = session.create_quiz(&claims, req).await?;
    Ok((StatusCode::CREATED, Json(quiz)))
}

/// Lists the caller's quizzes, newest first.
pub async fn list_quizzes(
    State(session): State<SessionController>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(session.list_quizzes(&claims).await?))
}

/// Owner view, including correct answers.
pub async fn get_quiz(
    State(session): State<SessionController>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(session.get_quiz(&quiz_id, &claims).await?))
}

/// Replaces title, description and questions of a draft.
pub async fn update_quiz(
    State(session): State<SessionController>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<String>,
    Json(req): Json<QuizDraftRequest>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(session.update_draft(&quiz_id, &claims, req).await?))
}

pub async fn delete_quiz(
    State(session): State<SessionController>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    session.delete_quiz(&quiz_id, &claims).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn publish_quiz(
    State(session): State<SessionController>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(session.publish(&quiz_id, &claims).await?))
}

pub async fn start_quiz(
    State(session): State<SessionController>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(session.start(&quiz_id, &claims).await?))
}

/// Pushes the question at `index` to every participant.
pub async fn push_question(
    State(session): State<SessionController>,
    Extension(claims): Extension<Claims>,
    Path((quiz_id, index)): Path<(String, usize)>,
) -> Result<impl IntoResponse, AppError> {
    let question = session.push_question(&quiz_id, &claims, index).await?;
    Ok(Json(serde_json::json!({
        "index": index,
        "question": question,
    })))
}

pub async fn end_quiz(
    State(session): State<SessionController>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(session.end(&quiz_id, &claims).await?))
}

pub async fn list_participants(
    State(session): State<SessionController>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(session.list_participants(&quiz_id, &claims).await?))
}

pub async fn clear_participants(
    State(session): State<SessionController>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let removed = session.clear_participants(&quiz_id, &claims).await?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

/// Per-option tally for one question.
pub async fn question_votes(
    State(session): State<SessionController>,
    Extension(claims): Extension<Claims>,
    Path((quiz_id, question_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(session.votes(&quiz_id, &claims, &question_id).await?))
}
