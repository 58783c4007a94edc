// src/handlers/participant.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    error::AppError,
    models::participant::{JoinRequest, SubmitAnswerRequest},
    services::SessionController,
    utils::jwt::MaybeClaims,
};

/// Resolves a join code to the quiz behind it.
pub async fn lookup_join_code(
    State(session): State<SessionController>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(session.lookup_join_code(&code).await?))
}

/// Joins a quiz by code.
///
/// Returns 201 for a new participant and 200 with the existing record when
/// the same identity (or anonymous display name) joins again.
pub async fn join_quiz(
    State(session): State<SessionController>,
    Extension(MaybeClaims(claims)): Extension<MaybeClaims>,
    Json(req): Json<JoinRequest>,
) -> Result<impl IntoResponse, AppError> {
    let admission = session.join(req, claims.as_ref()).await?;
    let status = if admission.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(admission.participant)))
}

/// Removes a participant. Token holders can only remove themselves.
pub async fn leave_quiz(
    State(session): State<SessionController>,
    Extension(MaybeClaims(claims)): Extension<MaybeClaims>,
    Path((quiz_id, participant_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    session
        .leave(&quiz_id, &participant_id, claims.as_ref())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Submits an answer. Repeats for the same question return the first award.
pub async fn submit_answer(
    State(session): State<SessionController>,
    Extension(MaybeClaims(claims)): Extension<MaybeClaims>,
    Path(quiz_id): Path<String>,
    Json(req): Json<SubmitAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(
        session
            .submit_answer(&quiz_id, req, claims.as_ref())
            .await?,
    ))
}

/// The question on screen, or `null` before the first push.
pub async fn current_question(
    State(session): State<SessionController>,
    Path(quiz_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(session.current_question(&quiz_id).await?))
}

pub async fn leaderboard(
    State(session): State<SessionController>,
    Path(quiz_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(session.leaderboard(&quiz_id).await?))
}
