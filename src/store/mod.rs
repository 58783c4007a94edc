// src/store/mod.rs

//! Persistence collaborators of the session engine.
//!
//! Every invariant of a quiz or a participant is enforced inside a single row
//! update, so implementations only need per-row atomicity:
//!
//! * `QuizStore::update_quiz` is a compare-and-swap on the row version.
//! * `ParticipantStore::insert_participant_if_absent` is one conditional insert
//!   on the `(quiz_id, identity_key)` uniqueness key.
//! * `ParticipantStore::record_response` is one read-check-append on the
//!   participant row, scoped by question id.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::{
    error::AppError,
    models::{
        participant::{IdentityKey, Participant, QuestionResponse, RecordOutcome},
        quiz::Quiz,
    },
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Ordering for participant listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantSort {
    /// Arrival order.
    Joined,
    /// Score descending, earliest join first on ties.
    Score,
}

/// Outcome of a conditional participant insert.
#[derive(Debug, Clone)]
pub struct Admission {
    pub participant: Participant,
    /// False when an existing row for the same key was returned instead.
    pub created: bool,
}

#[async_trait]
pub trait QuizStore: Send + Sync {
    async fn insert_quiz(&self, quiz: &Quiz) -> Result<(), AppError>;

    async fn find_quiz_by_id(&self, quiz_id: &str) -> Result<Option<Quiz>, AppError>;

    async fn find_quiz_by_join_code(&self, join_code: &str) -> Result<Option<Quiz>, AppError>;

    /// Writes `quiz` only if the stored version still equals `quiz.version`,
    /// bumping it on success. Returns false when another write got there first,
    /// and `JoinCodeTaken` when another quiz already holds `quiz.join_code`.
    async fn update_quiz(&self, quiz: &Quiz) -> Result<bool, AppError>;

    /// Newest first.
    async fn list_quizzes_by_owner(&self, owner_id: &str) -> Result<Vec<Quiz>, AppError>;

    /// Removes the quiz and its participants.
    async fn delete_quiz(&self, quiz_id: &str) -> Result<bool, AppError>;
}

#[async_trait]
pub trait ParticipantStore: Send + Sync {
    async fn find_participant(
        &self,
        quiz_id: &str,
        identity: &IdentityKey,
    ) -> Result<Option<Participant>, AppError>;

    async fn find_participant_by_id(
        &self,
        participant_id: &str,
    ) -> Result<Option<Participant>, AppError>;

    /// The identity's most recently created participant row in any quiz.
    async fn latest_participant_for_identity(
        &self,
        identity_id: &str,
    ) -> Result<Option<Participant>, AppError>;

    /// Inserts unless a row with the same quiz and identity key exists, in
    /// which case that row is returned unchanged.
    async fn insert_participant_if_absent(
        &self,
        participant: Participant,
    ) -> Result<Admission, AppError>;

    /// Appends `response` unless the participant already answered that
    /// question. `None` when the participant does not exist.
    async fn record_response(
        &self,
        participant_id: &str,
        response: QuestionResponse,
    ) -> Result<Option<RecordOutcome>, AppError>;

    async fn delete_participant(
        &self,
        quiz_id: &str,
        participant_id: &str,
    ) -> Result<bool, AppError>;

    async fn count_participants(&self, quiz_id: &str) -> Result<u64, AppError>;

    async fn list_participants(
        &self,
        quiz_id: &str,
        sort: ParticipantSort,
    ) -> Result<Vec<Participant>, AppError>;

    /// Returns the number of rows removed.
    async fn clear_participants(&self, quiz_id: &str) -> Result<u64, AppError>;
}
