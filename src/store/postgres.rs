// src/store/postgres.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, types::Json};

use super::{Admission, ParticipantSort, ParticipantStore, QuizStore};
use crate::{
    error::AppError,
    models::{
        participant::{IdentityKey, Participant, QuestionResponse, RecordOutcome},
        quiz::{Question, Quiz},
    },
};

/// Represents the 'quizzes' table in the database.
#[derive(Debug, FromRow)]
struct QuizRow {
    quiz_id: String,
    owner_id: String,
    title: String,
    description: Option<String>,
    status: String,
    join_code: Option<String>,
    /// Question list stored as a JSON array.
    questions: Json<Vec<Question>>,
    current_question_index: i32,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl TryFrom<QuizRow> for Quiz {
    type Error = AppError;

    fn try_from(row: QuizRow) -> Result<Self, Self::Error> {
        Ok(Quiz {
            quiz_id: row.quiz_id,
            owner_id: row.owner_id,
            title: row.title,
            description: row.description,
            status: row.status.parse()?,
            join_code: row.join_code,
            questions: row.questions.0,
            current_question_index: row.current_question_index,
            started_at: row.started_at,
            ended_at: row.ended_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        })
    }
}

/// Represents the 'participants' table in the database.
#[derive(Debug, FromRow)]
struct ParticipantRow {
    participant_id: String,
    quiz_id: String,
    join_code: String,
    display_name: String,
    identity_id: Option<String>,
    identity_key: String,
    total_score: f64,
    responses: Json<Vec<QuestionResponse>>,
    joined_at: DateTime<Utc>,
    last_answer_at: Option<DateTime<Utc>>,
    join_seq: i64,
}

impl From<ParticipantRow> for Participant {
    fn from(row: ParticipantRow) -> Self {
        Participant {
            participant_id: row.participant_id,
            quiz_id: row.quiz_id,
            join_code: row.join_code,
            display_name: row.display_name,
            identity_id: row.identity_id,
            identity_key: row.identity_key,
            total_score: row.total_score,
            responses: row.responses.0,
            joined_at: row.joined_at,
            last_answer_at: row.last_answer_at,
            join_seq: row.join_seq,
        }
    }
}

const QUIZ_COLUMNS: &str = "quiz_id, owner_id, title, description, status, join_code, questions, \
     current_question_index, started_at, ended_at, created_at, updated_at, version";

const PARTICIPANT_COLUMNS: &str = "participant_id, quiz_id, join_code, display_name, identity_id, \
     identity_key, total_score, responses, joined_at, last_answer_at, join_seq";

/// Postgres error code for unique violation is 23505
fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "23505")
}

/// PostgreSQL-backed store. Schema lives in `migrations/`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_quiz(&self, filter: &str, value: &str) -> Result<Option<Quiz>, AppError> {
        let sql = format!("SELECT {} FROM quizzes WHERE {} = $1", QUIZ_COLUMNS, filter);
        sqlx::query_as::<_, QuizRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to fetch quiz by {}: {:?}", filter, e);
                AppError::from(e)
            })?
            .map(Quiz::try_from)
            .transpose()
    }
}

#[async_trait]
impl QuizStore for PgStore {
    async fn insert_quiz(&self, quiz: &Quiz) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO quizzes (quiz_id, owner_id, title, description, status, join_code,
                questions, current_question_index, started_at, ended_at, created_at, updated_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(&quiz.quiz_id)
        .bind(&quiz.owner_id)
        .bind(&quiz.title)
        .bind(&quiz.description)
        .bind(quiz.status.as_str())
        .bind(&quiz.join_code)
        .bind(Json(&quiz.questions))
        .bind(quiz.current_question_index)
        .bind(quiz.started_at)
        .bind(quiz.ended_at)
        .bind(quiz.created_at)
        .bind(quiz.updated_at)
        .bind(quiz.version)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(format!("Quiz '{}' already exists", quiz.quiz_id))
            } else {
                tracing::error!("Failed to insert quiz: {:?}", e);
                AppError::from(e)
            }
        })?;

        Ok(())
    }

    async fn find_quiz_by_id(&self, quiz_id: &str) -> Result<Option<Quiz>, AppError> {
        self.fetch_quiz("quiz_id", quiz_id).await
    }

    async fn find_quiz_by_join_code(&self, join_code: &str) -> Result<Option<Quiz>, AppError> {
        self.fetch_quiz("join_code", join_code).await
    }

    async fn update_quiz(&self, quiz: &Quiz) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE quizzes SET
                title = $2,
                description = $3,
                status = $4,
                join_code = $5,
                questions = $6,
                current_question_index = $7,
                started_at = $8,
                ended_at = $9,
                updated_at = $10,
                version = version + 1
            WHERE quiz_id = $1 AND version = $11
            "#,
        )
        .bind(&quiz.quiz_id)
        .bind(&quiz.title)
        .bind(&quiz.description)
        .bind(quiz.status.as_str())
        .bind(&quiz.join_code)
        .bind(Json(&quiz.questions))
        .bind(quiz.current_question_index)
        .bind(quiz.started_at)
        .bind(quiz.ended_at)
        .bind(quiz.updated_at)
        .bind(quiz.version)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::JoinCodeTaken
            } else {
                tracing::error!("Failed to update quiz: {:?}", e);
                AppError::from(e)
            }
        })?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_quizzes_by_owner(&self, owner_id: &str) -> Result<Vec<Quiz>, AppError> {
        let sql = format!(
            "SELECT {} FROM quizzes WHERE owner_id = $1 ORDER BY created_at DESC",
            QUIZ_COLUMNS
        );
        sqlx::query_as::<_, QuizRow>(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Quiz::try_from)
            .collect()
    }

    async fn delete_quiz(&self, quiz_id: &str) -> Result<bool, AppError> {
        // participants cascade
        let result = sqlx::query("DELETE FROM quizzes WHERE quiz_id = $1")
            .bind(quiz_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl ParticipantStore for PgStore {
    async fn find_participant(
        &self,
        quiz_id: &str,
        identity: &IdentityKey,
    ) -> Result<Option<Participant>, AppError> {
        let sql = format!(
            "SELECT {} FROM participants WHERE quiz_id = $1 AND identity_key = $2",
            PARTICIPANT_COLUMNS
        );
        let row = sqlx::query_as::<_, ParticipantRow>(&sql)
            .bind(quiz_id)
            .bind(identity.as_key())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Participant::from))
    }

    async fn find_participant_by_id(
        &self,
        participant_id: &str,
    ) -> Result<Option<Participant>, AppError> {
        let sql = format!(
            "SELECT {} FROM participants WHERE participant_id = $1",
            PARTICIPANT_COLUMNS
        );
        let row = sqlx::query_as::<_, ParticipantRow>(&sql)
            .bind(participant_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Participant::from))
    }

    async fn latest_participant_for_identity(
        &self,
        identity_id: &str,
    ) -> Result<Option<Participant>, AppError> {
        let sql = format!(
            "SELECT {} FROM participants WHERE identity_id = $1 ORDER BY join_seq DESC LIMIT 1",
            PARTICIPANT_COLUMNS
        );
        let row = sqlx::query_as::<_, ParticipantRow>(&sql)
            .bind(identity_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Participant::from))
    }

    async fn insert_participant_if_absent(
        &self,
        participant: Participant,
    ) -> Result<Admission, AppError> {
        // The unique (quiz_id, identity_key) index makes this a single atomic
        // conditional insert; concurrent joins for the same key collapse here.
        let sql = format!(
            r#"
            INSERT INTO participants (participant_id, quiz_id, join_code, display_name,
                identity_id, identity_key, total_score, responses, joined_at, last_answer_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (quiz_id, identity_key) DO NOTHING
            RETURNING {}
            "#,
            PARTICIPANT_COLUMNS
        );
        let inserted = sqlx::query_as::<_, ParticipantRow>(&sql)
            .bind(&participant.participant_id)
            .bind(&participant.quiz_id)
            .bind(&participant.join_code)
            .bind(&participant.display_name)
            .bind(&participant.identity_id)
            .bind(&participant.identity_key)
            .bind(participant.total_score)
            .bind(Json(&participant.responses))
            .bind(participant.joined_at)
            .bind(participant.last_answer_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to insert participant: {:?}", e);
                AppError::from(e)
            })?;

        if let Some(row) = inserted {
            return Ok(Admission {
                participant: row.into(),
                created: true,
            });
        }

        let sql = format!(
            "SELECT {} FROM participants WHERE quiz_id = $1 AND identity_key = $2",
            PARTICIPANT_COLUMNS
        );
        let existing = sqlx::query_as::<_, ParticipantRow>(&sql)
            .bind(&participant.quiz_id)
            .bind(&participant.identity_key)
            .fetch_optional(&self.pool)
            .await?
            // Conflicting row was deleted between the two statements.
            .ok_or_else(|| AppError::Conflict("Participant changed concurrently, retry".to_string()))?;

        Ok(Admission {
            participant: existing.into(),
            created: false,
        })
    }

    async fn record_response(
        &self,
        participant_id: &str,
        response: QuestionResponse,
    ) -> Result<Option<RecordOutcome>, AppError> {
        // Row-level: the WHERE clause is re-checked against the latest row
        // version when a concurrent update to the same participant commits first.
        let sql = format!(
            r#"
            UPDATE participants SET
                responses = responses || jsonb_build_array($2::jsonb),
                total_score = ROUND((total_score + $3)::numeric, 2)::double precision,
                last_answer_at = $4
            WHERE participant_id = $1
              AND NOT (responses @> jsonb_build_array(jsonb_build_object('question_id', $5::text)))
            RETURNING {}
            "#,
            PARTICIPANT_COLUMNS
        );
        let updated = sqlx::query_as::<_, ParticipantRow>(&sql)
            .bind(participant_id)
            .bind(Json(&response))
            .bind(response.awarded_marks)
            .bind(response.answered_at)
            .bind(&response.question_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to record response: {:?}", e);
                AppError::from(e)
            })?;

        if let Some(row) = updated {
            return Ok(Some(RecordOutcome::Recorded(row.into())));
        }

        let existing = self.find_participant_by_id(participant_id).await?;
        Ok(existing.map(|p| RecordOutcome::Duplicate {
            awarded_marks: p
                .response_for(&response.question_id)
                .map(|r| r.awarded_marks)
                .unwrap_or(0.0),
        }))
    }

    async fn delete_participant(
        &self,
        quiz_id: &str,
        participant_id: &str,
    ) -> Result<bool, AppError> {
        let result =
            sqlx::query("DELETE FROM participants WHERE quiz_id = $1 AND participant_id = $2")
                .bind(quiz_id)
                .bind(participant_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn count_participants(&self, quiz_id: &str) -> Result<u64, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM participants WHERE quiz_id = $1")
            .bind(quiz_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn list_participants(
        &self,
        quiz_id: &str,
        sort: ParticipantSort,
    ) -> Result<Vec<Participant>, AppError> {
        let order = match sort {
            ParticipantSort::Joined => "joined_at ASC, join_seq ASC",
            ParticipantSort::Score => "total_score DESC, joined_at ASC, join_seq ASC",
        };
        let sql = format!(
            "SELECT {} FROM participants WHERE quiz_id = $1 ORDER BY {}",
            PARTICIPANT_COLUMNS, order
        );
        let rows = sqlx::query_as::<_, ParticipantRow>(&sql)
            .bind(quiz_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Participant::from).collect())
    }

    async fn clear_participants(&self, quiz_id: &str) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM participants WHERE quiz_id = $1")
            .bind(quiz_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
