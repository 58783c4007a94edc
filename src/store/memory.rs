// src/store/memory.rs

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use super::{Admission, ParticipantSort, ParticipantStore, QuizStore};
use crate::{
    error::AppError,
    models::{
        participant::{IdentityKey, Participant, QuestionResponse, RecordOutcome, leaderboard_order},
        quiz::Quiz,
    },
};

#[derive(Default)]
struct ParticipantTable {
    rows: HashMap<String, Participant>,
    /// (quiz_id, identity_key) -> participant_id
    by_key: HashMap<(String, String), String>,
    next_seq: i64,
}

impl ParticipantTable {
    fn remove(&mut self, participant_id: &str) -> Option<Participant> {
        let row = self.rows.remove(participant_id)?;
        self.by_key
            .remove(&(row.quiz_id.clone(), row.identity_key.clone()));
        Some(row)
    }
}

/// Process-local store. Each operation holds the table lock for its whole
/// read-modify-write, which gives the per-row atomicity the engine relies on.
#[derive(Default)]
pub struct MemoryStore {
    quizzes: RwLock<HashMap<String, Quiz>>,
    participants: Mutex<ParticipantTable>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuizStore for MemoryStore {
    async fn insert_quiz(&self, quiz: &Quiz) -> Result<(), AppError> {
        let mut quizzes = self.quizzes.write().await;
        if quizzes.contains_key(&quiz.quiz_id) {
            return Err(AppError::Conflict(format!(
                "Quiz '{}' already exists",
                quiz.quiz_id
            )));
        }
        quizzes.insert(quiz.quiz_id.clone(), quiz.clone());
        Ok(())
    }

    async fn find_quiz_by_id(&self, quiz_id: &str) -> Result<Option<Quiz>, AppError> {
        Ok(self.quizzes.read().await.get(quiz_id).cloned())
    }

    async fn find_quiz_by_join_code(&self, join_code: &str) -> Result<Option<Quiz>, AppError> {
        Ok(self
            .quizzes
            .read()
            .await
            .values()
            .find(|q| q.join_code.as_deref() == Some(join_code))
            .cloned())
    }

    async fn update_quiz(&self, quiz: &Quiz) -> Result<bool, AppError> {
        let mut quizzes = self.quizzes.write().await;

        let Some(stored) = quizzes.get(&quiz.quiz_id) else {
            return Ok(false);
        };
        if stored.version != quiz.version {
            return Ok(false);
        }

        if let Some(code) = quiz.join_code.as_deref() {
            let clash = quizzes
                .values()
                .any(|q| q.quiz_id != quiz.quiz_id && q.join_code.as_deref() == Some(code));
            if clash {
                return Err(AppError::JoinCodeTaken);
            }
        }

        let mut next = quiz.clone();
        next.version += 1;
        quizzes.insert(next.quiz_id.clone(), next);
        Ok(true)
    }

    async fn list_quizzes_by_owner(&self, owner_id: &str) -> Result<Vec<Quiz>, AppError> {
        let mut owned: Vec<Quiz> = self
            .quizzes
            .read()
            .await
            .values()
            .filter(|q| q.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned)
    }

    async fn delete_quiz(&self, quiz_id: &str) -> Result<bool, AppError> {
        let removed = self.quizzes.write().await.remove(quiz_id).is_some();
        if removed {
            self.clear_participants(quiz_id).await?;
        }
        Ok(removed)
    }
}

#[async_trait]
impl ParticipantStore for MemoryStore {
    async fn find_participant(
        &self,
        quiz_id: &str,
        identity: &IdentityKey,
    ) -> Result<Option<Participant>, AppError> {
        let table = self.participants.lock().await;
        Ok(table
            .by_key
            .get(&(quiz_id.to_string(), identity.as_key()))
            .and_then(|id| table.rows.get(id))
            .cloned())
    }

    async fn find_participant_by_id(
        &self,
        participant_id: &str,
    ) -> Result<Option<Participant>, AppError> {
        Ok(self.participants.lock().await.rows.get(participant_id).cloned())
    }

    async fn latest_participant_for_identity(
        &self,
        identity_id: &str,
    ) -> Result<Option<Participant>, AppError> {
        Ok(self
            .participants
            .lock()
            .await
            .rows
            .values()
            .filter(|p| p.identity_id.as_deref() == Some(identity_id))
            .max_by_key(|p| p.join_seq)
            .cloned())
    }

    async fn insert_participant_if_absent(
        &self,
        mut participant: Participant,
    ) -> Result<Admission, AppError> {
        let mut table = self.participants.lock().await;
        let key = (participant.quiz_id.clone(), participant.identity_key.clone());

        if let Some(existing) = table.by_key.get(&key).and_then(|id| table.rows.get(id)) {
            return Ok(Admission {
                participant: existing.clone(),
                created: false,
            });
        }

        if table.rows.contains_key(&participant.participant_id) {
            return Err(AppError::Conflict(format!(
                "Participant '{}' already exists",
                participant.participant_id
            )));
        }

        table.next_seq += 1;
        participant.join_seq = table.next_seq;
        table.by_key.insert(key, participant.participant_id.clone());
        table
            .rows
            .insert(participant.participant_id.clone(), participant.clone());

        Ok(Admission {
            participant,
            created: true,
        })
    }

    async fn record_response(
        &self,
        participant_id: &str,
        response: QuestionResponse,
    ) -> Result<Option<RecordOutcome>, AppError> {
        let mut table = self.participants.lock().await;
        Ok(table
            .rows
            .get_mut(participant_id)
            .map(|row| row.record(response)))
    }

    async fn delete_participant(
        &self,
        quiz_id: &str,
        participant_id: &str,
    ) -> Result<bool, AppError> {
        let mut table = self.participants.lock().await;
        let belongs = table
            .rows
            .get(participant_id)
            .is_some_and(|p| p.quiz_id == quiz_id);
        if !belongs {
            return Ok(false);
        }
        Ok(table.remove(participant_id).is_some())
    }

    async fn count_participants(&self, quiz_id: &str) -> Result<u64, AppError> {
        Ok(self
            .participants
            .lock()
            .await
            .rows
            .values()
            .filter(|p| p.quiz_id == quiz_id)
            .count() as u64)
    }

    async fn list_participants(
        &self,
        quiz_id: &str,
        sort: ParticipantSort,
    ) -> Result<Vec<Participant>, AppError> {
        let mut rows: Vec<Participant> = self
            .participants
            .lock()
            .await
            .rows
            .values()
            .filter(|p| p.quiz_id == quiz_id)
            .cloned()
            .collect();

        match sort {
            ParticipantSort::Joined => rows.sort_by(|a, b| {
                a.joined_at
                    .cmp(&b.joined_at)
                    .then_with(|| a.join_seq.cmp(&b.join_seq))
            }),
            ParticipantSort::Score => rows.sort_by(leaderboard_order),
        }
        Ok(rows)
    }

    async fn clear_participants(&self, quiz_id: &str) -> Result<u64, AppError> {
        let mut table = self.participants.lock().await;
        let ids: Vec<String> = table
            .rows
            .values()
            .filter(|p| p.quiz_id == quiz_id)
            .map(|p| p.participant_id.clone())
            .collect();
        for id in &ids {
            table.remove(id);
        }
        Ok(ids.len() as u64)
    }
}
