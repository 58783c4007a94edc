// src/services/session.rs

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use chrono::Utc;
use tokio::sync::Mutex;
use validator::Validate;

use crate::{
    broadcast::{Broadcaster, QuizEvent},
    config::QUIZ_UPDATE_ATTEMPTS,
    error::AppError,
    models::{
        participant::{
            AnswerReceipt, IdentityKey, JoinRequest, Leaderboard, Participant, ParticipantList,
            QuestionResponse, RecordOutcome, SubmitAnswerRequest, VoteTally, clamp_time_left,
            score_answer,
        },
        quiz::{
            CurrentQuestion, JoinCodeLookup, PublicQuestion, Question, QuestionInput,
            QuestionOption, Quiz, QuizDraftRequest, QuizStatus, QuizSummary,
        },
    },
    store::{Admission, MemoryStore, ParticipantSort, ParticipantStore, QuizStore},
    utils::{
        html::{clean_html, clean_optional},
        ids::{generate_unique, new_join_code, new_opaque_id},
        jwt::Claims,
    },
};

/// Orchestrates the live quiz: owner transitions, participant joins and
/// answers, scoring and room broadcasts.
///
/// Every mutation is committed to the store before its event is published,
/// so a client re-reading state after an event never sees the old view.
#[derive(Clone)]
pub struct SessionController {
    quizzes: Arc<dyn QuizStore>,
    participants: Arc<dyn ParticipantStore>,
    broadcaster: Arc<dyn Broadcaster>,
    id_attempts: u32,
    /// Per-quiz gate around computing and publishing vote tallies, so the
    /// room sees them in the order they were counted.
    tally_gates: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl SessionController {
    pub fn new(
        quizzes: Arc<dyn QuizStore>,
        participants: Arc<dyn ParticipantStore>,
        broadcaster: Arc<dyn Broadcaster>,
        id_attempts: u32,
    ) -> Self {
        Self {
            quizzes,
            participants,
            broadcaster,
            id_attempts,
            tally_gates: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Both stores backed by one fresh `MemoryStore`.
    pub fn in_memory(broadcaster: Arc<dyn Broadcaster>, id_attempts: u32) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::new(store.clone(), store, broadcaster, id_attempts)
    }

    // ---------------------------------------------------------------------
    // Identifiers
    // ---------------------------------------------------------------------

    async fn new_quiz_id(&self) -> Result<String, AppError> {
        let quizzes = self.quizzes.clone();
        generate_unique(self.id_attempts, new_opaque_id, move |candidate| {
            let quizzes = quizzes.clone();
            async move { Ok::<_, AppError>(quizzes.find_quiz_by_id(&candidate).await?.is_some()) }
        })
        .await
    }

    async fn new_participant_id(&self) -> Result<String, AppError> {
        let participants = self.participants.clone();
        generate_unique(self.id_attempts, new_opaque_id, move |candidate| {
            let participants = participants.clone();
            async move {
                Ok::<_, AppError>(participants
                    .find_participant_by_id(&candidate)
                    .await?
                    .is_some())
            }
        })
        .await
    }

    async fn new_join_code(&self) -> Result<String, AppError> {
        let quizzes = self.quizzes.clone();
        generate_unique(self.id_attempts, new_join_code, move |candidate| {
            let quizzes = quizzes.clone();
            async move {
                Ok::<_, AppError>(quizzes
                    .find_quiz_by_join_code(&candidate)
                    .await?
                    .is_some())
            }
        })
        .await
    }

    // ---------------------------------------------------------------------
    // Quiz loading and owner-side mutation
    // ---------------------------------------------------------------------

    async fn load_quiz(&self, quiz_id: &str) -> Result<Quiz, AppError> {
        self.quizzes
            .find_quiz_by_id(quiz_id)
            .await?
            .ok_or(AppError::QuizNotFound)
    }

    async fn owned_quiz(&self, quiz_id: &str, principal: &Claims) -> Result<Quiz, AppError> {
        let quiz = self.load_quiz(quiz_id).await?;
        if quiz.owner_id != principal.sub && !principal.is_admin() {
            return Err(AppError::Forbidden(
                "Only the quiz owner may do this".to_string(),
            ));
        }
        Ok(quiz)
    }

    /// Loads the quiz, applies `apply` and writes it back with a version check.
    ///
    /// When another request committed first, the quiz is reloaded and `apply`
    /// re-run against the fresh state, so its precondition checks see the
    /// winner's transition.
    async fn mutate_quiz<T, F>(
        &self,
        quiz_id: &str,
        principal: &Claims,
        mut apply: F,
    ) -> Result<(Quiz, T), AppError>
    where
        F: FnMut(&mut Quiz) -> Result<T, AppError> + Send,
        T: Send,
    {
        for attempt in 1..=QUIZ_UPDATE_ATTEMPTS {
            let mut quiz = self.owned_quiz(quiz_id, principal).await?;
            let output = apply(&mut quiz)?;

            if self.quizzes.update_quiz(&quiz).await? {
                quiz.version += 1;
                return Ok((quiz, output));
            }

            tracing::warn!(
                "Quiz {} changed concurrently, retrying (attempt {}/{})",
                quiz_id,
                attempt,
                QUIZ_UPDATE_ATTEMPTS
            );
        }

        Err(AppError::Conflict(
            "Quiz is being modified concurrently, reload and try again".to_string(),
        ))
    }

    async fn tally_gate(&self, quiz_id: &str) -> Arc<Mutex<()>> {
        self.tally_gates
            .lock()
            .await
            .entry(quiz_id.to_string())
            .or_default()
            .clone()
    }

    /// Nothing is published to the room afterwards.
    async fn close_room(&self, quiz_id: &str) {
        self.tally_gates.lock().await.remove(quiz_id);
        self.broadcaster.close_room(quiz_id).await;
    }

    /// A participant who joined with a token can only be acted for by that
    /// identity. Anonymous participants are addressed by their id alone.
    fn ensure_acting_for(
        participant: &Participant,
        principal: Option<&Claims>,
    ) -> Result<(), AppError> {
        match participant.identity_id.as_deref() {
            Some(identity) if principal.map(|c| c.sub.as_str()) != Some(identity) => Err(
                AppError::Forbidden("Participant belongs to another identity".to_string()),
            ),
            _ => Ok(()),
        }
    }

    fn build_questions(inputs: &[QuestionInput]) -> Vec<Question> {
        let mut seen = HashSet::new();
        inputs
            .iter()
            .map(|input| {
                let mut question_id = new_opaque_id();
                while !seen.insert(question_id.clone()) {
                    question_id = new_opaque_id();
                }
                Question {
                    question_id,
                    text: clean_html(&input.text),
                    options: input
                        .options
                        .iter()
                        .map(|o| QuestionOption {
                            key: o.key.clone(),
                            text: clean_html(&o.text),
                            is_correct: o.is_correct,
                        })
                        .collect(),
                    time_limit_seconds: input.time_limit_seconds,
                    max_marks: input.max_marks,
                }
            })
            .collect()
    }

    // ---------------------------------------------------------------------
    // Owner operations
    // ---------------------------------------------------------------------

    pub async fn create_quiz(
        &self,
        principal: &Claims,
        req: QuizDraftRequest,
    ) -> Result<Quiz, AppError> {
        req.validate()?;

        let quiz = Quiz::new(
            self.new_quiz_id().await?,
            principal.sub.clone(),
            clean_html(&req.title),
            clean_optional(req.description.as_deref()),
            Self::build_questions(&req.questions),
            Utc::now(),
        );
        self.quizzes.insert_quiz(&quiz).await?;

        tracing::info!(
            "Quiz {} created by {} with {} questions",
            quiz.quiz_id,
            quiz.owner_id,
            quiz.questions.len()
        );
        Ok(quiz)
    }

    pub async fn update_draft(
        &self,
        quiz_id: &str,
        principal: &Claims,
        req: QuizDraftRequest,
    ) -> Result<Quiz, AppError> {
        req.validate()?;

        let title = clean_html(&req.title);
        let description = clean_optional(req.description.as_deref());
        let questions = Self::build_questions(&req.questions);

        let (quiz, _) = self
            .mutate_quiz(quiz_id, principal, |quiz| {
                quiz.update_draft(
                    title.clone(),
                    description.clone(),
                    questions.clone(),
                    Utc::now(),
                )
            })
            .await?;
        Ok(quiz)
    }

    pub async fn get_quiz(&self, quiz_id: &str, principal: &Claims) -> Result<Quiz, AppError> {
        self.owned_quiz(quiz_id, principal).await
    }

    pub async fn list_quizzes(&self, principal: &Claims) -> Result<Vec<QuizSummary>, AppError> {
        let quizzes = self.quizzes.list_quizzes_by_owner(&principal.sub).await?;
        Ok(quizzes.iter().map(QuizSummary::from).collect())
    }

    pub async fn delete_quiz(&self, quiz_id: &str, principal: &Claims) -> Result<(), AppError> {
        let quiz = self.owned_quiz(quiz_id, principal).await?;
        quiz.ensure_deletable()?;

        if !self.quizzes.delete_quiz(quiz_id).await? {
            return Err(AppError::QuizNotFound);
        }
        self.close_room(quiz_id).await;

        tracing::info!("Quiz {} deleted", quiz_id);
        Ok(())
    }

    /// Assigns a fresh join code every time, so a code from an earlier
    /// publish stops resolving as soon as the new one is stored.
    ///
    /// A code claimed by another quiz between generation and write is
    /// replaced by a new draw, within the same attempt budget as generation.
    pub async fn publish(&self, quiz_id: &str, principal: &Claims) -> Result<Quiz, AppError> {
        for attempt in 1..=self.id_attempts {
            let join_code = self.new_join_code().await?;

            let result = self
                .mutate_quiz(quiz_id, principal, |quiz| {
                    quiz.publish(join_code.clone(), Utc::now())
                })
                .await;

            match result {
                Ok((quiz, _)) => {
                    tracing::info!("Quiz {} published with join code {}", quiz_id, join_code);
                    return Ok(quiz);
                }
                Err(AppError::JoinCodeTaken) => {
                    tracing::warn!(
                        "Join code {} was claimed concurrently, drawing another (attempt {}/{})",
                        join_code,
                        attempt,
                        self.id_attempts
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::IdGenerationExhausted)
    }

    pub async fn start(&self, quiz_id: &str, principal: &Claims) -> Result<Quiz, AppError> {
        let (quiz, _) = self
            .mutate_quiz(quiz_id, principal, |quiz| quiz.start(Utc::now()))
            .await?;

        tracing::info!("Quiz {} started", quiz_id);
        if let Some(started_at) = quiz.started_at {
            self.broadcaster
                .publish(quiz_id, QuizEvent::QuizStarted { started_at })
                .await;
        }
        Ok(quiz)
    }

    pub async fn push_question(
        &self,
        quiz_id: &str,
        principal: &Claims,
        index: usize,
    ) -> Result<PublicQuestion, AppError> {
        let (_, question) = self
            .mutate_quiz(quiz_id, principal, |quiz| {
                quiz.push_question(index, Utc::now())
            })
            .await?;

        tracing::info!(
            "Quiz {} pushed question {} ({})",
            quiz_id,
            index,
            question.question_id
        );
        self.broadcaster
            .publish(
                quiz_id,
                QuizEvent::QuestionPushed {
                    index,
                    question: question.clone(),
                },
            )
            .await;
        Ok(question)
    }

    pub async fn end(&self, quiz_id: &str, principal: &Claims) -> Result<Quiz, AppError> {
        let (quiz, _) = self
            .mutate_quiz(quiz_id, principal, |quiz| quiz.end(Utc::now()))
            .await?;

        tracing::info!("Quiz {} ended", quiz_id);
        if let Some(ended_at) = quiz.ended_at {
            self.broadcaster
                .publish(quiz_id, QuizEvent::QuizEnded { ended_at })
                .await;
        }
        self.close_room(quiz_id).await;
        Ok(quiz)
    }

    pub async fn list_participants(
        &self,
        quiz_id: &str,
        principal: &Claims,
    ) -> Result<ParticipantList, AppError> {
        self.owned_quiz(quiz_id, principal).await?;
        let participants = self
            .participants
            .list_participants(quiz_id, ParticipantSort::Joined)
            .await?;

        Ok(ParticipantList {
            quiz_id: quiz_id.to_string(),
            participant_count: participants.len(),
            participants,
        })
    }

    /// Removes every participant. Refused while the quiz is running.
    pub async fn clear_participants(
        &self,
        quiz_id: &str,
        principal: &Claims,
    ) -> Result<u64, AppError> {
        let quiz = self.owned_quiz(quiz_id, principal).await?;
        if quiz.status == QuizStatus::Active {
            return Err(AppError::InvalidTransition {
                attempted: "clear participants of",
                current: quiz.status,
            });
        }

        let removed = self.participants.clear_participants(quiz_id).await?;
        tracing::info!("Cleared {} participants from quiz {}", removed, quiz_id);

        self.broadcaster
            .publish(quiz_id, QuizEvent::ParticipantsCleared { removed })
            .await;
        Ok(removed)
    }

    pub async fn votes(
        &self,
        quiz_id: &str,
        principal: &Claims,
        question_id: &str,
    ) -> Result<VoteTally, AppError> {
        let quiz = self.owned_quiz(quiz_id, principal).await?;
        let question = quiz
            .question(question_id)
            .ok_or(AppError::QuestionNotFound)?;
        self.tally(quiz_id, question).await
    }

    async fn tally(&self, quiz_id: &str, question: &Question) -> Result<VoteTally, AppError> {
        let participants = self
            .participants
            .list_participants(quiz_id, ParticipantSort::Joined)
            .await?;
        Ok(VoteTally::count(question, &participants))
    }

    // ---------------------------------------------------------------------
    // Participant operations
    // ---------------------------------------------------------------------

    pub async fn lookup_join_code(&self, join_code: &str) -> Result<JoinCodeLookup, AppError> {
        let code = join_code.trim().to_uppercase();
        let quiz = self
            .quizzes
            .find_quiz_by_join_code(&code)
            .await?
            .ok_or_else(|| AppError::NotFound("No quiz uses that join code".to_string()))?;

        Ok(JoinCodeLookup {
            quiz_id: quiz.quiz_id,
            title: quiz.title,
            status: quiz.status,
        })
    }

    /// Joins the quiz currently holding `req.join_code`.
    pub async fn join(
        &self,
        mut req: JoinRequest,
        principal: Option<&Claims>,
    ) -> Result<Admission, AppError> {
        req.normalize();
        req.validate()?;

        let display_name = clean_html(&req.display_name);
        if display_name.trim().is_empty() {
            return Err(AppError::BadRequest(
                "Display name must contain visible text".to_string(),
            ));
        }

        let quiz = self
            .quizzes
            .find_quiz_by_join_code(&req.join_code)
            .await?
            .ok_or_else(|| AppError::NotFound("No quiz uses that join code".to_string()))?;

        self.join_quiz(
            &quiz,
            &req.join_code,
            &display_name,
            principal.map(|c| c.sub.as_str()),
        )
        .await
    }

    /// Registers a participant, at most once per identity (or per display
    /// name for anonymous joiners). Repeated joins return the existing row.
    pub async fn join_quiz(
        &self,
        quiz: &Quiz,
        join_code: &str,
        display_name: &str,
        identity_id: Option<&str>,
    ) -> Result<Admission, AppError> {
        if quiz.status == QuizStatus::Ended {
            return Err(AppError::QuizEnded);
        }
        if !quiz.is_accepting_participants() {
            return Err(AppError::InvalidTransition {
                attempted: "join",
                current: quiz.status,
            });
        }

        if let Some(identity_id) = identity_id {
            if let Some(latest) = self
                .participants
                .latest_participant_for_identity(identity_id)
                .await?
            {
                if latest.quiz_id == quiz.quiz_id {
                    return Ok(Admission {
                        participant: latest,
                        created: false,
                    });
                }

                let other = self.quizzes.find_quiz_by_id(&latest.quiz_id).await?;
                if other.is_some_and(|q| q.status != QuizStatus::Ended) {
                    return Err(AppError::AlreadyInActiveQuiz {
                        quiz_id: latest.quiz_id,
                    });
                }
            }
        }

        let identity = IdentityKey::for_join(identity_id, display_name);
        if let Some(existing) = self
            .participants
            .find_participant(&quiz.quiz_id, &identity)
            .await?
        {
            tracing::debug!(
                "Repeated join for {} in quiz {}",
                existing.participant_id,
                quiz.quiz_id
            );
            return Ok(Admission {
                participant: existing,
                created: false,
            });
        }

        // Two joins can both miss above; the conditional insert settles it.
        let participant = Participant {
            participant_id: self.new_participant_id().await?,
            quiz_id: quiz.quiz_id.clone(),
            join_code: join_code.to_string(),
            display_name: display_name.to_string(),
            identity_id: identity_id.map(str::to_string),
            identity_key: identity.as_key(),
            total_score: 0.0,
            responses: Vec::new(),
            joined_at: Utc::now(),
            last_answer_at: None,
            join_seq: 0,
        };

        let admission = self
            .participants
            .insert_participant_if_absent(participant)
            .await?;

        if admission.created {
            let participant_count = self.participants.count_participants(&quiz.quiz_id).await?;
            tracing::info!(
                "Participant {} joined quiz {} ({} total)",
                admission.participant.participant_id,
                quiz.quiz_id,
                participant_count
            );
            self.broadcaster
                .publish(
                    &quiz.quiz_id,
                    QuizEvent::ParticipantJoined {
                        display_name: admission.participant.display_name.clone(),
                        participant_count,
                    },
                )
                .await;
        } else {
            tracing::debug!(
                "Repeated join for {} in quiz {}",
                admission.participant.participant_id,
                quiz.quiz_id
            );
        }

        Ok(admission)
    }

    pub async fn leave(
        &self,
        quiz_id: &str,
        participant_id: &str,
        principal: Option<&Claims>,
    ) -> Result<(), AppError> {
        let participant = self
            .participants
            .find_participant_by_id(participant_id)
            .await?
            .filter(|p| p.quiz_id == quiz_id)
            .ok_or(AppError::ParticipantNotFound)?;
        Self::ensure_acting_for(&participant, principal)?;

        if !self
            .participants
            .delete_participant(quiz_id, participant_id)
            .await?
        {
            return Err(AppError::ParticipantNotFound);
        }

        let participant_count = self.participants.count_participants(quiz_id).await?;
        tracing::info!("Participant {} left quiz {}", participant_id, quiz_id);

        self.broadcaster
            .publish(
                quiz_id,
                QuizEvent::ParticipantLeft {
                    display_name: participant.display_name,
                    participant_count,
                },
            )
            .await;
        Ok(())
    }

    /// Scores and records an answer. The first accepted answer per question
    /// is final; repeats return the original award and broadcast nothing.
    pub async fn submit_answer(
        &self,
        quiz_id: &str,
        req: SubmitAnswerRequest,
        principal: Option<&Claims>,
    ) -> Result<AnswerReceipt, AppError> {
        req.validate()?;

        let quiz = self.load_quiz(quiz_id).await?;
        if quiz.status != QuizStatus::Active {
            return Err(AppError::InvalidAnswer(format!(
                "quiz is {}, not active",
                quiz.status
            )));
        }
        let question = quiz
            .question(&req.question_id)
            .ok_or_else(|| AppError::InvalidAnswer("unknown question".to_string()))?;
        let option = question
            .option(&req.selected_option_key)
            .ok_or_else(|| AppError::InvalidAnswer("unknown option".to_string()))?;

        let participant = self
            .participants
            .find_participant_by_id(&req.participant_id)
            .await?
            .filter(|p| p.quiz_id == quiz_id)
            .ok_or(AppError::ParticipantNotFound)?;
        Self::ensure_acting_for(&participant, principal)?;

        let time_left = clamp_time_left(req.time_left_seconds, question.time_limit_seconds);
        let response = QuestionResponse {
            question_id: question.question_id.clone(),
            selected_option_key: option.key.clone(),
            time_left_seconds: time_left,
            awarded_marks: score_answer(question, option.is_correct, time_left),
            answered_at: Utc::now(),
        };

        let outcome = self
            .participants
            .record_response(&participant.participant_id, response)
            .await?
            .ok_or(AppError::ParticipantNotFound)?;

        match outcome {
            RecordOutcome::Duplicate { awarded_marks } => {
                tracing::debug!(
                    "Duplicate answer from {} for question {}",
                    participant.participant_id,
                    question.question_id
                );
                Ok(AnswerReceipt {
                    question_id: question.question_id.clone(),
                    awarded_marks,
                    duplicate: true,
                })
            }
            RecordOutcome::Recorded(updated) => {
                let awarded_marks = updated
                    .response_for(&question.question_id)
                    .map(|r| r.awarded_marks)
                    .unwrap_or(0.0);

                // Counted after our own commit and published under the gate,
                // so the last tally sent always includes every recorded answer.
                let gate = self.tally_gate(quiz_id).await;
                let _counting = gate.lock().await;
                let tally = self.tally(quiz_id, question).await?;
                self.broadcaster
                    .publish(quiz_id, QuizEvent::VotesUpdate(tally))
                    .await;

                Ok(AnswerReceipt {
                    question_id: question.question_id.clone(),
                    awarded_marks,
                    duplicate: false,
                })
            }
        }
    }

    pub async fn quiz_status(&self, quiz_id: &str) -> Result<QuizStatus, AppError> {
        Ok(self.load_quiz(quiz_id).await?.status)
    }

    /// `None` when the quiz is not active or nothing has been pushed yet.
    pub async fn current_question(
        &self,
        quiz_id: &str,
    ) -> Result<Option<CurrentQuestion>, AppError> {
        Ok(self.load_quiz(quiz_id).await?.current_projection())
    }

    /// Score descending, earliest join first on ties.
    pub async fn leaderboard(&self, quiz_id: &str) -> Result<Leaderboard, AppError> {
        self.load_quiz(quiz_id).await?;
        let participants = self
            .participants
            .list_participants(quiz_id, ParticipantSort::Score)
            .await?;
        Ok(Leaderboard::build(quiz_id, participants))
    }
}
