// src/models/quiz.rs

use std::{collections::HashSet, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    config::{
        MAX_MAX_MARKS, MAX_OPTIONS_PER_QUESTION, MAX_QUESTIONS_PER_QUIZ, MAX_TIME_LIMIT_SECONDS,
        MIN_MAX_MARKS, MIN_OPTIONS_PER_QUESTION, MIN_TIME_LIMIT_SECONDS,
    },
    error::AppError,
};

/// Lifecycle of a live quiz. `Ended` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuizStatus {
    Draft,
    Published,
    Active,
    Ended,
}

impl QuizStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuizStatus::Draft => "draft",
            QuizStatus::Published => "published",
            QuizStatus::Active => "active",
            QuizStatus::Ended => "ended",
        }
    }
}

impl fmt::Display for QuizStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuizStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(QuizStatus::Draft),
            "published" => Ok(QuizStatus::Published),
            "active" => Ok(QuizStatus::Active),
            "ended" => Ok(QuizStatus::Ended),
            other => Err(AppError::InternalServerError(format!(
                "unknown quiz status '{}'",
                other
            ))),
        }
    }
}

/// One answer choice. `is_correct` is only ever shown to the owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub key: String,
    pub text: String,
    pub is_correct: bool,
}

/// A question as the owner sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub question_id: String,
    pub text: String,
    pub options: Vec<QuestionOption>,
    pub time_limit_seconds: u32,
    pub max_marks: u32,
}

impl Question {
    pub fn option(&self, key: &str) -> Option<&QuestionOption> {
        self.options.iter().find(|o| o.key == key)
    }

    /// Participant-facing projection with correctness flags stripped.
    pub fn sanitized(&self) -> PublicQuestion {
        PublicQuestion {
            question_id: self.question_id.clone(),
            text: self.text.clone(),
            options: self
                .options
                .iter()
                .map(|o| PublicOption {
                    key: o.key.clone(),
                    text: o.text.clone(),
                })
                .collect(),
            time_limit_seconds: self.time_limit_seconds,
            max_marks: self.max_marks,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicOption {
    pub key: String,
    pub text: String,
}

/// DTO for sending a question to participants (no correctness flags).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicQuestion {
    pub question_id: String,
    pub text: String,
    pub options: Vec<PublicOption>,
    pub time_limit_seconds: u32,
    pub max_marks: u32,
}

/// The quiz aggregate: definition, question list and lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quiz {
    pub quiz_id: String,
    pub owner_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: QuizStatus,

    /// Present only while published or active.
    pub join_code: Option<String>,

    pub questions: Vec<Question>,

    /// -1 until the first question is pushed.
    pub current_question_index: i32,

    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Row version for compare-and-swap updates.
    #[serde(skip)]
    pub version: i64,
}

impl Quiz {
    pub fn new(
        quiz_id: String,
        owner_id: String,
        title: String,
        description: Option<String>,
        questions: Vec<Question>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            quiz_id,
            owner_id,
            title,
            description,
            status: QuizStatus::Draft,
            join_code: None,
            questions,
            current_question_index: -1,
            started_at: None,
            ended_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    fn ensure(&self, attempted: &'static str, allowed: &[QuizStatus]) -> Result<(), AppError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(AppError::InvalidTransition {
                attempted,
                current: self.status,
            })
        }
    }

    /// Replaces title, description and questions wholesale. Draft only.
    pub fn update_draft(
        &mut self,
        title: String,
        description: Option<String>,
        questions: Vec<Question>,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.ensure("update", &[QuizStatus::Draft])?;
        self.title = title;
        self.description = description;
        self.questions = questions;
        self.updated_at = now;
        Ok(())
    }

    /// Publishing an already published quiz rotates its join code.
    pub fn publish(&mut self, join_code: String, now: DateTime<Utc>) -> Result<(), AppError> {
        self.ensure("publish", &[QuizStatus::Draft, QuizStatus::Published])?;
        self.status = QuizStatus::Published;
        self.join_code = Some(join_code);
        self.updated_at = now;
        Ok(())
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), AppError> {
        self.ensure("start", &[QuizStatus::Published])?;
        self.status = QuizStatus::Active;
        self.started_at = Some(now);
        self.current_question_index = -1;
        self.updated_at = now;
        Ok(())
    }

    pub fn push_question(
        &mut self,
        index: usize,
        now: DateTime<Utc>,
    ) -> Result<PublicQuestion, AppError> {
        self.ensure("push a question on", &[QuizStatus::Active])?;
        let question = self.questions.get(index).ok_or(AppError::QuestionNotFound)?;
        let projection = question.sanitized();
        self.current_question_index = index as i32;
        self.updated_at = now;
        Ok(projection)
    }

    /// Valid from published (owner abort) or active.
    pub fn end(&mut self, now: DateTime<Utc>) -> Result<(), AppError> {
        self.ensure("end", &[QuizStatus::Published, QuizStatus::Active])?;
        self.status = QuizStatus::Ended;
        self.ended_at = Some(now);
        self.join_code = None;
        self.updated_at = now;
        Ok(())
    }

    /// Deletion is refused while participants may be connected.
    pub fn ensure_deletable(&self) -> Result<(), AppError> {
        self.ensure("delete", &[QuizStatus::Draft, QuizStatus::Ended])
    }

    pub fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.question_id == question_id)
    }

    /// The question last pushed, if the quiz is running and one has been pushed.
    pub fn current_question(&self) -> Option<&Question> {
        if self.status != QuizStatus::Active || self.current_question_index < 0 {
            return None;
        }
        self.questions.get(self.current_question_index as usize)
    }

    pub fn current_projection(&self) -> Option<CurrentQuestion> {
        self.current_question().map(|q| CurrentQuestion {
            index: self.current_question_index as usize,
            question: q.sanitized(),
        })
    }

    pub fn is_accepting_participants(&self) -> bool {
        matches!(self.status, QuizStatus::Published | QuizStatus::Active)
    }
}

/// Summary row for the owner's quiz list.
#[derive(Debug, Clone, Serialize)]
pub struct QuizSummary {
    pub quiz_id: String,
    pub title: String,
    pub status: QuizStatus,
    pub join_code: Option<String>,
    pub question_count: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&Quiz> for QuizSummary {
    fn from(quiz: &Quiz) -> Self {
        Self {
            quiz_id: quiz.quiz_id.clone(),
            title: quiz.title.clone(),
            status: quiz.status,
            join_code: quiz.join_code.clone(),
            question_count: quiz.questions.len(),
            created_at: quiz.created_at,
        }
    }
}

/// The question on screen right now.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentQuestion {
    pub index: usize,
    pub question: PublicQuestion,
}

/// Public answer to a join code lookup.
#[derive(Debug, Clone, Serialize)]
pub struct JoinCodeLookup {
    pub quiz_id: String,
    pub title: String,
    pub status: QuizStatus,
}

/// DTO for creating a quiz or replacing a draft.
#[derive(Debug, Deserialize, Validate)]
pub struct QuizDraftRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    #[validate(length(max = MAX_QUESTIONS_PER_QUIZ), nested)]
    #[serde(default)]
    pub questions: Vec<QuestionInput>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct QuestionInput {
    #[validate(length(min = 1, max = 1000))]
    pub text: String,
    #[validate(
        length(min = MIN_OPTIONS_PER_QUESTION, max = MAX_OPTIONS_PER_QUESTION),
        custom(function = validate_option_keys),
        nested
    )]
    pub options: Vec<OptionInput>,
    #[validate(range(min = MIN_TIME_LIMIT_SECONDS, max = MAX_TIME_LIMIT_SECONDS))]
    pub time_limit_seconds: u32,
    #[validate(range(min = MIN_MAX_MARKS, max = MAX_MAX_MARKS))]
    pub max_marks: u32,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct OptionInput {
    #[validate(length(min = 1, max = 16))]
    pub key: String,
    #[validate(length(min = 1, max = 500))]
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

/// Option keys form a set within a question.
fn validate_option_keys(options: &[OptionInput]) -> Result<(), validator::ValidationError> {
    let mut seen = HashSet::new();
    for opt in options {
        if !seen.insert(opt.key.as_str()) {
            return Err(validator::ValidationError::new("duplicate_option_key"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: &str) -> Question {
        Question {
            question_id: id.to_string(),
            text: "Which?".to_string(),
            options: vec![
                QuestionOption {
                    key: "a".to_string(),
                    text: "A".to_string(),
                    is_correct: true,
                },
                QuestionOption {
                    key: "b".to_string(),
                    text: "B".to_string(),
                    is_correct: false,
                },
            ],
            time_limit_seconds: 60,
            max_marks: 10,
        }
    }

    fn draft() -> Quiz {
        Quiz::new(
            "quiz1".to_string(),
            "owner".to_string(),
            "Title".to_string(),
            None,
            vec![question("q1"), question("q2")],
            Utc::now(),
        )
    }

    fn assert_invalid_transition(result: Result<(), AppError>, expected: QuizStatus) {
        match result {
            Err(AppError::InvalidTransition { current, .. }) => assert_eq!(current, expected),
            other => panic!("expected InvalidTransition, got {:?}", other),
        }
    }

    #[test]
    fn test_start_requires_published() {
        let mut quiz = draft();
        assert_invalid_transition(quiz.start(Utc::now()), QuizStatus::Draft);
    }

    #[test]
    fn test_push_before_start_fails() {
        let mut quiz = draft();
        assert!(quiz.push_question(0, Utc::now()).is_err());

        quiz.publish("ABCDEF".to_string(), Utc::now()).unwrap();
        assert!(matches!(
            quiz.push_question(0, Utc::now()),
            Err(AppError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_full_lifecycle() {
        let mut quiz = draft();
        quiz.publish("ABCDEF".to_string(), Utc::now()).unwrap();
        assert_eq!(quiz.join_code.as_deref(), Some("ABCDEF"));

        quiz.start(Utc::now()).unwrap();
        assert_eq!(quiz.status, QuizStatus::Active);
        assert_eq!(quiz.current_question_index, -1);
        assert!(quiz.current_question().is_none());

        let pushed = quiz.push_question(1, Utc::now()).unwrap();
        assert_eq!(pushed.question_id, "q2");
        assert_eq!(quiz.current_question_index, 1);

        quiz.end(Utc::now()).unwrap();
        assert_eq!(quiz.status, QuizStatus::Ended);
        assert!(quiz.join_code.is_none());
        assert!(quiz.ended_at.is_some());
        assert!(quiz.current_question().is_none());
    }

    #[test]
    fn test_push_out_of_range() {
        let mut quiz = draft();
        quiz.publish("ABCDEF".to_string(), Utc::now()).unwrap();
        quiz.start(Utc::now()).unwrap();
        assert!(matches!(
            quiz.push_question(2, Utc::now()),
            Err(AppError::QuestionNotFound)
        ));
        assert_eq!(quiz.current_question_index, -1);
    }

    #[test]
    fn test_end_from_published_is_abort() {
        let mut quiz = draft();
        quiz.publish("ABCDEF".to_string(), Utc::now()).unwrap();
        quiz.end(Utc::now()).unwrap();
        assert_eq!(quiz.status, QuizStatus::Ended);
    }

    #[test]
    fn test_nothing_after_end() {
        let mut quiz = draft();
        quiz.publish("ABCDEF".to_string(), Utc::now()).unwrap();
        quiz.start(Utc::now()).unwrap();
        quiz.end(Utc::now()).unwrap();

        assert_invalid_transition(quiz.publish("GHJKLM".to_string(), Utc::now()), QuizStatus::Ended);
        assert_invalid_transition(quiz.start(Utc::now()), QuizStatus::Ended);
        assert_invalid_transition(quiz.end(Utc::now()), QuizStatus::Ended);
        assert_invalid_transition(
            quiz.update_draft("x".to_string(), None, vec![], Utc::now()),
            QuizStatus::Ended,
        );
        assert!(quiz.push_question(0, Utc::now()).is_err());
    }

    #[test]
    fn test_republish_rotates_code() {
        let mut quiz = draft();
        quiz.publish("ABCDEF".to_string(), Utc::now()).unwrap();
        quiz.publish("GHJKLM".to_string(), Utc::now()).unwrap();
        assert_eq!(quiz.join_code.as_deref(), Some("GHJKLM"));
    }

    #[test]
    fn test_draft_only_mutable_in_draft() {
        let mut quiz = draft();
        quiz.update_draft("New".to_string(), Some("d".to_string()), vec![], Utc::now())
            .unwrap();
        assert_eq!(quiz.title, "New");

        quiz.publish("ABCDEF".to_string(), Utc::now()).unwrap();
        assert_invalid_transition(
            quiz.update_draft("Again".to_string(), None, vec![], Utc::now()),
            QuizStatus::Published,
        );
    }

    #[test]
    fn test_sanitized_strips_correctness() {
        let json = serde_json::to_value(question("q1").sanitized()).unwrap();
        assert!(json["options"][0].get("is_correct").is_none());
        assert_eq!(json["options"][0]["key"], "a");
    }

    #[test]
    fn test_duplicate_option_keys_rejected() {
        let input = QuestionInput {
            text: "Which?".to_string(),
            options: vec![
                OptionInput {
                    key: "a".to_string(),
                    text: "A".to_string(),
                    is_correct: true,
                },
                OptionInput {
                    key: "a".to_string(),
                    text: "B".to_string(),
                    is_correct: false,
                },
            ],
            time_limit_seconds: 60,
            max_marks: 10,
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn test_single_option_rejected() {
        let input = QuestionInput {
            text: "Which?".to_string(),
            options: vec![OptionInput {
                key: "a".to_string(),
                text: "A".to_string(),
                is_correct: true,
            }],
            time_limit_seconds: 60,
            max_marks: 10,
        };
        assert!(input.validate().is_err());
    }
}
