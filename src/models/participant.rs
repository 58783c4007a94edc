// src/models/participant.rs

use std::{
    cmp::Ordering,
    collections::HashMap,
    sync::LazyLock,
};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::quiz::Question;

/// Join codes use the generator's alphabet: no `0`, `O` or `I`.
static JOIN_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-HJ-NP-Z1-9]{6}$").unwrap());

/// Key a participant is de-duplicated on within one quiz.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    /// Authenticated joiner.
    Identity(String),
    /// Anonymous joiner, unique only by display name.
    DisplayName(String),
}

impl IdentityKey {
    pub fn for_join(identity_id: Option<&str>, display_name: &str) -> Self {
        match identity_id {
            Some(id) => IdentityKey::Identity(id.to_string()),
            None => IdentityKey::DisplayName(display_name.to_string()),
        }
    }

    /// Stored form of the key, unique per quiz.
    pub fn as_key(&self) -> String {
        match self {
            IdentityKey::Identity(id) => format!("id:{}", id),
            IdentityKey::DisplayName(name) => format!("name:{}", name),
        }
    }
}

/// A scored answer. At most one per question per participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResponse {
    pub question_id: String,
    pub selected_option_key: String,
    pub time_left_seconds: f64,
    pub awarded_marks: f64,
    pub answered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub participant_id: String,
    pub quiz_id: String,
    /// Code the participant joined with, kept for audit.
    pub join_code: String,
    pub display_name: String,
    pub identity_id: Option<String>,
    #[serde(skip)]
    pub identity_key: String,
    pub total_score: f64,
    pub responses: Vec<QuestionResponse>,
    pub joined_at: DateTime<Utc>,
    pub last_answer_at: Option<DateTime<Utc>>,
    /// Store-assigned arrival order, breaks `joined_at` ties.
    #[serde(skip)]
    pub join_seq: i64,
}

/// Result of appending a response to a participant row.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Recorded(Participant),
    /// The question was already answered; carries the marks awarded the first time.
    Duplicate { awarded_marks: f64 },
}

impl Participant {
    pub fn response_for(&self, question_id: &str) -> Option<&QuestionResponse> {
        self.responses.iter().find(|r| r.question_id == question_id)
    }

    /// Appends the response unless the question was already answered.
    /// The first accepted answer for a question is final.
    pub fn record(&mut self, response: QuestionResponse) -> RecordOutcome {
        if let Some(existing) = self.response_for(&response.question_id) {
            return RecordOutcome::Duplicate {
                awarded_marks: existing.awarded_marks,
            };
        }
        self.total_score = round2(self.total_score + response.awarded_marks);
        self.last_answer_at = Some(response.answered_at);
        self.responses.push(response);
        RecordOutcome::Recorded(self.clone())
    }
}

/// Rounds to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Client-reported remaining time, bounded to `[0, limit]`.
pub fn clamp_time_left(claimed: f64, time_limit_seconds: u32) -> f64 {
    if claimed.is_nan() {
        return 0.0;
    }
    claimed.clamp(0.0, f64::from(time_limit_seconds))
}

/// Linear speed reward: full marks with the whole window left, zero at the end.
pub fn score_answer(question: &Question, correct: bool, time_left_seconds: f64) -> f64 {
    if !correct || question.time_limit_seconds == 0 {
        return 0.0;
    }
    let fraction = time_left_seconds / f64::from(question.time_limit_seconds);
    round2(fraction * f64::from(question.max_marks))
}

/// Score descending, then earliest join first.
pub fn leaderboard_order(a: &Participant, b: &Participant) -> Ordering {
    b.total_score
        .partial_cmp(&a.total_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.joined_at.cmp(&b.joined_at))
        .then_with(|| a.join_seq.cmp(&b.join_seq))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub display_name: String,
    pub total_score: f64,
    pub answered: usize,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leaderboard {
    pub quiz_id: String,
    pub participant_count: usize,
    pub entries: Vec<LeaderboardEntry>,
}

impl Leaderboard {
    pub fn build(quiz_id: &str, mut participants: Vec<Participant>) -> Self {
        participants.sort_by(leaderboard_order);
        let entries = participants
            .into_iter()
            .enumerate()
            .map(|(i, p)| LeaderboardEntry {
                rank: i + 1,
                answered: p.responses.len(),
                display_name: p.display_name,
                total_score: p.total_score,
                joined_at: p.joined_at,
            })
            .collect::<Vec<_>>();

        Self {
            quiz_id: quiz_id.to_string(),
            participant_count: entries.len(),
            entries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionTally {
    pub key: String,
    pub count: u64,
}

/// Per-option vote counts for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteTally {
    pub question_id: String,
    pub total: u64,
    pub options: Vec<OptionTally>,
}

impl VoteTally {
    /// Counts the responses to `question` across `participants`, listing every
    /// option in question order, including those nobody picked.
    pub fn count(question: &Question, participants: &[Participant]) -> Self {
        let mut counts: HashMap<&str, u64> = HashMap::new();
        for response in participants
            .iter()
            .filter_map(|p| p.response_for(&question.question_id))
        {
            *counts.entry(response.selected_option_key.as_str()).or_default() += 1;
        }

        let options: Vec<OptionTally> = question
            .options
            .iter()
            .map(|o| OptionTally {
                key: o.key.clone(),
                count: counts.get(o.key.as_str()).copied().unwrap_or(0),
            })
            .collect();

        Self {
            question_id: question.question_id.clone(),
            total: options.iter().map(|o| o.count).sum(),
            options,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantList {
    pub quiz_id: String,
    pub participant_count: usize,
    pub participants: Vec<Participant>,
}

/// DTO for joining a quiz by its code.
#[derive(Debug, Deserialize, Validate)]
pub struct JoinRequest {
    #[validate(regex(path = *JOIN_CODE_RE, message = "Join code must be 6 characters."))]
    pub join_code: String,
    #[validate(length(
        min = 1,
        max = 40,
        message = "Display name length must be between 1 and 40 characters."
    ))]
    pub display_name: String,
}

impl JoinRequest {
    /// Codes are shown upper-case; accept whatever case the user typed.
    pub fn normalize(&mut self) {
        self.join_code = self.join_code.trim().to_uppercase();
        self.display_name = self.display_name.trim().to_string();
    }
}

/// DTO for submitting an answer to the question on screen.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitAnswerRequest {
    #[validate(length(min = 1, max = 64))]
    pub participant_id: String,
    #[validate(length(min = 1, max = 64))]
    pub question_id: String,
    #[validate(length(min = 1, max = 16))]
    pub selected_option_key: String,
    /// Remaining seconds as reported by the client; clamped server-side.
    pub time_left_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerReceipt {
    pub question_id: String,
    pub awarded_marks: f64,
    /// True when this submission repeated an already recorded answer.
    pub duplicate: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::quiz::QuestionOption;

    fn question() -> Question {
        Question {
            question_id: "q1".to_string(),
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

    fn participant(id: &str, score: f64, seq: i64) -> Participant {
        Participant {
            participant_id: id.to_string(),
            quiz_id: "quiz".to_string(),
            join_code: "ABCDEF".to_string(),
            display_name: id.to_string(),
            identity_id: None,
            identity_key: format!("name:{}", id),
            total_score: score,
            responses: vec![],
            joined_at: Utc::now(),
            last_answer_at: None,
            join_seq: seq,
        }
    }

    fn response(question_id: &str, key: &str, marks: f64) -> QuestionResponse {
        QuestionResponse {
            question_id: question_id.to_string(),
            selected_option_key: key.to_string(),
            time_left_seconds: 30.0,
            awarded_marks: marks,
            answered_at: Utc::now(),
        }
    }

    #[test]
    fn test_score_full_half_zero() {
        let q = question();
        assert_eq!(score_answer(&q, true, clamp_time_left(60.0, 60)), 10.0);
        assert_eq!(score_answer(&q, true, clamp_time_left(30.0, 60)), 5.0);
        assert_eq!(score_answer(&q, true, clamp_time_left(0.0, 60)), 0.0);
    }

    #[test]
    fn test_incorrect_scores_zero() {
        let q = question();
        assert_eq!(score_answer(&q, false, 60.0), 0.0);
    }

    #[test]
    fn test_time_left_is_clamped() {
        assert_eq!(clamp_time_left(999.0, 60), 60.0);
        assert_eq!(clamp_time_left(-5.0, 60), 0.0);
        assert_eq!(clamp_time_left(f64::NAN, 60), 0.0);
        assert_eq!(clamp_time_left(f64::INFINITY, 60), 60.0);
    }

    #[test]
    fn test_score_rounds_to_two_places() {
        let mut q = question();
        q.time_limit_seconds = 7;
        q.max_marks = 10;
        // 3/7 * 10 = 4.2857...
        assert_eq!(score_answer(&q, true, 3.0), 4.29);
    }

    #[test]
    fn test_second_answer_is_noop() {
        let mut p = participant("p", 0.0, 1);
        assert!(matches!(
            p.record(response("q1", "a", 7.5)),
            RecordOutcome::Recorded(_)
        ));
        assert_eq!(
            p.record(response("q1", "b", 0.0)),
            RecordOutcome::Duplicate { awarded_marks: 7.5 }
        );
        assert_eq!(p.responses.len(), 1);
        assert_eq!(p.total_score, 7.5);

        p.record(response("q2", "a", 2.25));
        assert_eq!(p.total_score, 9.75);
    }

    #[test]
    fn test_leaderboard_ties_by_join_order() {
        let now = Utc::now();
        let mut c = participant("C", 5.0, 1);
        let mut a = participant("A", 10.0, 2);
        let mut b = participant("B", 10.0, 3);
        c.joined_at = now;
        a.joined_at = now;
        b.joined_at = now;

        let board = Leaderboard::build("quiz", vec![c, b, a]);
        let order: Vec<&str> = board
            .entries
            .iter()
            .map(|e| e.display_name.as_str())
            .collect();
        assert_eq!(order, vec!["A", "B", "C"]);
        assert_eq!(board.entries[0].rank, 1);
        assert_eq!(board.participant_count, 3);
    }

    #[test]
    fn test_vote_tally_lists_every_option() {
        let q = question();
        let mut p1 = participant("p1", 0.0, 1);
        let mut p2 = participant("p2", 0.0, 2);
        let p3 = participant("p3", 0.0, 3);
        p1.record(response("q1", "a", 5.0));
        p2.record(response("q1", "a", 5.0));

        let tally = VoteTally::count(&q, &[p1, p2, p3]);
        assert_eq!(tally.total, 2);
        assert_eq!(
            tally.options,
            vec![
                OptionTally {
                    key: "a".to_string(),
                    count: 2
                },
                OptionTally {
                    key: "b".to_string(),
                    count: 0
                },
            ]
        );
    }

    #[test]
    fn test_join_code_validation() {
        let mut req = JoinRequest {
            join_code: " abcdef ".to_string(),
            display_name: " Ann ".to_string(),
        };
        req.normalize();
        assert!(req.validate().is_ok());
        assert_eq!(req.display_name, "Ann");

        let bad = JoinRequest {
            join_code: "ABCDE0".to_string(),
            display_name: "Ann".to_string(),
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_identity_key_forms() {
        assert_eq!(IdentityKey::for_join(Some("u1"), "Ann").as_key(), "id:u1");
        assert_eq!(IdentityKey::for_join(None, "Ann").as_key(), "name:Ann");
    }
}
