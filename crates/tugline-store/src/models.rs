//! Row models and write records for the storage adapter.
//!
//! Raw `*Row` structs mirror the relational schema (`sqlx::FromRow`,
//! database-native integer widths); the public record types the engine
//! consumes are converted from them so the rest of the system never sees
//! `i32`/`i64` plumbing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tugline_protocol::{
    AnswerId, ConnectionStatus, InstanceId, QuestionId, RulesetId, SessionId,
    StrengthReason, StudentId, TeamId, DEFAULT_STREAK_MULTIPLIER,
    DEFAULT_STREAK_THRESHOLD,
};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Question content (read-only to the core)
// ---------------------------------------------------------------------------

/// A bank question, assembled from its row plus its option rows.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionRecord {
    pub id: QuestionId,
    pub text: String,
    pub question_type: String,
    pub difficulty: Option<String>,
    pub time_limit_ms: u64,
    pub base_points: u32,
    pub options: Vec<AnswerOptionRecord>,
}

impl QuestionRecord {
    /// The id of the single correct option.
    ///
    /// Question content is validated at authoring time to have exactly
    /// one correct option; a row that lost it is surfaced as corrupt by
    /// the adapter before this is called.
    pub fn correct_answer_id(&self) -> Option<AnswerId> {
        self.options.iter().find(|o| o.is_correct).map(|o| o.id)
    }
}

/// One answer option of a bank question.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerOptionRecord {
    pub id: AnswerId,
    pub text: String,
    pub is_correct: bool,
}

#[derive(Debug, FromRow)]
pub(crate) struct QuestionRow {
    pub id: Uuid,
    pub text: String,
    pub question_type: String,
    pub difficulty: Option<String>,
    pub time_limit_ms: i64,
    pub base_points: i32,
}

#[derive(Debug, FromRow)]
pub(crate) struct AnswerOptionRow {
    pub id: Uuid,
    pub text: String,
    pub is_correct: bool,
}

impl QuestionRow {
    pub(crate) fn assemble(self, options: Vec<AnswerOptionRow>) -> QuestionRecord {
        QuestionRecord {
            id: QuestionId(self.id),
            text: self.text,
            question_type: self.question_type,
            difficulty: self.difficulty,
            time_limit_ms: self.time_limit_ms.max(0) as u64,
            base_points: self.base_points.max(0) as u32,
            options: options
                .into_iter()
                .map(|o| AnswerOptionRecord {
                    id: AnswerId(o.id),
                    text: o.text,
                    is_correct: o.is_correct,
                })
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Rulesets
// ---------------------------------------------------------------------------

/// Scoring rules for a session.
///
/// `points_per_correct` and `time_limit_ms` are overrides — when unset,
/// each question instance's own recorded values apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ruleset {
    pub points_per_correct: Option<u32>,
    pub points_for_speed: bool,
    pub streak_bonus: bool,
    pub streak_threshold: u32,
    pub streak_multiplier: f64,
    pub time_limit_ms: Option<u64>,
}

impl Default for Ruleset {
    fn default() -> Self {
        Self {
            points_per_correct: None,
            points_for_speed: true,
            streak_bonus: true,
            streak_threshold: DEFAULT_STREAK_THRESHOLD,
            streak_multiplier: DEFAULT_STREAK_MULTIPLIER,
            time_limit_ms: None,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct RulesetRow {
    pub points_per_correct: i32,
    pub points_for_speed: bool,
    pub streak_bonus: bool,
    pub streak_threshold: i32,
    pub streak_multiplier: f64,
    pub time_limit_ms: Option<i64>,
}

impl From<RulesetRow> for Ruleset {
    fn from(row: RulesetRow) -> Self {
        Self {
            points_per_correct: Some(row.points_per_correct.max(0) as u32),
            points_for_speed: row.points_for_speed,
            streak_bonus: row.streak_bonus,
            streak_threshold: row.streak_threshold.max(0) as u32,
            streak_multiplier: row.streak_multiplier,
            time_limit_ms: row.time_limit_ms.map(|v| v.max(0) as u64),
        }
    }
}

// ---------------------------------------------------------------------------
// Roster
// ---------------------------------------------------------------------------

/// The two tug teams plus the non-kicked students of a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    /// Teams in creation order; the first one pulls left.
    pub teams: Vec<RosterTeam>,
    pub students: Vec<RosterStudent>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RosterTeam {
    pub id: TeamId,
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RosterStudent {
    pub id: StudentId,
    pub nickname: String,
    pub team_id: Option<TeamId>,
    pub status: ConnectionStatus,
}

#[derive(Debug, FromRow)]
pub(crate) struct TeamRow {
    pub id: Uuid,
    pub name: String,
    pub color: String,
}

#[derive(Debug, FromRow)]
pub(crate) struct StudentRow {
    pub id: Uuid,
    pub nickname: String,
    pub team_id: Option<Uuid>,
    pub connection_status: String,
}

impl From<TeamRow> for RosterTeam {
    fn from(row: TeamRow) -> Self {
        Self {
            id: TeamId(row.id),
            name: row.name,
            color: row.color,
        }
    }
}

impl From<StudentRow> for RosterStudent {
    fn from(row: StudentRow) -> Self {
        Self {
            id: StudentId(row.id),
            nickname: row.nickname,
            team_id: row.team_id.map(TeamId),
            status: connection_status_from_str(&row.connection_status),
        }
    }
}

// ---------------------------------------------------------------------------
// Write records (append-only event log + status updates)
// ---------------------------------------------------------------------------

/// A question instance to persist at ask-time. Immutable once written,
/// except for the later `ended_at` stamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewQuestionInstance {
    pub id: InstanceId,
    pub session_id: SessionId,
    pub question_id: QuestionId,
    pub question_index: u32,
    pub text: String,
    /// The full option set (including correctness flags) as JSON.
    pub options: serde_json::Value,
    pub correct_answer_id: AnswerId,
    pub time_limit_ms: u64,
    pub base_points: u32,
    pub started_at: DateTime<Utc>,
}

/// One student's answer to a question instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAttempt {
    pub instance_id: InstanceId,
    pub student_id: StudentId,
    pub answer_id: AnswerId,
    pub is_correct: bool,
    pub response_time_ms: u64,
    pub points_awarded: u32,
    pub created_at: DateTime<Utc>,
}

/// One rope movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStrengthEvent {
    pub session_id: SessionId,
    pub team_id: TeamId,
    /// Signed delta scaled ×10 (a wire delta of −1.4 is stored as −14).
    pub delta_scaled: i64,
    pub reason: StrengthReason,
    pub new_position: f64,
    /// Who caused the movement: a student id or the teacher's user id.
    pub triggered_by: Uuid,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Enum column spellings
// ---------------------------------------------------------------------------

pub(crate) fn strength_reason_as_str(reason: StrengthReason) -> &'static str {
    match reason {
        StrengthReason::CorrectAnswer => "correct_answer",
        StrengthReason::StreakBonus => "streak_bonus",
        StrengthReason::ManualAdjust => "manual_adjust",
    }
}

pub(crate) fn connection_status_as_str(status: ConnectionStatus) -> &'static str {
    match status {
        ConnectionStatus::Connected => "connected",
        ConnectionStatus::Disconnected => "disconnected",
        ConnectionStatus::Kicked => "kicked",
    }
}

pub(crate) fn connection_status_from_str(s: &str) -> ConnectionStatus {
    match s {
        "connected" => ConnectionStatus::Connected,
        "kicked" => ConnectionStatus::Kicked,
        _ => ConnectionStatus::Disconnected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ruleset_defers_to_question_values() {
        let rules = Ruleset::default();
        assert_eq!(rules.points_per_correct, None);
        assert_eq!(rules.time_limit_ms, None);
        assert!(rules.points_for_speed);
        assert!(rules.streak_bonus);
        assert_eq!(rules.streak_threshold, 3);
        assert_eq!(rules.streak_multiplier, 1.5);
    }

    #[test]
    fn test_correct_answer_id_finds_the_flagged_option() {
        let correct = AnswerId::new();
        let q = QuestionRecord {
            id: QuestionId::new(),
            text: "capital of France?".into(),
            question_type: "multiple_choice".into(),
            difficulty: None,
            time_limit_ms: 30_000,
            base_points: 10,
            options: vec![
                AnswerOptionRecord {
                    id: AnswerId::new(),
                    text: "Lyon".into(),
                    is_correct: false,
                },
                AnswerOptionRecord {
                    id: correct,
                    text: "Paris".into(),
                    is_correct: true,
                },
            ],
        };
        assert_eq!(q.correct_answer_id(), Some(correct));
    }

    #[test]
    fn test_connection_status_round_trips_through_column_spelling() {
        for status in [
            ConnectionStatus::Connected,
            ConnectionStatus::Disconnected,
            ConnectionStatus::Kicked,
        ] {
            let s = connection_status_as_str(status);
            assert_eq!(connection_status_from_str(s), status);
        }
    }
}
