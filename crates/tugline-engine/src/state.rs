//! The Session Runtime State: the single value the engine actor owns.
//!
//! This struct (plus its nested snapshots) is exactly what the state
//! store persists between commands and across hibernation. Serializing
//! then deserializing it yields an equivalent engine; everything else the
//! actor holds (timers, connections) is reconstructed on wake.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tugline_protocol::{
    AnswerId, AnswerOptionView, ConnectionStatus, GameStateView, InstanceId,
    Phase, QuestionId, QuestionView, Role, SessionId, Side, StreakView,
    StudentId, StudentView, TeamId, TeamView, TenantId, POSITION_START,
};
use tugline_store::{Roster, Ruleset};

// ---------------------------------------------------------------------------
// Nested snapshots
// ---------------------------------------------------------------------------

/// One of the two tug teams, with its running score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamSnapshot {
    pub id: TeamId,
    pub name: String,
    pub color: String,
    pub side: Side,
    pub score: u32,
}

/// A roster entry as the engine tracks it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentSnapshot {
    pub id: StudentId,
    pub nickname: String,
    pub team_id: Option<TeamId>,
    pub status: ConnectionStatus,
}

/// One answer option of the asked question, correctness included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerOption {
    pub id: AnswerId,
    pub text: String,
    pub is_correct: bool,
}

/// The immutable ask-time snapshot of a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionInstance {
    pub id: InstanceId,
    pub question_id: QuestionId,
    pub index: u32,
    pub text: String,
    pub question_type: String,
    pub difficulty: Option<String>,
    pub options: Vec<AnswerOption>,
    pub correct_answer_id: AnswerId,
    pub time_limit_ms: u64,
    pub base_points: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl QuestionInstance {
    /// Whether `id` is one of this question's options.
    pub fn has_option(&self, id: AnswerId) -> bool {
        self.options.iter().any(|o| o.id == id)
    }

    /// Projects the instance for a client.
    ///
    /// `include_correct` is true only for teacher connections, or for
    /// everyone once the phase is `reveal`.
    pub fn view(&self, include_correct: bool) -> QuestionView {
        QuestionView {
            id: self.id,
            text: self.text.clone(),
            answers: self
                .options
                .iter()
                .map(|o| AnswerOptionView {
                    id: o.id,
                    text: o.text.clone(),
                    is_correct: include_correct.then_some(o.is_correct),
                })
                .collect(),
            question_type: self.question_type.clone(),
            difficulty: self.difficulty.clone(),
            time_limit_ms: self.time_limit_ms,
            points: self.base_points,
        }
    }
}

/// An admitted answer, kept in memory for the current question only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub answer_id: AnswerId,
    pub is_correct: bool,
    pub response_time_ms: u64,
    pub points_awarded: u32,
    pub team_id: Option<TeamId>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// RuntimeState
// ---------------------------------------------------------------------------

/// Everything the engine knows about one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeState {
    pub session_id: SessionId,
    /// Unset until `init` provides it.
    pub tenant_id: Option<TenantId>,
    pub phase: Phase,
    pub position: f64,
    pub question_ids: Vec<QuestionId>,
    /// −1 before the first question starts.
    pub current_question_index: i32,
    pub current_question: Option<QuestionInstance>,
    /// Wall-clock instant the active question must end; recomputed into a
    /// monotonic timer on wake. `None` while idle or paused.
    pub deadline_at: Option<DateTime<Utc>>,
    /// Remaining question time frozen by a pause.
    pub pause_remaining_ms: Option<u64>,
    pub teams: Vec<TeamSnapshot>,
    pub students: Vec<StudentSnapshot>,
    pub streaks: HashMap<TeamId, StreakView>,
    /// Admissions for the current question; cleared when one starts.
    pub answers: HashMap<StudentId, Attempt>,
    pub ruleset: Ruleset,
    pub started_at: Option<DateTime<Utc>>,
    pub last_event_id: u64,
    pub snapshot_version: u64,
}

impl RuntimeState {
    /// Builds a fresh lobby-phase state from the stored roster.
    ///
    /// Sides follow team creation order: first team pulls left.
    pub fn bootstrap(session_id: SessionId, roster: Roster) -> Self {
        let teams: Vec<TeamSnapshot> = roster
            .teams
            .into_iter()
            .enumerate()
            .map(|(i, t)| TeamSnapshot {
                id: t.id,
                name: t.name,
                color: t.color,
                side: if i == 0 { Side::Left } else { Side::Right },
                score: 0,
            })
            .collect();
        let streaks = teams
            .iter()
            .map(|t| (t.id, StreakView::default()))
            .collect();
        let students = roster
            .students
            .into_iter()
            .map(|s| StudentSnapshot {
                id: s.id,
                nickname: s.nickname,
                team_id: s.team_id,
                // Everyone starts disconnected; attach flips them.
                status: ConnectionStatus::Disconnected,
            })
            .collect();

        Self {
            session_id,
            tenant_id: None,
            phase: Phase::Lobby,
            position: POSITION_START,
            question_ids: Vec::new(),
            current_question_index: -1,
            current_question: None,
            deadline_at: None,
            pause_remaining_ms: None,
            teams,
            students,
            streaks,
            answers: HashMap::new(),
            ruleset: Ruleset::default(),
            started_at: None,
            last_event_id: 0,
            snapshot_version: 0,
        }
    }

    /// Serializes the state for the state store.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserializes a state-store blob.
    pub fn decode(blob: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(blob)
    }

    pub fn team(&self, id: TeamId) -> Option<&TeamSnapshot> {
        self.teams.iter().find(|t| t.id == id)
    }

    pub fn team_mut(&mut self, id: TeamId) -> Option<&mut TeamSnapshot> {
        self.teams.iter_mut().find(|t| t.id == id)
    }

    pub fn student(&self, id: StudentId) -> Option<&StudentSnapshot> {
        self.students.iter().find(|s| s.id == id)
    }

    pub fn student_mut(&mut self, id: StudentId) -> Option<&mut StudentSnapshot> {
        self.students.iter_mut().find(|s| s.id == id)
    }

    /// The team pulling toward the given side, if it exists.
    pub fn team_on_side(&self, side: Side) -> Option<&TeamSnapshot> {
        self.teams.iter().find(|t| t.side == side)
    }

    pub fn total_questions(&self) -> u32 {
        self.question_ids.len() as u32
    }

    /// The winning team for the current rope position: whichever side the
    /// rope sits nearer to, `None` when exactly centered.
    pub fn winner(&self) -> Option<&TeamSnapshot> {
        if self.position < POSITION_START {
            self.team_on_side(Side::Left)
        } else if self.position > POSITION_START {
            self.team_on_side(Side::Right)
        } else {
            None
        }
    }

    pub fn team_views(&self) -> Vec<TeamView> {
        self.teams
            .iter()
            .map(|t| TeamView {
                id: t.id,
                name: t.name.clone(),
                color: t.color.clone(),
                side: t.side,
                score: t.score,
                streak: self.streaks.get(&t.id).copied().unwrap_or_default(),
            })
            .collect()
    }

    pub fn student_views(&self) -> Vec<StudentView> {
        self.students
            .iter()
            .filter(|s| s.status != ConnectionStatus::Kicked)
            .map(|s| StudentView {
                id: s.id,
                nickname: s.nickname.clone(),
                team_id: s.team_id,
                connected: s.status == ConnectionStatus::Connected,
            })
            .collect()
    }

    /// Builds the role-projected snapshot delivered in `STATE_SNAPSHOT`.
    ///
    /// Students see the correct-answer projection only once the phase is
    /// `reveal`; teachers always do.
    pub fn view(&self, role: Role) -> GameStateView {
        let include_correct =
            role == Role::Teacher || self.phase == Phase::Reveal;
        GameStateView {
            session_id: self.session_id,
            phase: self.phase,
            position: self.position,
            question_index: self.current_question_index,
            total_questions: self.total_questions(),
            teams: self.team_views(),
            students: self.student_views(),
            current_question: self
                .current_question
                .as_ref()
                .map(|q| q.view(include_correct)),
            snapshot_version: self.snapshot_version,
            started_at: self.started_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tugline_store::{RosterStudent, RosterTeam};

    fn roster() -> Roster {
        Roster {
            teams: vec![
                RosterTeam {
                    id: TeamId::new(),
                    name: "Red".into(),
                    color: "#f00".into(),
                },
                RosterTeam {
                    id: TeamId::new(),
                    name: "Blue".into(),
                    color: "#00f".into(),
                },
            ],
            students: vec![RosterStudent {
                id: StudentId::new(),
                nickname: "ada".into(),
                team_id: None,
                status: ConnectionStatus::Disconnected,
            }],
        }
    }

    fn instance() -> QuestionInstance {
        let correct = AnswerId::new();
        QuestionInstance {
            id: InstanceId::new(),
            question_id: QuestionId::new(),
            index: 0,
            text: "2+2?".into(),
            question_type: "multiple_choice".into(),
            difficulty: None,
            options: vec![
                AnswerOption {
                    id: correct,
                    text: "4".into(),
                    is_correct: true,
                },
                AnswerOption {
                    id: AnswerId::new(),
                    text: "5".into(),
                    is_correct: false,
                },
            ],
            correct_answer_id: correct,
            time_limit_ms: 30_000,
            base_points: 10,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    #[test]
    fn test_bootstrap_assigns_sides_by_creation_order() {
        let state = RuntimeState::bootstrap(SessionId::new(), roster());
        assert_eq!(state.teams[0].side, Side::Left);
        assert_eq!(state.teams[1].side, Side::Right);
        assert_eq!(state.phase, Phase::Lobby);
        assert_eq!(state.position, POSITION_START);
        assert_eq!(state.current_question_index, -1);
    }

    #[test]
    fn test_encode_decode_round_trip_is_lossless() {
        let mut state = RuntimeState::bootstrap(SessionId::new(), roster());
        state.phase = Phase::ActiveQuestion;
        state.position = 48.6;
        state.current_question = Some(instance());
        state.snapshot_version = 7;
        state.answers.insert(
            state.students[0].id,
            Attempt {
                answer_id: AnswerId::new(),
                is_correct: true,
                response_time_ms: 3_000,
                points_awarded: 14,
                team_id: Some(state.teams[0].id),
                created_at: Utc::now(),
            },
        );

        let blob = state.encode().unwrap();
        let back = RuntimeState::decode(&blob).unwrap();
        assert_eq!(state, back);
    }

    #[test]
    fn test_student_view_never_carries_correctness_while_active() {
        let mut state = RuntimeState::bootstrap(SessionId::new(), roster());
        state.phase = Phase::ActiveQuestion;
        state.current_question = Some(instance());

        let view = state.view(Role::Student);
        let q = view.current_question.unwrap();
        assert!(q.answers.iter().all(|a| a.is_correct.is_none()));
    }

    #[test]
    fn test_teacher_view_carries_correctness_while_active() {
        let mut state = RuntimeState::bootstrap(SessionId::new(), roster());
        state.phase = Phase::ActiveQuestion;
        state.current_question = Some(instance());

        let view = state.view(Role::Teacher);
        let q = view.current_question.unwrap();
        assert!(q.answers.iter().any(|a| a.is_correct == Some(true)));
    }

    #[test]
    fn test_student_view_gains_correctness_at_reveal() {
        let mut state = RuntimeState::bootstrap(SessionId::new(), roster());
        state.phase = Phase::Reveal;
        let mut q = instance();
        q.ended_at = Some(Utc::now());
        state.current_question = Some(q);

        let view = state.view(Role::Student);
        let q = view.current_question.unwrap();
        assert!(q.answers.iter().any(|a| a.is_correct == Some(true)));
    }

    #[test]
    fn test_winner_is_side_the_rope_favors() {
        let mut state = RuntimeState::bootstrap(SessionId::new(), roster());
        assert!(state.winner().is_none());

        state.position = 31.0;
        assert_eq!(state.winner().unwrap().side, Side::Left);

        state.position = 77.5;
        assert_eq!(state.winner().unwrap().side, Side::Right);
    }

    #[test]
    fn test_kicked_students_drop_out_of_views() {
        let mut state = RuntimeState::bootstrap(SessionId::new(), roster());
        let sid = state.students[0].id;
        state.student_mut(sid).unwrap().status = ConnectionStatus::Kicked;
        assert!(state.student_views().is_empty());
    }
}
