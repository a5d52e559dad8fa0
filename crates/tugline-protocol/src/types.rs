//! Core protocol types for Tugline's wire format.
//!
//! Everything that travels between a client (teacher console or student
//! play view) and the session engine is defined here, together with the
//! identifier newtypes and enumerations shared by every other crate.
//!
//! Wire conventions, pinned by shape tests at the bottom of this file:
//! message `type` tags are SCREAMING_SNAKE_CASE, field names are
//! camelCase, and enumeration values (`phase`, `side`, strength-event
//! `reason`) are snake_case strings.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generates a fresh random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

uuid_id!(
    /// A game session (one running trivia match).
    SessionId, "sess"
);
uuid_id!(
    /// The tenant (school / organization) a session belongs to.
    TenantId, "tenant"
);
uuid_id!(
    /// A student within a session's roster.
    StudentId, "student"
);
uuid_id!(
    /// One of the two tug teams in a session.
    TeamId, "team"
);
uuid_id!(
    /// A question in the bank (content owned by the REST layer).
    QuestionId, "q"
);
uuid_id!(
    /// An immutable snapshot of a question at ask-time.
    InstanceId, "qi"
);
uuid_id!(
    /// An answer option within a question.
    AnswerId, "ans"
);
uuid_id!(
    /// A scoring ruleset row.
    RulesetId, "rules"
);

/// Opaque identifier for a single client connection.
///
/// Connection ids are process-local counters, never persisted and never
/// sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// The lifecycle phase of a session.
///
/// ```text
/// lobby ──(init)──→ ready ──→ active_question ⇄ paused
///                      │            │  ↑
///                      │            ▼  │
///                      │         reveal┘
///                      └────────────┴──────→ completed
/// ```
///
/// The full transition table lives with the engine's phase machine; this
/// type only pins the wire spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Lobby,
    Ready,
    ActiveQuestion,
    Reveal,
    Paused,
    Completed,
}

impl Phase {
    /// Returns `true` once the session can never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Lobby => "lobby",
            Self::Ready => "ready",
            Self::ActiveQuestion => "active_question",
            Self::Reveal => "reveal",
            Self::Paused => "paused",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Which endpoint of the rope a team pulls toward.
///
/// `left` is position 0, `right` is position 100. Sides are assigned by
/// team creation order: the first-created team is `left`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// The sign of a tug delta for this side (`left` pulls negative).
    pub fn direction(self) -> f64 {
        match self {
            Self::Left => -1.0,
            Self::Right => 1.0,
        }
    }

    /// The rope position this side is pulling toward.
    pub fn endpoint(self) -> f64 {
        match self {
            Self::Left => crate::POSITION_MIN,
            Self::Right => crate::POSITION_MAX,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Left => f.write_str("left"),
            Self::Right => f.write_str("right"),
        }
    }
}

/// Why the rope moved. Stamped onto every persisted strength event and
/// every `TUG_UPDATE` broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrengthReason {
    CorrectAnswer,
    StreakBonus,
    ManualAdjust,
}

/// A student's connection status as persisted on the roster row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Kicked,
}

/// The authenticated role of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

/// Error codes carried by `ERROR` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidToken,
    SessionNotFound,
    SessionEnded,
    NotAuthorized,
    AlreadyAnswered,
    QuestionExpired,
    InvalidAnswer,
    RateLimited,
    InvalidMessage,
    Kicked,
    InternalError,
}

// ---------------------------------------------------------------------------
// Projections (state views sent to clients)
// ---------------------------------------------------------------------------

/// One answer option as shown to a client.
///
/// `is_correct` is only populated on the teacher projection of an active
/// question; the student projection omits the field entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOptionView {
    pub id: AnswerId,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
}

/// The asked question as shown to a client.
///
/// `id` is the question *instance* id — the one clients echo back in
/// `SUBMIT_ANSWER`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub id: InstanceId,
    pub text: String,
    pub answers: Vec<AnswerOptionView>,
    #[serde(rename = "type")]
    pub question_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    pub time_limit_ms: u64,
    pub points: u32,
}

/// A team's current streak of consecutive correct answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakView {
    pub current: u32,
    pub max: u32,
}

/// A team as shown to clients (roster updates, snapshots, game end).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamView {
    pub id: TeamId,
    pub name: String,
    pub color: String,
    pub side: Side,
    pub score: u32,
    pub streak: StreakView,
}

/// A roster entry as shown to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentView {
    pub id: StudentId,
    pub nickname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<TeamId>,
    pub connected: bool,
}

/// The full game state projection delivered in `STATE_SNAPSHOT`.
///
/// Built per-role by the engine: the student projection never carries
/// correct-answer information for an active question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateView {
    pub session_id: SessionId,
    pub phase: Phase,
    pub position: f64,
    pub question_index: i32,
    pub total_questions: u32,
    pub teams: Vec<TeamView>,
    pub students: Vec<StudentView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_question: Option<QuestionView>,
    pub snapshot_version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

/// Per-team aggregate stats for one revealed question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamStatView {
    pub team_id: TeamId,
    pub attempts: u32,
    pub correct: u32,
    pub avg_response_ms: u64,
}

/// Aggregate stats carried by `QUESTION_REVEAL`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionStats {
    pub total_attempts: u32,
    pub correct_attempts: u32,
    pub team_stats: Vec<TeamStatView>,
}

/// The wrap-up summary carried by `GAME_END`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSummary {
    /// Total game duration in milliseconds, measured from `init`.
    pub duration: u64,
    pub total_questions: u32,
}

// ---------------------------------------------------------------------------
// Client → server messages
// ---------------------------------------------------------------------------

/// Messages a client may send to the session engine.
///
/// The first frame on every connection must be `HELLO`; everything else
/// is rejected until the connection is authenticated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    /// Authenticate the connection. `reconnect` + `last_event_id` let a
    /// returning client tell the server what it last observed; the server
    /// answers with a full snapshot either way.
    Hello {
        token: String,
        client_msg_id: Option<String>,
        #[serde(default)]
        reconnect: bool,
        last_event_id: Option<u64>,
    },

    /// Student: switch (or first pick) team membership.
    JoinTeam {
        team_id: TeamId,
        client_msg_id: Option<String>,
    },

    /// Student: answer the current question. At most one admission per
    /// (instance, student) — duplicates yield `ALREADY_ANSWERED`.
    SubmitAnswer {
        instance_id: InstanceId,
        choice_id: AnswerId,
        client_msg_id: Option<String>,
    },

    /// Teacher: end the current question (if any) and advance, or end the
    /// game when no questions remain.
    TeacherNextQuestion {
        question_id: Option<QuestionId>,
        client_msg_id: Option<String>,
    },

    /// Teacher: freeze the question timer.
    TeacherPause { client_msg_id: Option<String> },

    /// Teacher: resume with the frozen remaining time.
    TeacherResume { client_msg_id: Option<String> },

    /// Teacher: force end-of-game.
    TeacherEndGame { client_msg_id: Option<String> },

    /// Teacher: nudge the rope directly, bypassing scoring.
    TeacherManualAdjust {
        delta: f64,
        reason: Option<String>,
        client_msg_id: Option<String>,
    },

    /// Teacher: remove a student from the session.
    TeacherKickPlayer {
        player_id: StudentId,
        client_msg_id: Option<String>,
    },

    /// Liveness probe; answered with `PONG`, never touches state.
    Ping { client_msg_id: Option<String> },
}

impl ClientMessage {
    /// The correlation id the client attached, if any.
    pub fn client_msg_id(&self) -> Option<&str> {
        match self {
            Self::Hello { client_msg_id, .. }
            | Self::JoinTeam { client_msg_id, .. }
            | Self::SubmitAnswer { client_msg_id, .. }
            | Self::TeacherNextQuestion { client_msg_id, .. }
            | Self::TeacherPause { client_msg_id }
            | Self::TeacherResume { client_msg_id }
            | Self::TeacherEndGame { client_msg_id }
            | Self::TeacherManualAdjust { client_msg_id, .. }
            | Self::TeacherKickPlayer { client_msg_id, .. }
            | Self::Ping { client_msg_id } => client_msg_id.as_deref(),
        }
    }

    /// Returns `true` for messages only a teacher may send.
    pub fn requires_teacher(&self) -> bool {
        matches!(
            self,
            Self::TeacherNextQuestion { .. }
                | Self::TeacherPause { .. }
                | Self::TeacherResume { .. }
                | Self::TeacherEndGame { .. }
                | Self::TeacherManualAdjust { .. }
                | Self::TeacherKickPlayer { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Server → client messages
// ---------------------------------------------------------------------------

/// Messages the session engine sends to clients.
///
/// This is the single canonical event set; legacy alternative shapes from
/// earlier protocol revisions are not emitted and fail to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// First reply after a successful `HELLO`.
    Welcome {
        session_id: SessionId,
        phase: Phase,
        #[serde(skip_serializing_if = "Option::is_none")]
        position: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        teams: Option<Vec<TeamView>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        students: Option<Vec<StudentView>>,
        role: Role,
        user_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        team_id: Option<TeamId>,
        server_time: DateTime<Utc>,
    },

    /// Full role-projected state; sent after `WELCOME` and on demand.
    StateSnapshot {
        state: GameStateView,
        snapshot_version: u64,
    },

    /// The set of teams/students changed (join, team switch, kick,
    /// connect, disconnect).
    RosterUpdate {
        teams: Vec<TeamView>,
        students: Vec<StudentView>,
        total_players: u32,
    },

    /// A student's connection came up.
    PlayerJoined {
        id: StudentId,
        nickname: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        team_id: Option<TeamId>,
    },

    /// A student was removed by the teacher.
    PlayerKicked {
        student_id: StudentId,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// A question went live. The embedded view is role-projected.
    Question {
        question: QuestionView,
        question_index: u32,
        total_questions: u32,
        starts_at: DateTime<Utc>,
        time_limit_ms: u64,
    },

    /// The phase machine moved (pause/resume/init edges that have no
    /// richer event of their own).
    PhaseChange {
        phase: Phase,
        previous_phase: Phase,
    },

    /// The rope moved. Broadcast in admission order to every client.
    TugUpdate {
        position: f64,
        delta: f64,
        reason: StrengthReason,
        team_id: TeamId,
        last_event_id: u64,
    },

    /// Targeted reply to the submitting student only.
    AnswerResult {
        correct: bool,
        correct_answer_id: AnswerId,
        delta: f64,
        new_position: f64,
        points_awarded: u32,
        response_time_ms: u64,
    },

    /// The question ended; carries the answer and aggregate stats.
    QuestionReveal {
        question_instance_id: InstanceId,
        correct_answer_id: AnswerId,
        #[serde(skip_serializing_if = "Option::is_none")]
        explanation: Option<String>,
        stats: QuestionStats,
    },

    /// The game is over.
    GameEnd {
        winner: Option<TeamView>,
        final_position: f64,
        summary: GameSummary,
    },

    /// Something was rejected; `code` says why.
    Error {
        code: ErrorCode,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        client_msg_id: Option<String>,
    },

    /// Positive acknowledgement for commands with no richer reply.
    Ack {
        #[serde(skip_serializing_if = "Option::is_none")]
        client_msg_id: Option<String>,
    },

    /// Reply to `PING`.
    Pong,
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! The wire format is consumed by two separate SPA clients; these
    //! tests pin the exact JSON shapes so a serde attribute change can't
    //! silently break them.

    use super::*;

    fn uuid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    // =====================================================================
    // Identity types
    // =====================================================================

    #[test]
    fn test_session_id_serializes_as_plain_uuid_string() {
        let id = SessionId(uuid(7));
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", uuid(7)));
    }

    #[test]
    fn test_session_id_round_trip() {
        let id = SessionId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn test_id_display_is_prefixed() {
        assert!(SessionId(uuid(1)).to_string().starts_with("sess-"));
        assert!(StudentId(uuid(1)).to_string().starts_with("student-"));
        assert!(InstanceId(uuid(1)).to_string().starts_with("qi-"));
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::new(9).to_string(), "conn-9");
    }

    // =====================================================================
    // Enumerations — spellings are bit-level stable
    // =====================================================================

    #[test]
    fn test_phase_wire_spellings() {
        assert_eq!(
            serde_json::to_string(&Phase::ActiveQuestion).unwrap(),
            "\"active_question\""
        );
        assert_eq!(serde_json::to_string(&Phase::Lobby).unwrap(), "\"lobby\"");
        assert_eq!(
            serde_json::to_string(&Phase::Completed).unwrap(),
            "\"completed\""
        );
    }

    #[test]
    fn test_side_wire_spellings_and_direction() {
        assert_eq!(serde_json::to_string(&Side::Left).unwrap(), "\"left\"");
        assert_eq!(serde_json::to_string(&Side::Right).unwrap(), "\"right\"");
        assert_eq!(Side::Left.direction(), -1.0);
        assert_eq!(Side::Right.direction(), 1.0);
        assert_eq!(Side::Left.endpoint(), 0.0);
        assert_eq!(Side::Right.endpoint(), 100.0);
    }

    #[test]
    fn test_strength_reason_wire_spellings() {
        assert_eq!(
            serde_json::to_string(&StrengthReason::CorrectAnswer).unwrap(),
            "\"correct_answer\""
        );
        assert_eq!(
            serde_json::to_string(&StrengthReason::ManualAdjust).unwrap(),
            "\"manual_adjust\""
        );
    }

    #[test]
    fn test_error_code_wire_spellings() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::AlreadyAnswered).unwrap(),
            "\"ALREADY_ANSWERED\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::RateLimited).unwrap(),
            "\"RATE_LIMITED\""
        );
    }

    // =====================================================================
    // Client messages
    // =====================================================================

    #[test]
    fn test_hello_json_shape() {
        let msg = ClientMessage::Hello {
            token: "tok".into(),
            client_msg_id: Some("c1".into()),
            reconnect: true,
            last_event_id: Some(12),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "HELLO");
        assert_eq!(json["token"], "tok");
        assert_eq!(json["clientMsgId"], "c1");
        assert_eq!(json["reconnect"], true);
        assert_eq!(json["lastEventId"], 12);
    }

    #[test]
    fn test_hello_minimal_decodes_with_defaults() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"HELLO","token":"t"}"#).unwrap();
        match msg {
            ClientMessage::Hello {
                token,
                reconnect,
                last_event_id,
                client_msg_id,
            } => {
                assert_eq!(token, "t");
                assert!(!reconnect);
                assert_eq!(last_event_id, None);
                assert_eq!(client_msg_id, None);
            }
            other => panic!("decoded wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_submit_answer_json_shape() {
        let msg = ClientMessage::SubmitAnswer {
            instance_id: InstanceId(uuid(3)),
            choice_id: AnswerId(uuid(4)),
            client_msg_id: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "SUBMIT_ANSWER");
        assert_eq!(json["instanceId"], uuid(3).to_string());
        assert_eq!(json["choiceId"], uuid(4).to_string());
    }

    #[test]
    fn test_teacher_message_tags() {
        let pause = ClientMessage::TeacherPause { client_msg_id: None };
        let adjust = ClientMessage::TeacherManualAdjust {
            delta: -5.0,
            reason: None,
            client_msg_id: None,
        };
        assert_eq!(
            serde_json::to_value(&pause).unwrap()["type"],
            "TEACHER_PAUSE"
        );
        let adjust_json = serde_json::to_value(&adjust).unwrap();
        assert_eq!(adjust_json["type"], "TEACHER_MANUAL_ADJUST");
        assert_eq!(adjust_json["delta"], -5.0);
    }

    #[test]
    fn test_requires_teacher_covers_teacher_commands_only() {
        assert!(ClientMessage::TeacherEndGame { client_msg_id: None }
            .requires_teacher());
        assert!(!ClientMessage::Ping { client_msg_id: None }.requires_teacher());
        assert!(!ClientMessage::SubmitAnswer {
            instance_id: InstanceId(uuid(1)),
            choice_id: AnswerId(uuid(2)),
            client_msg_id: None,
        }
        .requires_teacher());
    }

    #[test]
    fn test_client_msg_id_accessor() {
        let msg = ClientMessage::JoinTeam {
            team_id: TeamId(uuid(1)),
            client_msg_id: Some("abc".into()),
        };
        assert_eq!(msg.client_msg_id(), Some("abc"));
    }

    // =====================================================================
    // Server messages
    // =====================================================================

    #[test]
    fn test_tug_update_json_shape() {
        let msg = ServerMessage::TugUpdate {
            position: 48.6,
            delta: -1.4,
            reason: StrengthReason::CorrectAnswer,
            team_id: TeamId(uuid(2)),
            last_event_id: 5,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "TUG_UPDATE");
        assert_eq!(json["position"], 48.6);
        assert_eq!(json["delta"], -1.4);
        assert_eq!(json["reason"], "correct_answer");
        assert_eq!(json["lastEventId"], 5);
    }

    #[test]
    fn test_question_view_strips_is_correct_when_none() {
        let view = QuestionView {
            id: InstanceId(uuid(1)),
            text: "2+2?".into(),
            answers: vec![AnswerOptionView {
                id: AnswerId(uuid(2)),
                text: "4".into(),
                is_correct: None,
            }],
            question_type: "multiple_choice".into(),
            difficulty: None,
            time_limit_ms: 30_000,
            points: 10,
        };
        let json = serde_json::to_value(&view).unwrap();
        assert!(json["answers"][0].get("isCorrect").is_none());
        assert_eq!(json["type"], "multiple_choice");
        assert_eq!(json["timeLimitMs"], 30_000);
    }

    #[test]
    fn test_question_view_keeps_is_correct_for_teacher() {
        let view = AnswerOptionView {
            id: AnswerId(uuid(2)),
            text: "4".into(),
            is_correct: Some(true),
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["isCorrect"], true);
    }

    #[test]
    fn test_error_event_json_shape() {
        let msg = ServerMessage::Error {
            code: ErrorCode::QuestionExpired,
            message: "too late".into(),
            client_msg_id: Some("x".into()),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "ERROR");
        assert_eq!(json["code"], "QUESTION_EXPIRED");
        assert_eq!(json["clientMsgId"], "x");
    }

    #[test]
    fn test_answer_result_round_trip() {
        let msg = ServerMessage::AnswerResult {
            correct: true,
            correct_answer_id: AnswerId(uuid(9)),
            delta: -1.4,
            new_position: 48.6,
            points_awarded: 14,
            response_time_ms: 3000,
        };
        let text = serde_json::to_string(&msg).unwrap();
        let back: ServerMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn test_game_end_with_null_winner() {
        let msg = ServerMessage::GameEnd {
            winner: None,
            final_position: 50.0,
            summary: GameSummary {
                duration: 120_000,
                total_questions: 8,
            },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "GAME_END");
        assert!(json["winner"].is_null());
        assert_eq!(json["summary"]["duration"], 120_000);
    }

    #[test]
    fn test_pong_is_bare() {
        let json = serde_json::to_value(&ServerMessage::Pong).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "PONG" }));
    }

    // =====================================================================
    // Malformed input
    // =====================================================================

    #[test]
    fn test_unknown_type_tag_fails_to_decode() {
        // Legacy shapes (QUESTION_PUSHED and friends) are rejected.
        let legacy = r#"{"type":"QUESTION_PUSHED","payload":{}}"#;
        let result: Result<ClientMessage, _> = serde_json::from_str(legacy);
        assert!(result.is_err());
        let result: Result<ServerMessage, _> = serde_json::from_str(legacy);
        assert!(result.is_err());
    }

    #[test]
    fn test_garbage_fails_to_decode() {
        let result: Result<ClientMessage, _> =
            serde_json::from_str("not json at all");
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_required_field_fails() {
        // SUBMIT_ANSWER without a choiceId is malformed.
        let json = r#"{"type":"SUBMIT_ANSWER","instanceId":"00000000-0000-0000-0000-000000000001"}"#;
        let result: Result<ClientMessage, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
