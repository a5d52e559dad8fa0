//! Wire protocol for Tugline.
//!
//! This crate defines the language that the teacher console, the student
//! play view, and the session engine speak:
//!
//! - **Types** ([`ClientMessage`], [`ServerMessage`], id newtypes, the
//!   shared enumerations) — the structures that travel on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) — how those messages are
//!   converted to/from text frames.
//! - **Constants** — rate limits, close codes, and the scoring defaults
//!   shared by the engine and its tests.
//!
//! The protocol layer sits between transport (frames) and the engine
//! (game state). It knows nothing about connections or sessions — only
//! shapes.

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    AnswerId, AnswerOptionView, ClientMessage, ConnectionId, ConnectionStatus,
    ErrorCode, GameStateView, GameSummary, InstanceId, Phase, QuestionId,
    QuestionStats, QuestionView, Role, RulesetId, ServerMessage, SessionId,
    Side, StreakView, StrengthReason, StudentId, StudentView, TeamId,
    TeamStatView, TeamView, TenantId,
};

// ---------------------------------------------------------------------------
// Protocol constants
// ---------------------------------------------------------------------------

/// Messages allowed per rolling second on one connection; anything over
/// is dropped with `ERROR { RATE_LIMITED }`.
pub const WS_RATE_LIMIT_PER_SECOND: u32 = 10;

/// Rope position bounds and starting point.
pub const POSITION_MIN: f64 = 0.0;
pub const POSITION_MAX: f64 = 100.0;
pub const POSITION_START: f64 = 50.0;

/// A correct answer worth `p` points moves the rope by `p / 10`.
pub const TUG_POINTS_DIVISOR: f64 = 10.0;

/// Fraction of base points available as speed bonus at a 0 ms response.
pub const SPEED_BONUS_FACTOR: f64 = 0.5;

/// Persisted strength-event deltas are stored scaled by this factor as
/// integers.
pub const STRENGTH_DELTA_SCALE: f64 = 10.0;

/// Question defaults applied when neither the question row nor the
/// ruleset overrides them.
pub const DEFAULT_TIME_LIMIT_MS: u64 = 30_000;
pub const DEFAULT_BASE_POINTS: u32 = 10;
pub const DEFAULT_STREAK_THRESHOLD: u32 = 3;
pub const DEFAULT_STREAK_MULTIPLIER: f64 = 1.5;

/// WebSocket close codes.
pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;
