//! The Tugline session engine.
//!
//! One actor per game session owns the whole truth of that game: the
//! phase machine, the rope position, the current question's lifecycle,
//! per-student answer admission, scoring and streaks, role-filtered
//! broadcast fan-out, and the durable event log. Everything reaches the
//! actor through its command channel, so all mutation is linearized.
//!
//! Layout mirrors the responsibilities:
//!
//! - [`phase`] — the six-phase transition table.
//! - [`scoring`] — pure point/streak/rope arithmetic.
//! - `state` — the Session Runtime State persisted across hibernation.
//! - `registry` — live connections and role-filtered fan-out.
//! - `actor` — the command loop, question lifecycle, and message router.
//! - `manager` — the `{session id → actor handle}` registry.

mod actor;
mod error;
mod manager;
pub mod phase;
mod registry;
pub mod scoring;
mod state;

pub use actor::{AnswerOutcome, EngineConfig, EngineHandle};
pub use error::EngineError;
pub use manager::EngineManager;
pub use registry::{ClientSender, ConnectionRegistry, Outbound};
pub use state::{
    AnswerOption, Attempt, QuestionInstance, RuntimeState, StudentSnapshot,
    TeamSnapshot,
};
