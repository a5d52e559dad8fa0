//! Storage for Tugline session engines.
//!
//! Two concerns, two seams:
//!
//! - **Storage Adapter** ([`Storage`]) — the single choke-point for
//!   relational I/O: question content and rulesets in, the append-only
//!   event log (question instances, attempts, strength events) and
//!   roster/session status updates out. Every operation is an independent
//!   statement; no long-held transactions.
//! - **State Store** ([`StateStore`]) — one durable blob per session
//!   holding the serialized runtime state, written after every mutating
//!   command so a hibernated session can be rehydrated exactly.
//!
//! Production uses [`PgStorage`] / [`PgStateStore`] over a shared sqlx
//! pool; tests and the dev loop use the in-memory twins.

#![allow(async_fn_in_trait)]

mod adapter;
mod error;
mod models;
mod state_store;

pub use adapter::{
    ConnectionUpdate, MemoryStorage, PgStorage, SessionEndUpdate, Storage,
};
pub use error::StoreError;
pub use models::{
    AnswerOptionRecord, NewAttempt, NewQuestionInstance, NewStrengthEvent,
    QuestionRecord, Roster, RosterStudent, RosterTeam, Ruleset,
};
pub use state_store::{MemoryStateStore, PgStateStore, StateStore};
