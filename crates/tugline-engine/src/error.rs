//! Error types for the session engine.

use tugline_protocol::{ErrorCode, Phase, SessionId};
use tugline_store::StoreError;

/// Errors produced by engine commands.
///
/// Every variant maps onto exactly one wire [`ErrorCode`]; errors never
/// escape the actor — they become `ERROR` events on the originating
/// connection or error replies on the control API.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The command is not permitted in the current phase. No state change.
    #[error("command not valid in phase {0}")]
    InvalidState(Phase),

    /// The student already has an admitted attempt for this question.
    #[error("already answered this question")]
    AlreadyAnswered,

    /// The question has ended, or the instance id is not the current one.
    #[error("question is no longer accepting answers")]
    QuestionExpired,

    /// The chosen answer id is not one of the question's options.
    #[error("answer is not an option of this question")]
    InvalidAnswer,

    /// The message decoded but is semantically invalid (unknown team,
    /// out-of-range delta, second HELLO, ...).
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The sender's role or roster membership does not permit this.
    #[error("not authorized")]
    NotAuthorized,

    /// No such session exists.
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    /// The session has completed; reconnects are refused.
    #[error("session has ended")]
    SessionEnded,

    /// The student was kicked and may not rejoin.
    #[error("kicked from the session")]
    Kicked,

    /// A storage operation behind this command failed.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// The engine actor's command channel is gone (hibernated or crashed).
    #[error("session engine unavailable for {0}")]
    Unavailable(SessionId),

    /// Anything else that must not leak details to clients.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// The wire error code clients receive for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidState(_) | Self::InvalidMessage(_) => {
                ErrorCode::InvalidMessage
            }
            Self::AlreadyAnswered => ErrorCode::AlreadyAnswered,
            Self::QuestionExpired => ErrorCode::QuestionExpired,
            Self::InvalidAnswer => ErrorCode::InvalidAnswer,
            Self::NotAuthorized => ErrorCode::NotAuthorized,
            Self::SessionNotFound(_) => ErrorCode::SessionNotFound,
            Self::SessionEnded => ErrorCode::SessionEnded,
            Self::Kicked => ErrorCode::Kicked,
            Self::Storage(_) | Self::Unavailable(_) | Self::Internal(_) => {
                ErrorCode::InternalError
            }
        }
    }
}
