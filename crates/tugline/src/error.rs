//! Unified error type for the Tugline server.

use tugline_auth::AuthError;
use tugline_engine::EngineError;
use tugline_protocol::ProtocolError;
use tugline_store::StoreError;
use tugline_transport::TransportError;

/// Top-level error that wraps all layer-specific errors.
///
/// The `#[from]` attributes let `?` lift layer errors automatically, so
/// server and control-API code deals with one type.
#[derive(Debug, thiserror::Error)]
pub enum TuglineError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// An authentication error (invalid token, wrong session).
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// A session-engine error (phase, admission, storage, unavailable).
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A storage error outside the engine's own operations.
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tugline_protocol::SessionId;

    #[test]
    fn test_from_engine_error() {
        let err: TuglineError = EngineError::SessionEnded.into();
        assert!(matches!(err, TuglineError::Engine(_)));
        assert!(err.to_string().contains("ended"));
    }

    #[test]
    fn test_from_transport_error() {
        let err: TuglineError =
            TransportError::ConnectionClosed("gone".into()).into();
        assert!(matches!(err, TuglineError::Transport(_)));
    }

    #[test]
    fn test_from_auth_error() {
        let err: TuglineError = AuthError::InvalidToken("expired".into()).into();
        assert!(matches!(err, TuglineError::Auth(_)));
    }

    #[test]
    fn test_engine_error_keeps_its_code() {
        let engine = EngineError::SessionNotFound(SessionId::new());
        let code = engine.code();
        let err: TuglineError = engine.into();
        match err {
            TuglineError::Engine(inner) => assert_eq!(inner.code(), code),
            other => panic!("wrong variant: {other:?}"),
        }
    }
}
