//! Error types for the auth layer.

/// Errors produced while authenticating a connection.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The token was malformed, expired, or failed signature checks.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// The token is valid but names a different session than the one the
    /// connection was opened against.
    #[error("token not valid for this session")]
    WrongSession,
}
