//! Authentication hook for validating `HELLO` tokens.
//!
//! Tugline does not mint credentials — the external auth service issues
//! tokens, and the REST layer owns the signing keys. The engine host only
//! needs the [`Authenticator`] trait: one async method that turns a token
//! string into an [`Identity`] or an error. Production wires in a JWT
//! validator; tests use an in-memory map.

use crate::{AuthError, Identity};

/// Validates a client's `HELLO` token and returns who they are.
///
/// # Example
///
/// ```rust
/// use tugline_auth::{AuthError, Authenticator, Identity};
/// use tugline_protocol::{SessionId, StudentId, TenantId};
///
/// /// Accepts any token of the form `student:<uuid>` for a fixed session.
/// /// Development only.
/// struct DevAuthenticator {
///     session_id: SessionId,
///     tenant_id: TenantId,
/// }
///
/// impl Authenticator for DevAuthenticator {
///     async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
///         let raw = token
///             .strip_prefix("student:")
///             .ok_or_else(|| AuthError::InvalidToken("unknown scheme".into()))?;
///         let id = raw
///             .parse()
///             .map_err(|_| AuthError::InvalidToken("not a uuid".into()))?;
///         Ok(Identity::student(
///             StudentId(id),
///             self.session_id,
///             self.tenant_id,
///             None,
///         ))
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Validates the given token.
    ///
    /// # Returns
    /// - `Ok(Identity)` — the token is valid; this is who sent it.
    /// - `Err(AuthError::InvalidToken)` — malformed, expired, or forged.
    fn authenticate(
        &self,
        token: &str,
    ) -> impl std::future::Future<Output = Result<Identity, AuthError>> + Send;
}
