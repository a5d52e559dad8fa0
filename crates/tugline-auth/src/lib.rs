//! Connection authentication for Tugline.
//!
//! This crate owns the seam between the external token-issuance service
//! and the session engine:
//!
//! 1. **Validation** — the [`Authenticator`] trait turns a `HELLO` token
//!    into a verified [`Identity`].
//! 2. **Identity** — who the connection is (role, session, tenant, and
//!    for students their roster entry and team claim).
//!
//! The engine trusts the identity completely; everything else (roster
//! membership, kicked status, phase) is checked against its own state.

#![allow(async_fn_in_trait)]

mod auth;
mod error;
mod identity;

pub use auth::Authenticator;
pub use error::AuthError;
pub use identity::Identity;
