//! # Tugline
//!
//! Realtime classroom trivia tug-of-war backend.
//!
//! A teacher drives a sequence of questions; students on two teams race
//! to answer, and every correct answer tugs a shared rope toward the
//! answering team's side. Each running game is owned by a single
//! authoritative session actor; this crate ties the actor layer to the
//! WebSocket transport, authentication, and the REST layer's control
//! surface.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tugline::prelude::*;
//!
//! // let server = TuglineServer::builder()
//! //     .bind("0.0.0.0:8080")
//! //     .build(storage, states, my_auth)
//! //     .await?;
//! // let control = server.control();
//! // server.run().await
//! ```

mod control;
mod error;
mod handler;
mod rate_limit;
mod server;

pub use control::ControlApi;
pub use error::TuglineError;
pub use rate_limit::RateLimiter;
pub use server::{ServerConfig, TuglineServer, TuglineServerBuilder};

/// Re-exports everything an embedding host needs.
///
/// ```rust
/// use tugline::prelude::*;
/// ```
pub mod prelude {
    // Meta crate
    pub use crate::{
        ControlApi, RateLimiter, ServerConfig, TuglineError, TuglineServer,
        TuglineServerBuilder,
    };

    // Protocol types
    pub use tugline_protocol::{
        AnswerId, ClientMessage, Codec, ConnectionId, ErrorCode, GameStateView,
        InstanceId, JsonCodec, Phase, ProtocolError, QuestionId, Role,
        RulesetId, ServerMessage, SessionId, Side, StrengthReason, StudentId,
        TeamId, TenantId,
    };

    // Auth types
    pub use tugline_auth::{AuthError, Authenticator, Identity};

    // Engine types
    pub use tugline_engine::{
        AnswerOutcome, EngineConfig, EngineError, EngineHandle, EngineManager,
    };

    // Storage types
    pub use tugline_store::{
        MemoryStateStore, MemoryStorage, PgStateStore, PgStorage, Ruleset,
        StateStore, Storage, StoreError,
    };

    // Transport types
    pub use tugline_transport::{
        Connection, Transport, TransportError, WebSocketConnection,
        WebSocketTransport,
    };
}
