//! Transport abstraction layer for Tugline.
//!
//! Provides the [`Transport`] and [`Connection`] traits the server loop
//! is written against, plus the WebSocket implementation the REST layer
//! upgrades into (`GET /api/v1/sessions/{sessionId}/ws`).
//!
//! Frames are JSON text; the session id is carved out of the upgrade
//! path during the handshake so a connection is bound to its session
//! before the first frame arrives.
//!
//! # Feature Flags
//!
//! - `websocket` (default) — WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;

    /// Gracefully shuts down the transport, stopping new connections.
    async fn shutdown(&self) -> Result<(), Self::Error>;
}

/// A single connection that can send and receive text frames.
///
/// Implementations are cheaply cloneable so one task can pump inbound
/// frames while another drains the outbound queue.
pub trait Connection: Send + Sync + Clone + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends a text frame to the remote peer.
    async fn send(&self, frame: &str) -> Result<(), Self::Error>;

    /// Receives the next text frame from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    async fn recv(&self) -> Result<Option<String>, Self::Error>;

    /// Closes the connection with a close code and reason.
    async fn close_with(&self, code: u16, reason: &str) -> Result<(), Self::Error>;

    /// Closes the connection without a specific code.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> tugline_protocol::ConnectionId;
}
