//! Per-connection handler: HELLO, auth, rate limiting, and pumps.
//!
//! Each accepted connection gets its own task running this handler. The
//! flow is:
//!
//!   1. Receive `HELLO` within the grace window → authenticate the token
//!   2. Wake the session engine named in the upgrade path
//!   3. Attach → the engine sends `WELCOME` + `STATE_SNAPSHOT`
//!   4. Pump: inbound frames (rate-limited) into the actor; outbound
//!      events from the actor's queue onto the socket
//!
//! The handler owns all socket I/O. The engine only ever touches the
//! outbound channel, so a slow client can't stall the actor.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tugline_auth::Authenticator;
use tugline_engine::{EngineError, EngineHandle, Outbound};
use tugline_protocol::{
    ClientMessage, Codec, ConnectionId, ErrorCode, ServerMessage,
    CLOSE_INTERNAL_ERROR, CLOSE_NORMAL, CLOSE_POLICY_VIOLATION,
};
use tugline_store::{StateStore, Storage};
use tugline_transport::{Connection, WebSocketConnection};

use crate::rate_limit::RateLimiter;
use crate::server::ServerState;
use crate::TuglineError;

/// Drop guard that detaches the connection from its engine when the
/// handler exits, even on panic. `Drop` is synchronous, so the detach is
/// a fire-and-forget task.
struct DetachGuard {
    conn_id: ConnectionId,
    engine: EngineHandle,
}

impl Drop for DetachGuard {
    fn drop(&mut self) {
        let conn_id = self.conn_id;
        let engine = self.engine.clone();
        tokio::spawn(async move {
            engine.detach(conn_id).await;
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<S, K, A, C>(
    conn: WebSocketConnection,
    state: Arc<ServerState<S, K, A, C>>,
) -> Result<(), TuglineError>
where
    S: Storage,
    K: StateStore,
    A: Authenticator,
    C: Codec + Clone,
{
    let conn_id = conn.id();
    let session_id = conn.session_id();
    tracing::debug!(%conn_id, %session_id, "handling new connection");

    // --- Step 1: HELLO within the grace window ---
    let hello = match tokio::time::timeout(
        state.config.hello_grace,
        conn.recv(),
    )
    .await
    {
        Ok(Ok(Some(frame))) => frame,
        Ok(Ok(None)) => return Ok(()),
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            let _ = conn.close_with(CLOSE_POLICY_VIOLATION, "hello timeout").await;
            return Ok(());
        }
    };

    let (token, reconnect, last_event_id, hello_msg_id) =
        match state.codec.decode::<ClientMessage>(&hello) {
            Ok(ClientMessage::Hello {
                token,
                client_msg_id,
                reconnect,
                last_event_id,
            }) => (token, reconnect, last_event_id, client_msg_id),
            Ok(_) | Err(_) => {
                send_direct(
                    &conn,
                    &state.codec,
                    ErrorCode::InvalidMessage,
                    "first message must be HELLO",
                    None,
                )
                .await;
                let _ = conn
                    .close_with(CLOSE_POLICY_VIOLATION, "missing hello")
                    .await;
                return Ok(());
            }
        };

    // --- Step 2: authenticate ---
    let identity = match state.auth.authenticate(&token).await {
        Ok(identity) => identity,
        Err(e) => {
            tracing::debug!(%conn_id, error = %e, "authentication failed");
            send_direct(
                &conn,
                &state.codec,
                ErrorCode::InvalidToken,
                "invalid token",
                hello_msg_id.clone(),
            )
            .await;
            let _ = conn.close_with(CLOSE_POLICY_VIOLATION, "invalid token").await;
            return Ok(());
        }
    };
    if identity.session_id != session_id {
        send_direct(
            &conn,
            &state.codec,
            ErrorCode::NotAuthorized,
            "token is for a different session",
            hello_msg_id.clone(),
        )
        .await;
        let _ = conn.close_with(CLOSE_POLICY_VIOLATION, "wrong session").await;
        return Ok(());
    }

    // --- Step 3: wake the engine and attach ---
    let engine = match state.manager.wake(session_id).await {
        Ok(engine) => engine,
        Err(e) => {
            reject(&conn, &state.codec, &e, hello_msg_id).await;
            return Ok(());
        }
    };

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
    if let Err(e) = engine
        .attach(conn_id, identity.clone(), reconnect, last_event_id, out_tx)
        .await
    {
        reject(&conn, &state.codec, &e, hello_msg_id).await;
        return Ok(());
    }

    tracing::info!(
        %conn_id,
        %session_id,
        role = ?identity.role,
        "connection authenticated"
    );

    let _guard = DetachGuard {
        conn_id,
        engine: engine.clone(),
    };

    // --- Step 4a: outbound pump ---
    let writer = conn.clone();
    let codec = state.codec.clone();
    let pump = tokio::spawn(async move {
        while let Some(outbound) = out_rx.recv().await {
            match outbound {
                Outbound::Event(msg) => {
                    let frame = match codec.encode(&msg) {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::error!(error = %e, "event encode failed");
                            continue;
                        }
                    };
                    if writer.send(&frame).await.is_err() {
                        break;
                    }
                }
                Outbound::Close(code) => {
                    let _ = writer.close_with(code, close_reason(code)).await;
                    break;
                }
            }
        }
    });

    // --- Step 4b: inbound loop ---
    let mut limiter = RateLimiter::new(state.config.rate_limit_per_second);
    loop {
        let frame = match tokio::time::timeout(
            state.config.idle_timeout,
            conn.recv(),
        )
        .await
        {
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => {
                tracing::debug!(%conn_id, "connection closed cleanly");
                break;
            }
            Ok(Err(e)) => {
                tracing::debug!(%conn_id, error = %e, "recv error");
                break;
            }
            Err(_) => {
                tracing::debug!(%conn_id, "connection idle timeout");
                let _ = conn.close_with(CLOSE_NORMAL, "idle timeout").await;
                break;
            }
        };

        if !limiter.allow(Instant::now()) {
            send_direct(
                &conn,
                &state.codec,
                ErrorCode::RateLimited,
                "message rate limit exceeded",
                None,
            )
            .await;
            continue;
        }

        let msg = match state.codec.decode::<ClientMessage>(&frame) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "undecodable frame");
                send_direct(
                    &conn,
                    &state.codec,
                    ErrorCode::InvalidMessage,
                    "malformed message",
                    None,
                )
                .await;
                continue;
            }
        };

        if engine.client_message(conn_id, msg).await.is_err() {
            // The engine is gone (hibernated or failed); the client
            // reconnects and the manager rehydrates.
            send_direct(
                &conn,
                &state.codec,
                ErrorCode::InternalError,
                "session engine unavailable",
                None,
            )
            .await;
            let _ = conn.close_with(CLOSE_INTERNAL_ERROR, "engine gone").await;
            break;
        }
    }

    pump.abort();
    Ok(())
}

/// Sends an `ERROR` for a refused attach and closes with the matching
/// close code.
async fn reject<C: Codec>(
    conn: &WebSocketConnection,
    codec: &C,
    err: &EngineError,
    client_msg_id: Option<String>,
) {
    let code = err.code();
    send_direct(conn, codec, code, &err.to_string(), client_msg_id).await;
    let close = match code {
        ErrorCode::SessionEnded => CLOSE_NORMAL,
        ErrorCode::InternalError => CLOSE_INTERNAL_ERROR,
        _ => CLOSE_POLICY_VIOLATION,
    };
    let _ = conn.close_with(close, close_reason(close)).await;
}

/// Encodes and sends an `ERROR` event straight on the socket, outside
/// the engine's outbound queue.
async fn send_direct<C: Codec>(
    conn: &WebSocketConnection,
    codec: &C,
    code: ErrorCode,
    message: &str,
    client_msg_id: Option<String>,
) {
    let event = ServerMessage::Error {
        code,
        message: message.to_string(),
        client_msg_id,
    };
    if let Ok(frame) = codec.encode(&event) {
        let _ = conn.send(&frame).await;
    }
}

fn close_reason(code: u16) -> &'static str {
    match code {
        CLOSE_NORMAL => "session ended",
        CLOSE_POLICY_VIOLATION => "policy violation",
        CLOSE_INTERNAL_ERROR => "internal error",
        _ => "closed",
    }
}
