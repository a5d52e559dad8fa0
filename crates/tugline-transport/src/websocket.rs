//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! The session id travels in the upgrade path
//! (`/api/v1/sessions/{sessionId}/ws`); a request whose path does not
//! parse is rejected during the handshake with an HTTP 404, before any
//! WebSocket frame is exchanged.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tugline_protocol::{ConnectionId, SessionId};
use uuid::Uuid;

use crate::{Connection, Transport, TransportError};

/// Counter for generating unique connection ids.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type WsStream = WebSocketStream<TcpStream>;

/// Extracts the session id from an upgrade path of the form
/// `/api/v1/sessions/{uuid}/ws`.
fn parse_session_path(path: &str) -> Option<SessionId> {
    let rest = path.strip_prefix("/api/v1/sessions/")?;
    let raw = rest.strip_suffix("/ws")?;
    Uuid::parse_str(raw).ok().map(SessionId)
}

/// A WebSocket-based [`Transport`] that listens for incoming upgrades.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self { listener })
    }

    /// The local address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let mut session_id: Option<SessionId> = None;
        let callback = |req: &Request, resp: Response| {
            match parse_session_path(req.uri().path()) {
                Some(id) => {
                    session_id = Some(id);
                    Ok(resp)
                }
                None => {
                    let mut rejection = ErrorResponse::new(Some(
                        "unknown session path".to_string(),
                    ));
                    *rejection.status_mut() =
                        tokio_tungstenite::tungstenite::http::StatusCode::NOT_FOUND;
                    Err(rejection)
                }
            }
        };

        let ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .map_err(|e| TransportError::UpgradeRejected(e.to_string()))?;
        let session_id = session_id
            .ok_or_else(|| TransportError::UpgradeRejected("no session id".into()))?;

        let id =
            ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(%id, %addr, %session_id, "accepted WebSocket connection");

        let (sink, stream) = ws.split();
        Ok(WebSocketConnection {
            id,
            session_id,
            sink: Arc::new(Mutex::new(sink)),
            stream: Arc::new(Mutex::new(stream)),
        })
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// A single WebSocket connection, bound to the session named in its
/// upgrade path.
///
/// Sink and stream halves carry separate locks so the outbound pump can
/// write while the inbound loop is parked on `recv`.
#[derive(Clone)]
pub struct WebSocketConnection {
    id: ConnectionId,
    session_id: SessionId,
    sink: Arc<Mutex<SplitSink<WsStream, Message>>>,
    stream: Arc<Mutex<SplitStream<WsStream>>>,
}

impl WebSocketConnection {
    /// The session this connection was opened against.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, frame: &str) -> Result<(), Self::Error> {
        self.sink
            .lock()
            .await
            .send(Message::text(frame))
            .await
            .map_err(|e| {
                TransportError::SendFailed(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    e,
                ))
            })
    }

    async fn recv(&self) -> Result<Option<String>, Self::Error> {
        loop {
            let msg = self.stream.lock().await.next().await;
            match msg {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.to_string()));
                }
                Some(Ok(Message::Binary(data))) => {
                    match String::from_utf8(data.to_vec()) {
                        Ok(text) => return Ok(Some(text)),
                        Err(_) => {
                            return Err(TransportError::ReceiveFailed(
                                std::io::Error::new(
                                    std::io::ErrorKind::InvalidData,
                                    "binary frame is not UTF-8",
                                ),
                            ));
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(
                        std::io::Error::new(std::io::ErrorKind::ConnectionReset, e),
                    ));
                }
            }
        }
    }

    async fn close_with(&self, code: u16, reason: &str) -> Result<(), Self::Error> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.sink
            .lock()
            .await
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| {
                TransportError::SendFailed(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    e,
                ))
            })
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.sink
            .lock()
            .await
            .send(Message::Close(None))
            .await
            .map_err(|e| {
                TransportError::SendFailed(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    e,
                ))
            })
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_session_path_accepts_the_canonical_shape() {
        let id = Uuid::new_v4();
        let path = format!("/api/v1/sessions/{id}/ws");
        assert_eq!(parse_session_path(&path), Some(SessionId(id)));
    }

    #[test]
    fn test_parse_session_path_rejects_other_shapes() {
        assert_eq!(parse_session_path("/"), None);
        assert_eq!(parse_session_path("/api/v1/sessions/not-a-uuid/ws"), None);
        assert_eq!(
            parse_session_path(&format!("/api/v1/sessions/{}", Uuid::new_v4())),
            None
        );
        assert_eq!(
            parse_session_path(&format!("/api/v2/sessions/{}/ws", Uuid::new_v4())),
            None
        );
    }
}
